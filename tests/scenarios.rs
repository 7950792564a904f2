//! End-to-end delivery scenarios over an in-memory group.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use groupframe::{
    ActionStatus,
    ActionType,
    CoreConfig,
    CoreError,
    DeliveryFailure,
    EmissionPolicy,
    FragmentSizing,
    GroupCore,
    GroupId,
    MemoryGroup,
    ReceivedAction,
    Seqno,
};
use groupframe_testing::{
    CHANNEL,
    LoggerHandle,
    MEMORY_URL,
    RECV_TIMEOUT,
    TestResult,
    logger,
    open_session,
    open_sessions,
    patterned_payload,
    recv_ordered,
    recv_within,
    wait_all_for_members,
    wait_for_members,
};
use rstest::{fixture, rstest};
use serial_test::serial;
use tokio::task::JoinHandle;

/// Packet size giving exactly 100 payload bytes per fragment.
fn hundred_byte_fragments() -> CoreConfig {
    CoreConfig::default()
        .packet_size(FragmentSizing::minimum_packet_size() + 99)
        .emission(EmissionPolicy::Stepped)
}

#[fixture]
fn group() -> MemoryGroup { MemoryGroup::new() }

fn spawn_send(core: &Arc<GroupCore>, payload: Bytes) -> JoinHandle<Result<usize, CoreError>> {
    let core = core.clone();
    tokio::spawn(async move {
        core.send_path()
            .await
            .send(ActionType::Replication, payload)
            .await
    })
}

async fn recv_failure(core: &GroupCore) -> TestResult<ReceivedAction> {
    loop {
        let action = recv_within(core).await?;
        if matches!(action.status(), ActionStatus::Failed(_)) {
            return Ok(action);
        }
        if action.action_type() != ActionType::Configuration {
            return Err(format!("unexpected action before failure: {action:?}").into());
        }
    }
}

#[rstest]
#[tokio::test]
async fn large_action_is_split_and_reassembled(group: MemoryGroup) -> TestResult {
    let sessions = open_sessions(&group, 2, CoreConfig::default()).await?;
    let (a, b) = (&sessions[0], &sessions[1]);
    let payload = patterned_payload(5000);

    let mut send = a.send_path().await;
    let fragment_payload = send.set_packet_size(1400)?;
    assert!(fragment_payload <= 1400 - groupframe::message::fragment_overhead().get());
    let before = group.delivered();
    assert_eq!(send.send(ActionType::Replication, payload.clone()).await?, 5000);
    drop(send);

    assert_eq!(
        group.delivered() - before,
        5000usize.div_ceil(fragment_payload)
    );
    for session in [a, b] {
        let action = recv_ordered(session).await?;
        assert_eq!(action.size(), 5000);
        assert_eq!(action.payload(), payload.as_ref());
        assert_eq!(action.seqno(), Some(Seqno::new(0)));
    }
    Ok(())
}

#[rstest]
#[tokio::test]
async fn all_members_agree_on_a_strictly_increasing_order(group: MemoryGroup) -> TestResult {
    const PER_SENDER: usize = 5;
    let sessions = open_sessions(&group, 3, CoreConfig::default().packet_size(256)).await?;

    let senders: Vec<_> = sessions
        .iter()
        .enumerate()
        .map(|(index, session)| {
            let session = session.clone();
            tokio::spawn(async move {
                let mut send = session.send_path().await;
                for round in 0..PER_SENDER {
                    let body = format!("{index}:{round}:").repeat(100);
                    send.send(ActionType::Replication, Bytes::from(body)).await?;
                }
                Ok::<_, CoreError>(())
            })
        })
        .collect();
    for sender in senders {
        sender.await??;
    }

    let mut histories = Vec::new();
    for session in &sessions {
        let mut history = Vec::new();
        for _ in 0..sessions.len() * PER_SENDER {
            let action = recv_ordered(session).await?;
            let seqno = action.seqno().ok_or("ordered action without seqno")?;
            history.push((seqno, action.sender(), action.into_payload()));
        }
        assert!(history.windows(2).all(|pair| pair[0].0 < pair[1].0));
        histories.push(history);
    }
    assert!(histories.windows(2).all(|pair| pair[0] == pair[1]));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn lock_step_releases_one_fragment_per_step(group: MemoryGroup) -> TestResult {
    let sessions = open_sessions(&group, 2, hundred_byte_fragments()).await?;
    let (a, b) = (&sessions[0], &sessions[1]);
    let stepper = a.stepper().ok_or("session is not stepped")?;
    let payload = patterned_payload(300);
    let before = group.delivered();

    let send = spawn_send(a, payload.clone());
    for step in 1..=2 {
        assert!(stepper.step(RECV_TIMEOUT).await);
        assert_eq!(group.delivered() - before, step);
        assert!(!send.is_finished());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), b.recv())
                .await
                .is_err(),
            "partial action must not be observable"
        );
    }

    assert!(stepper.step(RECV_TIMEOUT).await);
    assert_eq!(send.await??, 300);
    let action = recv_ordered(b).await?;
    assert_eq!(action.payload(), payload.as_ref());
    assert!(!stepper.step(Duration::from_millis(10)).await);
    Ok(())
}

#[rstest]
#[tokio::test]
#[serial(scenario_logs)]
async fn eviction_mid_send_reports_not_connected(
    group: MemoryGroup,
    mut logger: LoggerHandle,
) -> TestResult {
    let sessions = open_sessions(&group, 2, hundred_byte_fragments()).await?;
    let (a, b) = (&sessions[0], &sessions[1]);
    let local = a.local_member().ok_or("a has no member id")?;
    let remote = b.local_member().ok_or("b has no member id")?;
    let stepper = a.stepper().ok_or("session is not stepped")?;
    logger.clear();

    let send = spawn_send(a, patterned_payload(300));
    assert!(stepper.step(RECV_TIMEOUT).await);
    group.evict(local).await;
    assert!(stepper.step(RECV_TIMEOUT).await);
    assert!(matches!(send.await?, Err(CoreError::NotConnected)));

    let failed = recv_failure(a).await?;
    assert_eq!(
        failed.status(),
        ActionStatus::Failed(DeliveryFailure::NotConnected)
    );
    assert_eq!(failed.size(), 300);
    assert!(failed.payload().is_empty());
    assert!(failed.is_local());
    assert!(!a.is_primary());

    wait_for_members(b, &[remote]).await?;
    assert!(
        tokio::time::timeout(Duration::from_millis(50), b.recv())
            .await
            .is_err(),
        "no remnant of the evicted sender may be delivered"
    );
    assert!(logger.contains("dropped partial action"));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn partition_mid_send_reports_not_connected(group: MemoryGroup) -> TestResult {
    let sessions = open_sessions(&group, 2, hundred_byte_fragments()).await?;
    let a = &sessions[0];
    let local = a.local_member().ok_or("a has no member id")?;
    let stepper = a.stepper().ok_or("session is not stepped")?;

    let send = spawn_send(a, patterned_payload(300));
    assert!(stepper.step(RECV_TIMEOUT).await);
    group.partition(local).await;
    assert!(stepper.step(RECV_TIMEOUT).await);
    assert!(matches!(send.await?, Err(CoreError::NotConnected)));

    let failed = recv_failure(a).await?;
    assert_eq!(failed.failure().map(|err| err.errno()), Some(CoreError::NotConnected.errno()));
    let view = recv_within(a).await?.view().ok_or("expected the isolated view")?;
    assert!(!view.is_primary());
    assert!(!a.is_primary());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn view_change_mid_send_requests_restart(group: MemoryGroup) -> TestResult {
    let sessions = open_sessions(&group, 2, hundred_byte_fragments()).await?;
    let (a, b) = (&sessions[0], &sessions[1]);
    let stepper = a.stepper().ok_or("session is not stepped")?;

    let send = spawn_send(a, patterned_payload(300));
    assert!(stepper.step(RECV_TIMEOUT).await);
    let late = open_session(&group, "late", CoreConfig::default()).await?;
    assert!(stepper.step(RECV_TIMEOUT).await);
    assert!(stepper.step(RECV_TIMEOUT).await);
    assert_eq!(send.await??, 300);

    let failed = recv_failure(a).await?;
    assert_eq!(failed.status(), ActionStatus::Failed(DeliveryFailure::Restart));
    assert!(a.is_primary());

    let members: Vec<_> = [a, b, &late]
        .iter()
        .filter_map(|session| session.local_member())
        .collect();
    tokio::try_join!(
        wait_for_members(b, &members),
        wait_for_members(&late, &members)
    )?;
    assert!(
        tokio::time::timeout(Duration::from_millis(50), b.recv())
            .await
            .is_err(),
        "interrupted action must not reach other members"
    );
    Ok(())
}

#[rstest]
#[tokio::test]
async fn late_joiner_continues_the_group_numbering(group: MemoryGroup) -> TestResult {
    let sessions = open_sessions(&group, 1, CoreConfig::default()).await?;
    let a = &sessions[0];
    {
        let mut send = a.send_path().await;
        for body in [&b"w0"[..], b"w1", b"w2"] {
            send.send(ActionType::Replication, Bytes::from_static(body))
                .await?;
        }
    }
    for expected in 0..3 {
        assert_eq!(recv_ordered(a).await?.seqno(), Some(Seqno::new(expected)));
    }

    let b = open_session(&group, "late", CoreConfig::default()).await?;
    let members: Vec<_> = [a, &b]
        .iter()
        .filter_map(|session| session.local_member())
        .collect();
    let (seen_by_a, seen_by_b) = tokio::try_join!(
        wait_for_members(a, &members),
        wait_for_members(&b, &members)
    )?;
    assert_eq!(seen_by_a.view(), seen_by_b.view());
    assert_eq!(seen_by_a.configuration_seqno(), Some(Seqno::new(2)));
    assert_eq!(seen_by_b.configuration_seqno(), Some(Seqno::new(2)));

    a.send_path()
        .await
        .send(ActionType::Replication, Bytes::from_static(b"y"))
        .await?;
    for session in [a, &b] {
        let action = recv_ordered(session).await?;
        assert_eq!(action.payload(), b"y");
        assert_eq!(action.seqno(), Some(Seqno::new(3)));
    }
    assert_eq!(
        a.view().map(|view| view.group()),
        b.view().map(|view| view.group())
    );
    Ok(())
}

#[rstest]
#[tokio::test]
async fn joiner_with_longer_history_raises_the_base(group: MemoryGroup) -> TestResult {
    let a = open_session(&group, "fresh", CoreConfig::default()).await?;
    let b = Arc::new(GroupCore::create(
        "seeded",
        "127.0.0.1:0",
        Arc::new(group.clone()),
        CoreConfig::default(),
    )?);
    b.init(Seqno::new(10), GroupId::random()).await?;
    b.open(CHANNEL, MEMORY_URL).await?;
    wait_all_for_members(&[a.clone(), b.clone()]).await?;

    b.send_path()
        .await
        .send(ActionType::Service, Bytes::from_static(b"next"))
        .await?;
    for session in [&a, &b] {
        assert_eq!(recv_ordered(session).await?.seqno(), Some(Seqno::new(11)));
    }
    Ok(())
}

#[rstest]
#[tokio::test]
async fn actions_sent_before_agreement_wait_for_it(group: MemoryGroup) -> TestResult {
    let sessions = open_sessions(&group, 1, CoreConfig::default()).await?;
    let a = &sessions[0];
    a.send_path()
        .await
        .send(ActionType::Service, Bytes::from_static(b"old"))
        .await?;
    assert_eq!(recv_ordered(a).await?.seqno(), Some(Seqno::new(0)));

    let b = open_session(&group, "late", CoreConfig::default()).await?;
    a.send_path()
        .await
        .send(ActionType::Service, Bytes::from_static(b"early"))
        .await?;

    let on_b = tokio::spawn({
        let b = b.clone();
        async move { recv_ordered(&b).await }
    });
    let a_view = recv_within(a).await?;
    assert!(a_view.view().is_some(), "configuration precedes held actions");
    assert_eq!(a_view.configuration_seqno(), Some(Seqno::new(0)));
    let on_a = recv_ordered(a).await?;
    let on_b = on_b.await??;
    assert_eq!(on_a.payload(), b"early");
    assert_eq!(on_a.seqno(), Some(Seqno::new(1)));
    assert_eq!(on_b.seqno(), on_a.seqno());
    Ok(())
}
