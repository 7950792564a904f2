//! Helpers that open sessions on a shared [`MemoryGroup`].

use std::{sync::Arc, time::Duration};

use groupframe::{
    ActionType,
    CoreConfig,
    CoreError,
    GroupCore,
    MemberId,
    MemoryGroup,
    ReceivedAction,
};
use tokio::task::JoinSet;

/// Channel every helper joins.
pub const CHANNEL: &str = "c1";
/// URL accepted by [`MemoryGroup`].
pub const MEMORY_URL: &str = "memory://";
/// Upper bound on any single wait in tests.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Result type used by test helpers.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Create and open one session named `name` on `group`.
///
/// # Errors
///
/// Propagates any failure from `create` or `open`.
pub async fn open_session(
    group: &MemoryGroup,
    name: &str,
    config: CoreConfig,
) -> Result<Arc<GroupCore>, CoreError> {
    let core = GroupCore::create(name, "127.0.0.1:0", Arc::new(group.clone()), config)?;
    core.open(CHANNEL, MEMORY_URL).await?;
    Ok(Arc::new(core))
}

/// Open `count` sessions on `group` and wait until each has seen the view
/// containing all of them.
///
/// The sessions receive concurrently: a new primary view is only delivered
/// once every member has announced its ordering state from `recv`.
///
/// # Errors
///
/// Propagates failures from opening or receiving.
pub async fn open_sessions(
    group: &MemoryGroup,
    count: usize,
    config: CoreConfig,
) -> TestResult<Vec<Arc<GroupCore>>> {
    let mut sessions = Vec::with_capacity(count);
    for index in 0..count {
        sessions.push(open_session(group, &format!("node-{index}"), config.clone()).await?);
    }
    wait_all_for_members(&sessions).await?;
    Ok(sessions)
}

/// Receive on every session at once until each has seen the view listing
/// exactly the members of `sessions`.
///
/// # Errors
///
/// Fails on a receive error or if some session sees no such view in time.
pub async fn wait_all_for_members(sessions: &[Arc<GroupCore>]) -> TestResult {
    let members: Vec<MemberId> = sessions
        .iter()
        .filter_map(|session| session.local_member())
        .collect();
    let mut waits = JoinSet::new();
    for session in sessions {
        let (session, members) = (session.clone(), members.clone());
        waits.spawn(async move { wait_for_members(&session, &members).await });
    }
    while let Some(outcome) = waits.join_next().await {
        outcome??;
    }
    Ok(())
}

/// Receive until a configuration action lists exactly `members`, returning
/// that action.
///
/// # Errors
///
/// Fails on a receive error or if no such view arrives in time.
pub async fn wait_for_members(core: &GroupCore, members: &[MemberId]) -> TestResult<ReceivedAction> {
    loop {
        let action = recv_within(core).await?;
        if action
            .view()
            .is_some_and(|view| view.members() == members)
        {
            return Ok(action);
        }
    }
}

/// Receive one action, failing after [`RECV_TIMEOUT`].
///
/// # Errors
///
/// Returns the receive error or a timeout error.
pub async fn recv_within(core: &GroupCore) -> TestResult<ReceivedAction> {
    Ok(tokio::time::timeout(RECV_TIMEOUT, core.recv()).await??)
}

/// Receive the next action that is neither a view nor a flow-control signal.
///
/// # Errors
///
/// Returns the receive error or a timeout error.
pub async fn recv_ordered(core: &GroupCore) -> TestResult<ReceivedAction> {
    loop {
        let action = recv_within(core).await?;
        if !matches!(
            action.action_type(),
            ActionType::Configuration | ActionType::FlowControl
        ) {
            return Ok(action);
        }
    }
}
