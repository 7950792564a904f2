//! In-process group backend with a single global delivery order.
//!
//! [`MemoryGroup`] connects any number of sessions inside one process. Every
//! multicast and view change runs under one ordering lock, so each member
//! observes the same total order. A broadcast first reserves room in every
//! member's queue and only then delivers, so a cancelled multicast reaches
//! either all members or none. Membership itself sits behind a separate
//! lock that is never held across an await, so a leaving member never waits
//! for the others to drain their queues. Joins and leaves mint a new primary
//! [`View`]. Fault-injection helpers let tests partition or evict members and
//! make the next multicasts fail with [`SendError::Retry`].

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use tokio::sync::mpsc;

use super::{
    Backend,
    BackendEvent,
    BackendLink,
    ConnectError,
    ConnectOptions,
    Multicast,
    SendError,
    View,
};
use crate::seqno::{GroupId, MemberId};

/// URL scheme accepted by [`MemoryGroup`].
pub const MEMORY_SCHEME: &str = "memory://";

type EventSender = mpsc::Sender<BackendEvent>;

struct GroupState {
    channel: Option<String>,
    next_member: u64,
    group: GroupId,
    members: BTreeMap<MemberId, EventSender>,
    refuse: usize,
    delivered: usize,
}

impl GroupState {
    fn new() -> Self {
        Self {
            channel: None,
            next_member: 1,
            group: GroupId::NIL,
            members: BTreeMap::new(),
            refuse: 0,
            delivered: 0,
        }
    }

    fn targets(&self) -> Vec<EventSender> { self.members.values().cloned().collect() }

    /// Mint a view of the current members, returning it with its recipients.
    fn next_view(&mut self) -> Option<(BackendEvent, Vec<EventSender>)> {
        if self.members.is_empty() {
            self.channel = None;
            return None;
        }
        self.group = GroupId::random();
        let view = View::new(self.group, true, self.members.keys().copied().collect());
        info!(
            "memory group installed view: group={}, members={}",
            self.group,
            view.members().len()
        );
        Some((BackendEvent::View(view), self.targets()))
    }
}

/// Reserve room for one event in every target that still has a queue.
///
/// Nothing is delivered until the permits are used, so dropping this future
/// part-way leaves every queue untouched.
async fn reserve_all(targets: &[EventSender]) -> Vec<mpsc::Permit<'_, BackendEvent>> {
    let mut permits = Vec::with_capacity(targets.len());
    for tx in targets {
        // A member whose session dropped its queue simply misses events.
        if let Ok(permit) = tx.reserve().await {
            permits.push(permit);
        }
    }
    permits
}

fn deliver(permits: Vec<mpsc::Permit<'_, BackendEvent>>, event: &BackendEvent) {
    for permit in permits {
        permit.send(event.clone());
    }
}

async fn broadcast(targets: &[EventSender], event: &BackendEvent) {
    deliver(reserve_all(targets).await, event);
}

/// Hand a departing member its final event, then drop its queue sender.
fn send_final(member: MemberId, tx: EventSender, event: BackendEvent) {
    tokio::spawn(async move {
        if tx.send(event).await.is_err() {
            debug!("{member} dropped its queue before its final event");
        }
    });
}

struct Shared {
    state: Mutex<GroupState>,
    order: tokio::sync::Mutex<()>,
}

/// Shared handle to an in-process group.
#[derive(Clone)]
pub struct MemoryGroup {
    shared: Arc<Shared>,
}

impl Default for MemoryGroup {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for MemoryGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGroup").finish_non_exhaustive()
    }
}

impl MemoryGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(GroupState::new()),
                order: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Members of the current primary view.
    #[must_use]
    pub fn members(&self) -> Vec<MemberId> { self.state().members.keys().copied().collect() }

    /// Identity of the current primary view.
    #[must_use]
    pub fn group_id(&self) -> GroupId { self.state().group }

    /// Number of messages delivered so far.
    #[must_use]
    pub fn delivered(&self) -> usize { self.state().delivered }

    /// Refuse the next `count` multicasts with [`SendError::Retry`].
    pub fn refuse_next(&self, count: usize) { self.state().refuse = count; }

    /// Cut `member` off into a non-primary component of its own.
    ///
    /// The member receives a non-primary view and then sees its event queue
    /// close; the remaining members receive a new primary view without it.
    /// Multicasts from the member fail with [`SendError::NotConnected`]
    /// afterwards.
    pub async fn partition(&self, member: MemberId) {
        let _order = self.shared.order.lock().await;
        let (tx, view) = {
            let mut state = self.state();
            let Some(tx) = state.members.remove(&member) else {
                return;
            };
            (tx, state.next_view())
        };
        debug!("partitioning {member} from memory group");
        let isolated = View::new(GroupId::random(), false, vec![member]);
        send_final(member, tx, BackendEvent::View(isolated));
        if let Some((event, targets)) = view {
            broadcast(&targets, &event).await;
        }
    }

    /// Remove `member` abruptly.
    ///
    /// Every member, the evicted one included, first learns of the loss via
    /// [`BackendEvent::MemberLost`]; the survivors then receive a new view.
    /// The evicted member's event queue closes after the loss notice.
    pub async fn evict(&self, member: MemberId) {
        let _order = self.shared.order.lock().await;
        let (tx, survivors, view) = {
            let mut state = self.state();
            let Some(tx) = state.members.remove(&member) else {
                return;
            };
            let survivors = state.targets();
            (tx, survivors, state.next_view())
        };
        debug!("evicting {member} from memory group");
        let lost = BackendEvent::MemberLost(member);
        send_final(member, tx, lost.clone());
        broadcast(&survivors, &lost).await;
        if let Some((event, targets)) = view {
            broadcast(&targets, &event).await;
        }
    }

    async fn multicast_from(&self, sender: MemberId, payload: Bytes) -> Result<(), SendError> {
        let _order = self.shared.order.lock().await;
        let targets = {
            let mut state = self.state();
            if !state.members.contains_key(&sender) {
                return Err(SendError::NotConnected);
            }
            if state.refuse > 0 {
                state.refuse -= 1;
                return Err(SendError::Retry);
            }
            state.targets()
        };
        let permits = reserve_all(&targets).await;
        self.state().delivered += 1;
        deliver(permits, &BackendEvent::Message { sender, payload });
        Ok(())
    }

    async fn install_view(&self) {
        let _order = self.shared.order.lock().await;
        let view = self.state().next_view();
        if let Some((event, targets)) = view {
            broadcast(&targets, &event).await;
        }
    }

    /// Drop `member` at once; the survivors' view follows asynchronously.
    fn leave(&self, member: MemberId) {
        let remaining = {
            let mut state = self.state();
            if state.members.remove(&member).is_none() {
                return;
            }
            if state.members.is_empty() {
                state.channel = None;
            }
            state.members.len()
        };
        debug!("{member} left memory group");
        if remaining > 0 {
            let group = self.clone();
            tokio::spawn(async move { group.install_view().await });
        }
    }
}

#[async_trait]
impl Backend for MemoryGroup {
    async fn connect(
        &self,
        channel: &str,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<BackendLink, ConnectError> {
        if !url.starts_with(MEMORY_SCHEME) {
            return Err(ConnectError(format!(
                "unsupported url {url:?}; expected {MEMORY_SCHEME}"
            )));
        }
        if options.event_queue_capacity == 0 {
            return Err(ConnectError("event queue capacity must be non-zero".into()));
        }

        let _order = self.shared.order.lock().await;
        let (local, events, view) = {
            let mut state = self.state();
            match state.channel.clone() {
                Some(existing) if existing != channel => {
                    return Err(ConnectError(format!(
                        "memory group serves channel {existing:?}, not {channel:?}"
                    )));
                }
                Some(_) => {}
                None => state.channel = Some(channel.to_owned()),
            }

            let local = MemberId::new(state.next_member);
            state.next_member += 1;
            let (tx, events) = mpsc::channel(options.event_queue_capacity);
            state.members.insert(local, tx);
            (local, events, state.next_view())
        };
        info!(
            "{} joined memory group channel {channel:?} as {local}",
            options.node_name
        );
        if let Some((event, targets)) = view {
            broadcast(&targets, &event).await;
        }

        Ok(BackendLink {
            local,
            multicast: Box::new(MemoryLink {
                group: self.clone(),
                member: local,
                closed: AtomicBool::new(false),
            }),
            events,
        })
    }
}

struct MemoryLink {
    group: MemoryGroup,
    member: MemberId,
    closed: AtomicBool,
}

#[async_trait]
impl Multicast for MemoryLink {
    async fn multicast(&self, message: Bytes) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        self.group.multicast_from(self.member, message).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.group.leave(self.member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ConnectOptions {
        ConnectOptions {
            node_name: "node".into(),
            incoming_address: "127.0.0.1:4567".into(),
            event_queue_capacity: 16,
        }
    }

    async fn next_view(link: &mut BackendLink) -> View {
        match link.events.recv().await {
            Some(BackendEvent::View(view)) => view,
            other => panic!("expected a view, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_foreign_urls() {
        let group = MemoryGroup::new();
        let err = group
            .connect("c1", "gcomm://10.0.0.1", &options())
            .await
            .expect_err("foreign scheme must be refused");
        assert!(err.0.contains("unsupported url"));
    }

    #[tokio::test]
    async fn rejects_second_channel() {
        let group = MemoryGroup::new();
        let _first = group
            .connect("c1", "memory://", &options())
            .await
            .expect("first connect");
        assert!(group.connect("c2", "memory://", &options()).await.is_err());
    }

    #[tokio::test]
    async fn members_share_one_delivery_order() {
        let group = MemoryGroup::new();
        let mut a = group.connect("c1", "memory://", &options()).await.expect("a");
        let mut b = group.connect("c1", "memory://", &options()).await.expect("b");
        assert_eq!(next_view(&mut a).await.members(), &[a.local]);
        let joined = next_view(&mut a).await;
        assert_eq!(next_view(&mut b).await, joined);
        assert!(joined.is_primary());

        a.multicast.multicast(Bytes::from_static(b"one")).await.expect("a sends");
        b.multicast.multicast(Bytes::from_static(b"two")).await.expect("b sends");

        for link in [&mut a, &mut b] {
            let mut seen = Vec::new();
            for _ in 0..2 {
                match link.events.recv().await {
                    Some(BackendEvent::Message { payload, .. }) => seen.push(payload),
                    other => panic!("expected message, got {other:?}"),
                }
            }
            assert_eq!(seen, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
        }
        assert_eq!(group.delivered(), 2);
    }

    #[tokio::test]
    async fn refused_multicasts_report_retry() {
        let group = MemoryGroup::new();
        let link = group.connect("c1", "memory://", &options()).await.expect("link");
        group.refuse_next(1);
        assert_eq!(
            link.multicast.multicast(Bytes::new()).await,
            Err(SendError::Retry)
        );
        assert_eq!(link.multicast.multicast(Bytes::new()).await, Ok(()));
    }

    #[tokio::test]
    async fn partitioned_member_sees_non_primary_view() {
        let group = MemoryGroup::new();
        let mut a = group.connect("c1", "memory://", &options()).await.expect("a");
        let _b = group.connect("c1", "memory://", &options()).await.expect("b");
        next_view(&mut a).await;
        next_view(&mut a).await;

        group.partition(a.local).await;
        let view = next_view(&mut a).await;
        assert!(!view.is_primary());
        assert_eq!(
            a.multicast.multicast(Bytes::new()).await,
            Err(SendError::NotConnected)
        );
        assert!(a.events.recv().await.is_none(), "partitioned queue must close");
    }

    #[tokio::test]
    async fn evicted_member_queue_closes_after_loss_notice() {
        let group = MemoryGroup::new();
        let mut a = group.connect("c1", "memory://", &options()).await.expect("a");
        let mut b = group.connect("c1", "memory://", &options()).await.expect("b");
        next_view(&mut a).await;
        next_view(&mut a).await;
        next_view(&mut b).await;

        group.evict(a.local).await;
        assert!(matches!(
            a.events.recv().await,
            Some(BackendEvent::MemberLost(member)) if member == a.local
        ));
        assert!(a.events.recv().await.is_none(), "evicted queue must close");
        assert!(matches!(
            b.events.recv().await,
            Some(BackendEvent::MemberLost(member)) if member == a.local
        ));
        assert_eq!(next_view(&mut b).await.members(), &[b.local]);
        assert_eq!(group.members(), vec![b.local]);
    }

    #[tokio::test]
    async fn leaving_does_not_wait_for_full_queues() {
        let group = MemoryGroup::new();
        let small = ConnectOptions {
            event_queue_capacity: 1,
            ..options()
        };
        let mut a = group.connect("c1", "memory://", &small).await.expect("a");
        next_view(&mut a).await;
        let _b = group.connect("c1", "memory://", &small).await.expect("b");

        let blocked = tokio::spawn({
            let group = group.clone();
            let member = a.local;
            async move { group.multicast_from(member, Bytes::from_static(b"x")).await }
        });
        tokio::task::yield_now().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), a.multicast.close())
            .await
            .expect("close must not wait on other members");
        assert_eq!(group.members().len(), 1);
        blocked.abort();
    }

    #[tokio::test]
    async fn cancelled_broadcast_delivers_nothing() {
        let group = MemoryGroup::new();
        let small = ConnectOptions {
            event_queue_capacity: 1,
            ..options()
        };
        let mut a = group.connect("c1", "memory://", &options()).await.expect("a");
        let mut b = group.connect("c1", "memory://", &small).await.expect("b");
        next_view(&mut a).await;
        next_view(&mut a).await;

        let send = a.multicast.multicast(Bytes::from_static(b"lost"));
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), send)
                .await
                .is_err(),
            "b's queue is full"
        );
        next_view(&mut b).await;
        assert_eq!(group.delivered(), 0);
        assert!(a.events.try_recv().is_err(), "a must not see a partial broadcast");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_installs_view() {
        let group = MemoryGroup::new();
        let a = group.connect("c1", "memory://", &options()).await.expect("a");
        let mut b = group.connect("c1", "memory://", &options()).await.expect("b");
        next_view(&mut b).await;

        a.multicast.close().await;
        a.multicast.close().await;
        assert_eq!(next_view(&mut b).await.members(), &[b.local]);
        assert_eq!(
            a.multicast.multicast(Bytes::new()).await,
            Err(SendError::Closed)
        );
    }
}
