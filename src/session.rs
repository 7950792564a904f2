//! Session façade tying fragmentation, ordering and flow control to a backend.
//!
//! A [`GroupCore`] owns one connection to a group through a [`Backend`]. It
//! moves through the [`ConnectionState`] lifecycle, exposes the exclusive
//! [`SendPath`] for everything that emits messages, and delivers completed
//! actions in group order through [`GroupCore::recv`].
//!
//! `recv` may run on its own task concurrently with the send path. Closing
//! the session cancels both: blocked calls return [`CoreError::Cancelled`].
//!
//! Each connection also runs one background task that multicasts the state
//! messages `recv` queues when a new primary group forms, so `recv` never
//! blocks on the backend.

mod recv;
mod send;
mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use log::{debug, info};
pub use send::SendPath;
pub use state::ConnectionState;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use self::{recv::RecvState, send::SendState};
#[cfg(any(test, feature = "test-helpers"))]
use crate::emission::Stepper;
use crate::{
    backend::{Backend, ConnectOptions, Multicast, View},
    config::CoreConfig,
    emission::Emitter,
    error::{CoreError, Result},
    flow_control::{FlowControlMessage, FlowGate, FlowMonitor},
    metrics,
    seqno::{GroupId, MemberId, Seqno},
    sequencer::{LastAppliedTable, Sequencer},
};

/// Resources of one `open`..`close` span.
struct Connection {
    epoch: u64,
    local: MemberId,
    multicast: Box<dyn Multicast>,
    cancel: CancellationToken,
    states: mpsc::UnboundedSender<Bytes>,
    tasks: TaskTracker,
}

struct Lifecycle {
    state: ConnectionState,
    epoch: u64,
    connection: Option<Arc<Connection>>,
}

#[derive(Default)]
struct Membership {
    view: Option<View>,
    primary: bool,
}

/// One member's session with a replication group.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use groupframe::{ActionType, CoreConfig, GroupCore, MemoryGroup};
///
/// # async fn demo() -> groupframe::Result<()> {
/// let group = MemoryGroup::new();
/// let core = GroupCore::create("node-a", "127.0.0.1:4567", Arc::new(group), CoreConfig::default())?;
/// core.open("cluster", "memory://").await?;
/// core.send_path().await.send(ActionType::Replication, &b"write-set"[..]).await?;
/// let action = loop {
///     let action = core.recv().await?;
///     if action.seqno().is_some() {
///         break action;
///     }
/// };
/// assert_eq!(action.payload(), b"write-set");
/// core.close().await;
/// # Ok(())
/// # }
/// ```
pub struct GroupCore {
    node_name: String,
    incoming_address: String,
    backend: Arc<dyn Backend>,
    config: CoreConfig,
    max_action_size: usize,
    lifecycle: Mutex<Lifecycle>,
    transition: tokio::sync::Mutex<()>,
    sender: tokio::sync::Mutex<SendState>,
    receiver: tokio::sync::Mutex<RecvState>,
    emitter: Emitter,
    flow_gate: FlowGate,
    flow_signal: Mutex<Option<FlowControlMessage>>,
    last_applied: LastAppliedTable,
    membership: Mutex<Membership>,
}

impl std::fmt::Debug for GroupCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCore")
            .field("node_name", &self.node_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for GroupCore {
    fn drop(&mut self) {
        if let Some(connection) = lock(&self.lifecycle).connection.take() {
            connection.cancel.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GroupCore {
    /// Allocate a session. No network activity takes place.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Resource`] if `config` cannot be satisfied.
    pub fn create(
        node_name: impl Into<String>,
        incoming_address: impl Into<String>,
        backend: Arc<dyn Backend>,
        config: CoreConfig,
    ) -> Result<Self> {
        let resolved = config.resolve()?;
        let node_name = node_name.into();
        let monitor = FlowMonitor::new(
            config.flow_control_limit(),
            config.flow_control_resume_factor(),
        );
        debug!(
            "created session {node_name}: packet_size={}, fragment_payload={}",
            resolved.sizing.packet_size(),
            resolved.sizing.fragment_payload()
        );
        Ok(Self {
            node_name,
            incoming_address: incoming_address.into(),
            backend,
            max_action_size: resolved.max_action_size.get(),
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Created,
                epoch: 0,
                connection: None,
            }),
            transition: tokio::sync::Mutex::new(()),
            sender: tokio::sync::Mutex::new(SendState::new(resolved.sizing)),
            receiver: tokio::sync::Mutex::new(RecvState::new(resolved.max_action_size, monitor)),
            emitter: Emitter::new(config.emission_policy()),
            flow_gate: FlowGate::new(),
            flow_signal: Mutex::new(None),
            last_applied: LastAppliedTable::default(),
            membership: Mutex::new(Membership::default()),
            config,
        })
    }

    /// Seed the action history: the next ordered action receives
    /// `seqno + 1`, starting under group identity `group`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] once the session is open or
    /// destroyed.
    pub async fn init(&self, seqno: Seqno, group: GroupId) -> Result<()> {
        let _transition = self.transition.lock().await;
        let state = self.state();
        if !state.accepts_init() {
            return Err(CoreError::InvalidState {
                operation: "init",
                state,
            });
        }
        self.receiver.lock().await.seed(Sequencer::seeded(seqno, group));
        lock(&self.lifecycle).state = ConnectionState::Initialized;
        info!("{} initialised at seqno {seqno}, group {group}", self.node_name);
        Ok(())
    }

    /// Connect to `channel` through the backend at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyOpen`] if the session is open,
    /// [`CoreError::Connect`] if the backend refuses the connection and
    /// [`CoreError::InvalidState`] after `destroy`.
    pub async fn open(&self, channel: &str, url: &str) -> Result<()> {
        let _transition = self.transition.lock().await;
        let state = self.state();
        if state == ConnectionState::Open {
            return Err(CoreError::AlreadyOpen);
        }
        if !state.accepts_open() {
            return Err(CoreError::InvalidState {
                operation: "open",
                state,
            });
        }

        let options = ConnectOptions {
            node_name: self.node_name.clone(),
            incoming_address: self.incoming_address.clone(),
            event_queue_capacity: self.config.event_queue_capacity_value(),
        };
        let link = self
            .backend
            .connect(channel, url, &options)
            .await
            .map_err(|err| CoreError::Connect(err.0))?;

        self.receiver.lock().await.attach(link.events);
        self.flow_gate.clear();
        self.last_applied.clear();
        *lock(&self.flow_signal) = None;
        *lock(&self.membership) = Membership {
            view: None,
            primary: true,
        };

        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.epoch += 1;
        let (states, queued) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection {
            epoch: lifecycle.epoch,
            local: link.local,
            multicast: link.multicast,
            cancel: CancellationToken::new(),
            states,
            tasks: TaskTracker::new(),
        });
        connection
            .tasks
            .spawn(recv::forward_states(connection.clone(), queued));
        lifecycle.connection = Some(connection);
        lifecycle.state = ConnectionState::Open;
        metrics::inc_sessions();
        info!(
            "{} opened channel {channel:?} as {} via {url}",
            self.node_name, link.local
        );
        Ok(())
    }

    /// Close the connection, cancelling blocked `send` and `recv` calls.
    ///
    /// Closing a session that is not open does nothing.
    pub async fn close(&self) {
        let _transition = self.transition.lock().await;
        let connection = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != ConnectionState::Open {
                return;
            }
            lifecycle.state = ConnectionState::Closed;
            lifecycle.connection.take()
        };
        if let Some(connection) = connection {
            connection.cancel.cancel();
            connection.tasks.close();
            connection.tasks.wait().await;
            self.receiver.lock().await.detach();
            connection.multicast.close().await;
            metrics::dec_sessions();
            info!("{} closed connection as {}", self.node_name, connection.local);
        }
        self.flow_gate.clear();
    }

    /// Release the session for good.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] while the session is open.
    pub async fn destroy(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        let mut lifecycle = lock(&self.lifecycle);
        match lifecycle.state {
            ConnectionState::Open => Err(CoreError::InvalidState {
                operation: "destroy",
                state: ConnectionState::Open,
            }),
            ConnectionState::Destroyed => Ok(()),
            _ => {
                lifecycle.state = ConnectionState::Destroyed;
                debug!("{} destroyed", self.node_name);
                Ok(())
            }
        }
    }

    /// Acquire exclusive use of the send path.
    ///
    /// All emitting operations live on the returned guard, so only one task
    /// at a time can put fragments on the wire.
    pub async fn send_path(&self) -> SendPath<'_> { SendPath::new(self, self.sender.lock().await) }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { lock(&self.lifecycle).state }

    /// Name this node was created with.
    #[must_use]
    pub fn node_name(&self) -> &str { &self.node_name }

    /// Configuration the session was created with.
    #[must_use]
    pub fn config(&self) -> &CoreConfig { &self.config }

    /// Identity the backend assigned this member, while open.
    #[must_use]
    pub fn local_member(&self) -> Option<MemberId> {
        lock(&self.lifecycle)
            .connection
            .as_ref()
            .map(|connection| connection.local)
    }

    /// Most recent view delivered by `recv`.
    #[must_use]
    pub fn view(&self) -> Option<View> { lock(&self.membership).view.clone() }

    /// Whether this member belongs to the primary component, as far as
    /// `recv` has observed.
    #[must_use]
    pub fn is_primary(&self) -> bool { lock(&self.membership).primary }

    /// Lowest last-applied watermark announced by members of the current
    /// view, if any announced one.
    #[must_use]
    pub fn commit_cut(&self) -> Option<Seqno> {
        let membership = lock(&self.membership);
        let view = membership.view.as_ref()?;
        self.last_applied.commit_cut(view.members())
    }

    /// Last-applied watermark announced by `member`.
    #[must_use]
    pub fn last_applied(&self, member: MemberId) -> Option<Seqno> { self.last_applied.get(member) }

    /// Whether some member currently asks senders to pause.
    #[must_use]
    pub fn is_flow_paused(&self) -> bool { self.flow_gate.is_paused() }

    /// Take the pause or resume signal the local receive backlog calls for.
    ///
    /// `recv` records a signal whenever the backlog crosses the configured
    /// thresholds; the application forwards it with
    /// [`SendPath::send_flow_control_message`].
    #[must_use]
    pub fn take_flow_control_signal(&self) -> Option<FlowControlMessage> {
        lock(&self.flow_signal).take()
    }

    /// Handle for releasing fragments one at a time, when the session was
    /// configured with [`EmissionPolicy::Stepped`](crate::EmissionPolicy).
    #[cfg(any(test, feature = "test-helpers"))]
    #[must_use]
    pub fn stepper(&self) -> Option<Stepper> { self.emitter.stepper() }

    fn connection(&self, operation: &'static str) -> Result<Arc<Connection>> {
        let lifecycle = lock(&self.lifecycle);
        match (lifecycle.state, lifecycle.connection.as_ref()) {
            (ConnectionState::Open, Some(connection)) => Ok(connection.clone()),
            (ConnectionState::Closed, _) => Err(CoreError::Cancelled),
            (state, _) => Err(CoreError::InvalidState { operation, state }),
        }
    }
}
