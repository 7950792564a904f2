//! Contract between the core and a group-messaging backend.
//!
//! A backend provides totally ordered multicast of individually sized
//! messages plus membership notifications. The core never sees sockets or
//! retransmission; it only calls [`Backend::connect`], pushes encoded
//! messages through [`Multicast`], and consumes [`BackendEvent`]s in delivery
//! order.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::seqno::{GroupId, MemberId};

pub mod memory;

pub use memory::MemoryGroup;

/// Errors a backend reports when multicasting a message.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The message was refused transiently; the same message may be retried.
    #[error("backend refused the message; retry")]
    Retry,
    /// This member is no longer part of the primary component.
    #[error("not connected to the primary component")]
    NotConnected,
    /// The link was closed.
    #[error("backend link closed")]
    Closed,
}

/// Error returned when a backend cannot establish a group connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ConnectError(pub String);

/// Local details handed to the backend when connecting.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Human-readable node name.
    pub node_name: String,
    /// Address other members use to reach this node.
    pub incoming_address: String,
    /// Capacity of the event queue the backend should allocate.
    pub event_queue_capacity: usize,
}

/// Membership of a group epoch as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
    group: GroupId,
    primary: bool,
    members: Vec<MemberId>,
}

impl View {
    /// Construct a view.
    #[must_use]
    pub fn new(group: GroupId, primary: bool, members: Vec<MemberId>) -> Self {
        Self {
            group,
            primary,
            members,
        }
    }

    /// Identity of the epoch.
    #[must_use]
    pub const fn group(&self) -> GroupId { self.group }

    /// Whether this view is a primary component.
    #[must_use]
    pub const fn is_primary(&self) -> bool { self.primary }

    /// Members of the view.
    #[must_use]
    pub fn members(&self) -> &[MemberId] { &self.members }

    /// Whether `member` belongs to the view.
    #[must_use]
    pub fn contains(&self, member: MemberId) -> bool { self.members.contains(&member) }
}

/// Event delivered by a backend, in total order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    /// A message multicast by `sender`.
    Message {
        /// Originating member.
        sender: MemberId,
        /// Encoded message bytes.
        payload: Bytes,
    },
    /// A new membership epoch.
    View(View),
    /// `member` was lost without a new epoch having formed yet.
    MemberLost(MemberId),
}

/// Outbound half of an established backend connection.
#[async_trait]
pub trait Multicast: Send + Sync {
    /// Multicast one message to the group.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] when the backend refuses the message.
    async fn multicast(&self, message: Bytes) -> Result<(), SendError>;

    /// Leave the group. Must be idempotent.
    async fn close(&self);
}

/// Established connection returned by [`Backend::connect`].
pub struct BackendLink {
    /// Identity the backend assigned to this member.
    pub local: MemberId,
    /// Outbound half.
    pub multicast: Box<dyn Multicast>,
    /// Inbound events in delivery order.
    pub events: mpsc::Receiver<BackendEvent>,
}

impl std::fmt::Debug for BackendLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLink")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

/// Group-messaging backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Join `channel` at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] when the backend is unreachable or rejects
    /// the URL.
    async fn connect(
        &self,
        channel: &str,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<BackendLink, ConnectError>;
}
