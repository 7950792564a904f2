//! Receive-pressure signalling between group members.
//!
//! A member whose receive queue grows too long broadcasts a pause; once it
//! drains it broadcasts a resume. Every sender keeps a [`FlowGate`] recording
//! which members currently ask for a pause and waits on it before starting a
//! new action. [`FlowMonitor`] provides the receiver side with hysteresis so
//! signals are only emitted on threshold crossings.
//!
//! Flow-control messages bypass fragmentation and ordering entirely: they are
//! single backend messages and never receive a sequence number.

use std::collections::BTreeSet;

use bincode::{Decode, Encode};
use tokio::sync::watch;
use tracing::debug;

use crate::seqno::MemberId;

/// Signal carried by a flow-control message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct FlowControlMessage {
    pause: bool,
    queue_len: u64,
}

impl FlowControlMessage {
    /// Ask the group to pause; `queue_len` is the sender's receive backlog.
    #[must_use]
    pub const fn pause(queue_len: u64) -> Self {
        Self {
            pause: true,
            queue_len,
        }
    }

    /// Tell the group the backlog has drained.
    #[must_use]
    pub const fn resume(queue_len: u64) -> Self {
        Self {
            pause: false,
            queue_len,
        }
    }

    /// Whether this message asks senders to pause.
    #[must_use]
    pub const fn is_pause(&self) -> bool { self.pause }

    /// Receive backlog reported by the sender.
    #[must_use]
    pub const fn queue_len(&self) -> u64 { self.queue_len }
}

/// Sender-side record of members currently asking for a pause.
///
/// Updated by the receive path, awaited by the send path.
#[derive(Debug)]
pub struct FlowGate {
    paused_by: watch::Sender<BTreeSet<MemberId>>,
}

impl Default for FlowGate {
    fn default() -> Self { Self::new() }
}

impl FlowGate {
    /// Create an open gate.
    #[must_use]
    pub fn new() -> Self {
        let (paused_by, _) = watch::channel(BTreeSet::new());
        Self { paused_by }
    }

    /// Apply a signal received from `member`. Returns true if the gate changed
    /// between open and closed.
    pub fn apply(&self, member: MemberId, message: FlowControlMessage) -> bool {
        let was_paused = self.is_paused();
        self.paused_by.send_modify(|paused| {
            if message.is_pause() {
                paused.insert(member);
            } else {
                paused.remove(&member);
            }
        });
        let changed = was_paused != self.is_paused();
        if changed {
            debug!(
                %member,
                pause = message.is_pause(),
                queue_len = message.queue_len(),
                "flow control gate toggled"
            );
        }
        changed
    }

    /// Forget any pause requested by `member`.
    pub fn forget(&self, member: MemberId) {
        self.paused_by.send_if_modified(|paused| paused.remove(&member));
    }

    /// Forget pauses from members not listed in `members`.
    pub fn retain(&self, members: &[MemberId]) {
        self.paused_by.send_if_modified(|paused| {
            let before = paused.len();
            paused.retain(|member| members.contains(member));
            before != paused.len()
        });
    }

    /// Open the gate unconditionally.
    pub fn clear(&self) {
        self.paused_by.send_if_modified(|paused| {
            let modified = !paused.is_empty();
            paused.clear();
            modified
        });
    }

    /// Whether any member currently asks for a pause.
    #[must_use]
    pub fn is_paused(&self) -> bool { !self.paused_by.borrow().is_empty() }

    /// Members currently asking for a pause.
    #[must_use]
    pub fn paused_by(&self) -> Vec<MemberId> { self.paused_by.borrow().iter().copied().collect() }

    /// Wait until no member asks for a pause.
    pub async fn wait_open(&self) {
        let mut rx = self.paused_by.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(BTreeSet::is_empty).await;
    }
}

/// Receiver-side hysteresis over the local receive-queue length.
#[derive(Clone, Copy, Debug)]
pub struct FlowMonitor {
    limit: u64,
    resume_at: u64,
    paused: bool,
}

impl FlowMonitor {
    /// Pause above `limit`; resume at or below `limit * resume_factor`.
    #[must_use]
    pub fn new(limit: u64, resume_factor: f64) -> Self {
        let factor = resume_factor.clamp(0.0, 1.0);
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss,
            reason = "factor is clamped to [0, 1] so the product fits in u64"
        )]
        let resume_at = (limit as f64 * factor).floor() as u64;
        Self {
            limit,
            resume_at,
            paused: false,
        }
    }

    /// Record the current queue length, returning the signal to broadcast if
    /// a threshold was crossed.
    pub fn observe(&mut self, queue_len: u64) -> Option<FlowControlMessage> {
        if !self.paused && queue_len > self.limit {
            self.paused = true;
            return Some(FlowControlMessage::pause(queue_len));
        }
        if self.paused && queue_len <= self.resume_at {
            self.paused = false;
            return Some(FlowControlMessage::resume(queue_len));
        }
        None
    }

    /// Whether the last signal produced was a pause.
    #[must_use]
    pub const fn is_paused(&self) -> bool { self.paused }

    /// Queue length above which a pause is requested.
    #[must_use]
    pub const fn limit(&self) -> u64 { self.limit }

    /// Queue length at or below which a resume is sent.
    #[must_use]
    pub const fn resume_at(&self) -> u64 { self.resume_at }
}
