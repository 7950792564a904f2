//! Metric helpers for `groupframe`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled the helpers compile to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open sessions.
pub const SESSIONS_OPEN: &str = "groupframe_sessions_open";
/// Name of the counter tracking actions handed to the group.
pub const ACTIONS_SENT: &str = "groupframe_actions_sent_total";
/// Name of the counter tracking actions surfaced by `recv`.
pub const ACTIONS_RECEIVED: &str = "groupframe_actions_received_total";
/// Name of the counter tracking fragments multicast.
pub const FRAGMENTS_EMITTED: &str = "groupframe_fragments_emitted_total";
/// Name of the counter tracking pause requests observed.
pub const FLOW_CONTROL_PAUSES: &str = "groupframe_flow_control_pauses_total";

/// Outcome label attached to received actions.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    /// The action was ordered or surfaced normally.
    Delivered,
    /// The action failed with `NotConnected` or `Restart`.
    Failed,
}

impl Outcome {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "used only for labels"))]
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Delivered => "delivered",
            Outcome::Failed => "failed",
        }
    }
}

/// Increment the open sessions gauge.
pub fn inc_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_OPEN).increment(1.0);
}

/// Decrement the open sessions gauge.
pub fn dec_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_OPEN).decrement(1.0);
}

/// Record an action fully emitted by the send path.
pub fn inc_actions_sent() {
    #[cfg(feature = "metrics")]
    counter!(ACTIONS_SENT).increment(1);
}

/// Record an action surfaced to the application.
pub fn inc_actions_received(outcome: Outcome) {
    #[cfg(feature = "metrics")]
    counter!(ACTIONS_RECEIVED, "outcome" => outcome.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record one fragment handed to the backend.
pub fn inc_fragments() {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_EMITTED).increment(1);
}

/// Record a pause request from any member.
pub fn inc_flow_control_pauses() {
    #[cfg(feature = "metrics")]
    counter!(FLOW_CONTROL_PAUSES).increment(1);
}
