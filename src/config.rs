//! Session configuration.
//!
//! [`CoreConfig`] collects the tunables of a [`GroupCore`](crate::GroupCore).
//! It implements `serde` traits so hosts can embed it in their own
//! configuration files, and offers builder-style setters for code.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::{emission::EmissionPolicy, error::CoreError, fragment::FragmentSizing};

/// Default on-wire packet size.
pub const DEFAULT_PACKET_SIZE: usize = 64_500;
/// Default cap on a reassembled action.
pub const DEFAULT_MAX_ACTION_SIZE: usize = 0x7FFF_FFFF;
/// Default capacity of the backend event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;
/// Default receive-queue length above which a pause is requested.
pub const DEFAULT_FLOW_CONTROL_LIMIT: u64 = 16;
/// Default fraction of the limit at which a resume is sent.
pub const DEFAULT_FLOW_CONTROL_RESUME_FACTOR: f64 = 0.5;

/// Tunables for a [`GroupCore`](crate::GroupCore).
///
/// # Examples
///
/// ```
/// use groupframe::CoreConfig;
///
/// let config = CoreConfig::default()
///     .packet_size(1400)
///     .event_queue_capacity(64);
/// assert_eq!(config.packet_size_value(), 1400);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    packet_size: usize,
    max_action_size: usize,
    event_queue_capacity: usize,
    flow_control_limit: u64,
    flow_control_resume_factor: f64,
    emission: EmissionPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            max_action_size: DEFAULT_MAX_ACTION_SIZE,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            flow_control_limit: DEFAULT_FLOW_CONTROL_LIMIT,
            flow_control_resume_factor: DEFAULT_FLOW_CONTROL_RESUME_FACTOR,
            emission: EmissionPolicy::default(),
        }
    }
}

impl CoreConfig {
    /// Set the initial on-wire packet size.
    #[must_use]
    pub fn packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the cap on reassembled and sent actions.
    #[must_use]
    pub fn max_action_size(mut self, max_action_size: usize) -> Self {
        self.max_action_size = max_action_size;
        self
    }

    /// Set the capacity of the backend event queue.
    #[must_use]
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Set the flow-control thresholds.
    #[must_use]
    pub fn flow_control(mut self, limit: u64, resume_factor: f64) -> Self {
        self.flow_control_limit = limit;
        self.flow_control_resume_factor = resume_factor;
        self
    }

    /// Choose how fragments are emitted.
    #[must_use]
    pub fn emission(mut self, policy: EmissionPolicy) -> Self {
        self.emission = policy;
        self
    }

    /// Configured packet size.
    #[must_use]
    pub const fn packet_size_value(&self) -> usize { self.packet_size }

    /// Configured event queue capacity.
    #[must_use]
    pub const fn event_queue_capacity_value(&self) -> usize { self.event_queue_capacity }

    /// Configured flow-control limit.
    #[must_use]
    pub const fn flow_control_limit(&self) -> u64 { self.flow_control_limit }

    /// Configured flow-control resume factor.
    #[must_use]
    pub const fn flow_control_resume_factor(&self) -> f64 { self.flow_control_resume_factor }

    /// Configured emission policy.
    #[must_use]
    pub const fn emission_policy(&self) -> EmissionPolicy { self.emission }

    /// Check the configuration and derive the resources it implies.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Resource`] when a setting cannot be satisfied.
    pub(crate) fn resolve(&self) -> Result<ResolvedConfig, CoreError> {
        let sizing = FragmentSizing::for_packet_size(self.packet_size)
            .map_err(|err| CoreError::Resource(err.to_string()))?;
        let max_action_size = NonZeroUsize::new(self.max_action_size)
            .ok_or_else(|| CoreError::Resource("max action size must be non-zero".into()))?;
        if self.event_queue_capacity == 0 {
            return Err(CoreError::Resource(
                "event queue capacity must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.flow_control_resume_factor) {
            return Err(CoreError::Resource(format!(
                "flow control resume factor {} is outside [0, 1]",
                self.flow_control_resume_factor
            )));
        }
        Ok(ResolvedConfig {
            sizing,
            max_action_size,
        })
    }
}

/// Derived values validated by [`CoreConfig::resolve`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolvedConfig {
    pub(crate) sizing: FragmentSizing,
    pub(crate) max_action_size: NonZeroUsize,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_resolve() {
        let resolved = CoreConfig::default().resolve().expect("defaults are valid");
        assert_eq!(resolved.sizing.packet_size(), DEFAULT_PACKET_SIZE);
    }

    #[rstest]
    #[case(CoreConfig::default().packet_size(4))]
    #[case(CoreConfig::default().max_action_size(0))]
    #[case(CoreConfig::default().event_queue_capacity(0))]
    #[case(CoreConfig::default().flow_control(8, 1.5))]
    fn invalid_settings_are_resource_errors(#[case] config: CoreConfig) {
        assert!(matches!(config.resolve(), Err(CoreError::Resource(_))));
    }
}
