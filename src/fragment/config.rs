//! Packet-size arithmetic for outbound fragmentation.

use std::num::NonZeroUsize;

use crate::{error::CoreError, message::fragment_overhead};

/// Smallest action payload a fragment must be able to carry.
pub const MIN_FRAGMENT_PAYLOAD: usize = 1;

/// Fragment payload budget derived from a requested on-wire packet size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentSizing {
    packet_size: usize,
    fragment_payload: NonZeroUsize,
}

impl FragmentSizing {
    /// Derive the fragment payload cap for `packet_size`.
    ///
    /// The cap is the packet size minus the fixed message and fragment header
    /// overhead.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PacketSizeTooSmall`] when the packet cannot carry
    /// the headers plus [`MIN_FRAGMENT_PAYLOAD`] bytes.
    pub fn for_packet_size(packet_size: usize) -> Result<Self, CoreError> {
        let minimum = Self::minimum_packet_size();
        let fragment_payload = packet_size
            .checked_sub(fragment_overhead().get())
            .filter(|available| *available >= MIN_FRAGMENT_PAYLOAD)
            .and_then(NonZeroUsize::new)
            .ok_or(CoreError::PacketSizeTooSmall {
                requested: packet_size,
                minimum,
            })?;
        Ok(Self {
            packet_size,
            fragment_payload,
        })
    }

    /// Smallest packet size that still carries a payload byte.
    #[must_use]
    pub fn minimum_packet_size() -> usize { fragment_overhead().get() + MIN_FRAGMENT_PAYLOAD }

    /// Packet size the sizing was derived from.
    #[must_use]
    pub const fn packet_size(&self) -> usize { self.packet_size }

    /// Maximum action payload bytes per fragment.
    #[must_use]
    pub const fn fragment_payload(&self) -> NonZeroUsize { self.fragment_payload }

    /// Number of fragments an action of `action_size` bytes needs.
    #[must_use]
    pub fn fragment_count(&self, action_size: usize) -> usize {
        action_size.div_ceil(self.fragment_payload.get()).max(1)
    }
}
