//! Outbound splitting of actions into backend-sized fragments.
//!
//! Fragments are zero-copy slices of the action's [`Bytes`]. Action
//! identifiers are allocated here, so one [`Fragmenter`] must serve exactly
//! one sending session.

use std::num::NonZeroUsize;

use bytes::Bytes;

use super::{ActionId, FragmentHeader, FragmentIndex, FragmentationError};
use crate::action::ActionType;

/// Splits actions into fragments of at most `fragment_payload` bytes.
#[derive(Debug)]
pub struct Fragmenter {
    fragment_payload: NonZeroUsize,
    next_id: u64,
}

impl Fragmenter {
    #[must_use]
    pub const fn new(fragment_payload: NonZeroUsize) -> Self {
        Self {
            fragment_payload,
            next_id: 0,
        }
    }

    /// Continue numbering actions from `first`.
    #[must_use]
    pub const fn starting_at(mut self, first: ActionId) -> Self {
        self.next_id = first.get();
        self
    }

    #[must_use]
    pub const fn fragment_payload(&self) -> NonZeroUsize { self.fragment_payload }

    /// Use a new payload cap for actions fragmented from now on.
    pub fn set_max_fragment_size(&mut self, fragment_payload: NonZeroUsize) {
        self.fragment_payload = fragment_payload;
    }

    /// Split `payload` into fragments under a fresh [`ActionId`].
    ///
    /// An empty payload yields a single empty final fragment so receivers
    /// still observe the action.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::TooManyFragments`] if the fragment index
    /// would not fit in `u32`. No identifier is consumed in that case.
    ///
    /// # Panics
    ///
    /// Panics once `u64::MAX` actions have been fragmented.
    pub fn fragment(
        &mut self,
        action_type: ActionType,
        payload: Bytes,
    ) -> Result<FragmentBatch, FragmentationError> {
        let step = self.fragment_payload.get();
        let total = payload.len();
        let count = total.div_ceil(step).max(1);
        if u32::try_from(count - 1).is_err() {
            return Err(FragmentationError::TooManyFragments { count });
        }

        let action_id = ActionId::new(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .unwrap_or_else(|| panic!("action id space exhausted"));

        let declared = u64::try_from(total).unwrap_or(u64::MAX);
        let fragments = (0..count)
            .zip(0u32..)
            .map(|(ordinal, index)| {
                let start = ordinal * step;
                let end = total.min(start + step);
                let header = FragmentHeader::new(
                    action_id,
                    FragmentIndex::new(index),
                    end == total,
                    declared,
                    action_type,
                );
                FragmentFrame {
                    header,
                    payload: payload.slice(start..end),
                }
            })
            .collect();

        Ok(FragmentBatch {
            action_id,
            action_type,
            action_size: total,
            fragments,
        })
    }
}

/// One outbound fragment: header plus its slice of the action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentFrame {
    header: FragmentHeader,
    payload: Bytes,
}

impl FragmentFrame {
    #[must_use]
    pub fn header(&self) -> &FragmentHeader { &self.header }

    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }
}

/// Every fragment of one action, in emission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentBatch {
    action_id: ActionId,
    action_type: ActionType,
    action_size: usize,
    fragments: Vec<FragmentFrame>,
}

impl FragmentBatch {
    #[must_use]
    pub const fn action_id(&self) -> ActionId { self.action_id }

    #[must_use]
    pub const fn action_type(&self) -> ActionType { self.action_type }

    /// Length of the unfragmented action.
    #[must_use]
    pub const fn action_size(&self) -> usize { self.action_size }

    #[must_use]
    pub fn fragments(&self) -> &[FragmentFrame] { &self.fragments }

    /// Fragment count; never zero.
    #[expect(clippy::len_without_is_empty, reason = "a batch holds at least one fragment")]
    #[must_use]
    pub fn len(&self) -> usize { self.fragments.len() }
}
