//! Inbound helper that stitches fragments back into complete actions.
//!
//! [`Defragmenter`] mirrors the outbound [`Fragmenter`](crate::fragment::Fragmenter).
//! Each member sends one action at a time, so partial actions are keyed by the
//! sending [`MemberId`]; fragments from different senders may interleave
//! freely. Ordering within a sender is enforced via
//! [`FragmentSeries`](crate::fragment::FragmentSeries), declared sizes are
//! checked against a configurable cap, and partial actions are discarded
//! whenever membership changes affect their sender.

use std::{
    collections::{HashMap, hash_map::Entry},
    num::NonZeroUsize,
};

use bytes::{Bytes, BytesMut};
use log::warn;

use super::{ActionId, FragmentHeader, FragmentSeries, FragmentStatus, ReassemblyError};
use crate::{action::ActionType, seqno::MemberId};

#[derive(Debug)]
struct PartialAction {
    series: FragmentSeries,
    action_type: ActionType,
    declared: u64,
    buffer: BytesMut,
}

impl PartialAction {
    fn abandon(self, sender: MemberId) -> AbandonedAction {
        AbandonedAction {
            sender,
            action_id: self.series.action_id(),
            action_type: self.action_type,
            declared_size: self.declared,
            received: self.buffer.len(),
        }
    }
}

/// Fully reassembled action payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassembledAction {
    sender: MemberId,
    action_id: ActionId,
    action_type: ActionType,
    payload: Bytes,
}

impl ReassembledAction {
    /// Member that sent the action.
    #[must_use]
    pub const fn sender(&self) -> MemberId { self.sender }

    /// Sender-local identifier shared by the fragments of this action.
    #[must_use]
    pub const fn action_id(&self) -> ActionId { self.action_id }

    /// Type of the action.
    #[must_use]
    pub const fn action_type(&self) -> ActionType { self.action_type }

    /// Borrow the reassembled payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the action, returning the owned payload bytes.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }
}

/// Partial action discarded before completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbandonedAction {
    /// Member that was sending the action.
    pub sender: MemberId,
    /// Sender-local identifier of the action.
    pub action_id: ActionId,
    /// Type of the action.
    pub action_type: ActionType,
    /// Size the sender declared for the whole action.
    pub declared_size: u64,
    /// Bytes received before the action was discarded.
    pub received: usize,
}

/// Per-sender fragment reassembler.
#[derive(Debug)]
pub struct Defragmenter {
    max_action_size: NonZeroUsize,
    buffers: HashMap<MemberId, PartialAction>,
}

impl Defragmenter {
    /// Create a reassembler that refuses actions larger than `max_action_size`.
    #[must_use]
    pub fn new(max_action_size: NonZeroUsize) -> Self {
        Self {
            max_action_size,
            buffers: HashMap::new(),
        }
    }

    /// Process a fragment received from `sender`.
    ///
    /// Returns `Ok(Some(_))` when the fragment completes the action and
    /// `Ok(None)` while more fragments are required. A first fragment from a
    /// sender that still has a partial action replaces it: the sender has
    /// abandoned the earlier action.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError`] when a fragment arrives out of order, has no
    /// preceding first fragment, or violates the declared or configured size.
    /// Any partial action for the sender is discarded in that case.
    pub fn push(
        &mut self,
        sender: MemberId,
        header: FragmentHeader,
        payload: &[u8],
    ) -> Result<Option<ReassembledAction>, ReassemblyError> {
        if header.fragment_index().is_first() {
            return self.start(sender, header, payload);
        }

        let Entry::Occupied(mut occupied) = self.buffers.entry(sender) else {
            return Err(ReassemblyError::MissingStart {
                sender,
                action_id: header.action_id(),
                index: header.fragment_index(),
            });
        };

        let status = match occupied.get_mut().series.accept(header) {
            Ok(status) => status,
            Err(source) => {
                occupied.remove();
                return Err(ReassemblyError::Fragment { sender, source });
            }
        };

        let partial = occupied.get_mut();
        let received = partial.buffer.len() + payload.len();
        if received as u64 > partial.declared {
            let declared = partial.declared;
            occupied.remove();
            return Err(ReassemblyError::SizeMismatch {
                sender,
                action_id: header.action_id(),
                declared,
                received,
            });
        }
        partial.buffer.extend_from_slice(payload);

        match status {
            FragmentStatus::Incomplete => Ok(None),
            FragmentStatus::Complete => {
                let partial = occupied.remove();
                Self::finish(
                    sender,
                    header,
                    partial.declared,
                    partial.buffer.freeze(),
                )
                .map(Some)
            }
        }
    }

    fn start(
        &mut self,
        sender: MemberId,
        header: FragmentHeader,
        payload: &[u8],
    ) -> Result<Option<ReassembledAction>, ReassemblyError> {
        if let Some(previous) = self.buffers.remove(&sender) {
            let abandoned = previous.abandon(sender);
            warn!(
                "sender abandoned partial action: sender={sender}, action={}, received={}/{}",
                abandoned.action_id, abandoned.received, abandoned.declared_size
            );
        }

        let declared = header.action_size();
        let limit = self.max_action_size.get();
        if declared > limit as u64 {
            return Err(ReassemblyError::ActionTooLarge {
                sender,
                action_id: header.action_id(),
                declared,
                limit,
            });
        }

        let mut series = FragmentSeries::new(header.action_id());
        let status = series
            .accept(header)
            .map_err(|source| ReassemblyError::Fragment { sender, source })?;

        match status {
            FragmentStatus::Complete => {
                Self::finish(sender, header, declared, Bytes::copy_from_slice(payload)).map(Some)
            }
            FragmentStatus::Incomplete => {
                // declared <= limit, which is a usize
                let mut buffer = BytesMut::with_capacity(declared as usize);
                buffer.extend_from_slice(payload);
                self.buffers.insert(
                    sender,
                    PartialAction {
                        series,
                        action_type: header.action_type(),
                        declared,
                        buffer,
                    },
                );
                Ok(None)
            }
        }
    }

    fn finish(
        sender: MemberId,
        header: FragmentHeader,
        declared: u64,
        payload: Bytes,
    ) -> Result<ReassembledAction, ReassemblyError> {
        if payload.len() as u64 != declared {
            return Err(ReassemblyError::SizeMismatch {
                sender,
                action_id: header.action_id(),
                declared,
                received: payload.len(),
            });
        }
        Ok(ReassembledAction {
            sender,
            action_id: header.action_id(),
            action_type: header.action_type(),
            payload,
        })
    }

    /// Discard the partial action of `sender`, if any.
    pub fn drop_member(&mut self, sender: MemberId) -> Option<AbandonedAction> {
        self.buffers
            .remove(&sender)
            .map(|partial| partial.abandon(sender))
    }

    /// Discard partial actions from senders not listed in `members`.
    pub fn retain_members(&mut self, members: &[MemberId]) -> Vec<AbandonedAction> {
        let departed: Vec<MemberId> = self
            .buffers
            .keys()
            .filter(|sender| !members.contains(sender))
            .copied()
            .collect();
        departed
            .into_iter()
            .filter_map(|sender| self.drop_member(sender))
            .collect()
    }

    /// Discard every partial action.
    pub fn drop_all(&mut self) -> Vec<AbandonedAction> {
        let mut abandoned: Vec<AbandonedAction> = self
            .buffers
            .drain()
            .map(|(sender, partial)| partial.abandon(sender))
            .collect();
        abandoned.sort_by_key(|action| action.sender);
        abandoned
    }

    /// Whether `sender` has an action in progress.
    #[must_use]
    pub fn is_buffering(&self, sender: MemberId) -> bool { self.buffers.contains_key(&sender) }

    /// Number of partial actions currently buffered.
    #[must_use]
    pub fn buffered_len(&self) -> usize { self.buffers.len() }
}
