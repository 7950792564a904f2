//! Error and status types emitted by the fragmentation layer.

use thiserror::Error;

use super::{ActionId, FragmentIndex};
use crate::seqno::MemberId;

/// Result of feeding a fragment into a [`FragmentSeries`](crate::fragment::FragmentSeries).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentStatus {
    /// The action still expects more fragments.
    Incomplete,
    /// The fragment completed the action.
    Complete,
}

/// Errors produced by [`FragmentSeries`](crate::fragment::FragmentSeries).
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FragmentError {
    /// The fragment belongs to a different action.
    #[error("fragment action mismatch: expected {expected}, found {found}")]
    ActionMismatch { expected: ActionId, found: ActionId },
    /// A fragment arrived out of order.
    #[error("fragment index mismatch: expected {expected}, found {found}")]
    IndexMismatch {
        expected: FragmentIndex,
        found: FragmentIndex,
    },
    /// The series already consumed a last fragment.
    #[error("fragment series already complete")]
    SeriesComplete,
    /// The fragment index overflowed `u32::MAX`.
    #[error("fragment index overflow after {last}")]
    IndexOverflow { last: FragmentIndex },
}

/// Errors produced while fragmenting outbound actions.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FragmentationError {
    /// The action needs more fragments than a `u32` index can number.
    #[error("action needs {count} fragments, more than an index can address")]
    TooManyFragments { count: usize },
}

/// Errors produced while reassembling inbound fragments.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// The fragment violated ordering for its sender.
    #[error("fragment from {sender} rejected: {source}")]
    Fragment {
        sender: MemberId,
        #[source]
        source: FragmentError,
    },
    /// A continuation fragment arrived with no action in progress.
    #[error("continuation fragment {index} of action {action_id} from {sender} has no start")]
    MissingStart {
        sender: MemberId,
        action_id: ActionId,
        index: FragmentIndex,
    },
    /// The declared action size exceeds the configured cap.
    #[error("action {action_id} from {sender} declares {declared} bytes; limit is {limit}")]
    ActionTooLarge {
        sender: MemberId,
        action_id: ActionId,
        declared: u64,
        limit: usize,
    },
    /// The reassembled bytes do not match the declared action size.
    #[error("action {action_id} from {sender} declared {declared} bytes but carried {received}")]
    SizeMismatch {
        sender: MemberId,
        action_id: ActionId,
        declared: u64,
        received: usize,
    },
}
