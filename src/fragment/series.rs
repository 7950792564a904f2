//! Ordering tracker for the fragments of one in-flight action.

use super::{ActionId, FragmentError, FragmentHeader, FragmentIndex, FragmentStatus};

/// Track the expected ordering of fragments for a single action.
///
/// The backend delivers each sender's messages in order, so any gap or
/// repetition means the sender abandoned the action or the stream is corrupt.
/// Either way the series rejects the fragment and the caller drops the
/// partial action.
#[derive(Clone, Debug)]
pub struct FragmentSeries {
    action_id: ActionId,
    next_index: FragmentIndex,
    complete: bool,
}

impl FragmentSeries {
    /// Create a new series for `action_id`, expecting the first fragment.
    #[must_use]
    pub const fn new(action_id: ActionId) -> Self {
        Self {
            action_id,
            next_index: FragmentIndex::FIRST,
            complete: false,
        }
    }

    /// Return the action identifier tracked by this series.
    #[must_use]
    pub const fn action_id(&self) -> ActionId { self.action_id }

    /// Return the index the series expects next.
    #[must_use]
    pub const fn next_index(&self) -> FragmentIndex { self.next_index }

    /// Return whether the series has consumed the final fragment.
    #[must_use]
    pub const fn is_complete(&self) -> bool { self.complete }

    /// Accept a fragment and update the expected index.
    ///
    /// # Examples
    ///
    /// ```
    /// use groupframe::{
    ///     ActionType,
    ///     fragment::{ActionId, FragmentHeader, FragmentIndex, FragmentSeries, FragmentStatus},
    /// };
    /// let id = ActionId::new(99);
    /// let mut series = FragmentSeries::new(id);
    /// let first = FragmentHeader::new(id, FragmentIndex::FIRST, false, 8, ActionType::Service);
    /// let last = FragmentHeader::new(id, FragmentIndex::new(1), true, 8, ActionType::Service);
    /// assert_eq!(series.accept(first), Ok(FragmentStatus::Incomplete));
    /// assert_eq!(series.accept(last), Ok(FragmentStatus::Complete));
    /// assert!(series.is_complete());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`FragmentError::ActionMismatch`] when the fragment belongs to
    /// a different action, [`FragmentError::IndexMismatch`] when the fragment
    /// is not the expected next one, [`FragmentError::SeriesComplete`] when
    /// the series already consumed a final fragment, and
    /// [`FragmentError::IndexOverflow`] when the index cannot advance further.
    pub fn accept(&mut self, fragment: FragmentHeader) -> Result<FragmentStatus, FragmentError> {
        if fragment.action_id() != self.action_id {
            return Err(FragmentError::ActionMismatch {
                expected: self.action_id,
                found: fragment.action_id(),
            });
        }

        if self.complete {
            return Err(FragmentError::SeriesComplete);
        }

        if fragment.fragment_index() != self.next_index {
            return Err(FragmentError::IndexMismatch {
                expected: self.next_index,
                found: fragment.fragment_index(),
            });
        }

        let next_index = fragment.fragment_index().successor();
        if fragment.is_last_fragment() {
            self.complete = true;
            if let Some(incremented) = next_index {
                self.next_index = incremented;
            }
            return Ok(FragmentStatus::Complete);
        }

        let Some(incremented) = next_index else {
            return Err(FragmentError::IndexOverflow {
                last: fragment.fragment_index(),
            });
        };

        self.next_index = incremented;
        Ok(FragmentStatus::Incomplete)
    }
}
