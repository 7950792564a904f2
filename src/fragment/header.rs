use bincode::{Decode, Encode};

use super::{ActionId, FragmentIndex};
use crate::action::ActionType;

/// Metadata prefixed to every action fragment on the wire.
///
/// Besides ordering information the header repeats the total action size and
/// type in each fragment, so a receiver can pre-size its buffer from the first
/// fragment and report an abandoned action accurately from any of them.
///
/// # Examples
///
/// ```
/// use groupframe::{
///     ActionType,
///     fragment::{ActionId, FragmentHeader, FragmentIndex},
/// };
/// let header = FragmentHeader::new(
///     ActionId::new(7),
///     FragmentIndex::FIRST,
///     false,
///     5000,
///     ActionType::Replication,
/// );
/// assert_eq!(header.action_id().get(), 7);
/// assert_eq!(header.action_size(), 5000);
/// assert!(!header.is_last_fragment());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct FragmentHeader {
    action_id: ActionId,
    fragment_index: FragmentIndex,
    is_last_fragment: bool,
    action_size: u64,
    action_type: ActionType,
}

impl FragmentHeader {
    /// Create a new fragment header.
    #[must_use]
    pub const fn new(
        action_id: ActionId,
        fragment_index: FragmentIndex,
        is_last_fragment: bool,
        action_size: u64,
        action_type: ActionType,
    ) -> Self {
        Self {
            action_id,
            fragment_index,
            is_last_fragment,
            action_size,
            action_type,
        }
    }

    /// Return the sender-local action identifier.
    #[must_use]
    pub const fn action_id(&self) -> ActionId { self.action_id }

    /// Return the fragment position relative to the action.
    #[must_use]
    pub const fn fragment_index(&self) -> FragmentIndex { self.fragment_index }

    /// Report whether this is the final fragment.
    #[must_use]
    pub const fn is_last_fragment(&self) -> bool { self.is_last_fragment }

    /// Total size of the action this fragment belongs to.
    #[must_use]
    pub const fn action_size(&self) -> u64 { self.action_size }

    /// Type of the action this fragment belongs to.
    #[must_use]
    pub const fn action_type(&self) -> ActionType { self.action_type }
}
