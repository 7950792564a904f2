//! Position of a fragment inside its action.

use bincode::{Decode, Encode};
use derive_more::{Display, From, Into};

/// Ordinal of a fragment within one action, counted from zero.
///
/// ```
/// use groupframe::fragment::FragmentIndex;
///
/// let second = FragmentIndex::FIRST.successor().expect("room for a second fragment");
/// assert_eq!(second.get(), 1);
/// assert!(!second.is_first());
/// ```
#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, From, Into,
)]
#[display("#{_0}")]
pub struct FragmentIndex(u32);

impl FragmentIndex {
    /// Index carried by the opening fragment.
    pub const FIRST: Self = Self(0);

    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    #[must_use]
    pub const fn get(self) -> u32 { self.0 }

    /// Whether a fragment at this index opens a new action.
    #[must_use]
    pub const fn is_first(self) -> bool { self.0 == Self::FIRST.0 }

    /// Index of the following fragment, or `None` once `u32` is exhausted.
    #[must_use]
    pub const fn successor(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(next) => Some(Self(next)),
            None => None,
        }
    }
}

impl TryFrom<usize> for FragmentIndex {
    type Error = std::num::TryFromIntError;

    fn try_from(position: usize) -> Result<Self, Self::Error> { Ok(Self(u32::try_from(position)?)) }
}
