use bincode::{Decode, Encode};
use derive_more::{Display, From, Into};

/// Sender-local identifier of an action undergoing fragmentation.
///
/// Identifiers are unique per sending session only; receivers key partial
/// actions by the sending member, never by this value alone.
///
/// # Examples
///
/// ```
/// use groupframe::fragment::ActionId;
/// let id = ActionId::new(42);
/// assert_eq!(id.get(), 42);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode, Display, From, Into)]
#[display("{_0}")]
pub struct ActionId(u64);

impl ActionId {
    /// Create a new identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}
