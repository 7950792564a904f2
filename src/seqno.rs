//! Identity types shared by the ordering and membership layers.
//!
//! [`Seqno`] numbers totally ordered actions, [`GroupId`] names the membership
//! epoch those numbers belong to, and [`MemberId`] identifies a sender as the
//! backend reports it.

use bincode::{Decode, Encode};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position of an action in the group's total order.
///
/// Negative values never denote a delivered action. They are used by the
/// state-transfer announcements to carry a failure code in place of a
/// sequence number.
///
/// # Examples
///
/// ```
/// use groupframe::Seqno;
/// let seqno = Seqno::new(41);
/// assert_eq!(seqno.checked_next(), Some(Seqno::new(42)));
/// assert!(Seqno::UNDEFINED.get() < 0);
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Encode,
    Decode,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[display("{_0}")]
pub struct Seqno(i64);

impl Seqno {
    /// Placeholder used before any action has been ordered.
    pub const UNDEFINED: Self = Self(-1);

    /// Construct a sequence number.
    #[must_use]
    pub const fn new(value: i64) -> Self { Self(value) }

    /// Return the raw value.
    #[must_use]
    pub const fn get(self) -> i64 { self.0 }

    /// Return the following sequence number, or `None` on overflow.
    #[must_use]
    pub fn checked_next(self) -> Option<Self> { self.0.checked_add(1).map(Self) }

    /// Whether this value denotes a real position rather than a failure code.
    #[must_use]
    pub const fn is_valid(self) -> bool { self.0 >= 0 }
}

/// Identity of a membership epoch.
///
/// A new value is minted on every primary-component transition; delivery
/// status is only meaningful relative to the group identity it was reported
/// under.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
pub struct GroupId(Uuid);

impl GroupId {
    /// Identity used before any group has been joined.
    pub const NIL: Self = Self(Uuid::nil());

    /// Mint a fresh random identity.
    #[must_use]
    pub fn random() -> Self { Self(Uuid::new_v4()) }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self { Self(uuid) }

    /// Build an identity from its 16-byte wire form.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self { Self(Uuid::from_bytes(bytes)) }

    /// Return the 16-byte wire form.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] { *self.0.as_bytes() }

    /// Borrow the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid { &self.0 }
}

/// Backend-assigned identity of a group member.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Encode,
    Decode,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[display("member-{_0}")]
pub struct MemberId(u64);

impl MemberId {
    /// Construct a member identity.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the raw value.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqno_overflow_is_detected() {
        assert_eq!(Seqno::new(i64::MAX).checked_next(), None);
    }

    #[test]
    fn group_id_survives_byte_conversion() {
        let group = GroupId::random();
        assert_eq!(GroupId::from_bytes(group.to_bytes()), group);
        assert_ne!(group, GroupId::NIL);
    }

    #[test]
    fn negative_seqno_is_not_valid() {
        assert!(!Seqno::new(-71).is_valid());
        assert!(Seqno::new(0).is_valid());
    }
}
