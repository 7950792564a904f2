//! Total-order bookkeeping for the receive path.
//!
//! The backend delivers fragments to every member in the same order, so each
//! member can number completed actions locally and arrive at the same
//! [`Seqno`] for each of them, provided all members start from the same
//! base. [`Sequencer`] hands out those numbers and tracks the group identity
//! they were issued under. Whenever a new primary group forms, members run a
//! [`StateExchange`]: each announces its last seqno and numbering resumes
//! after the highest one, so a member that joins late agrees with those that
//! were already there. [`LastAppliedTable`] records the watermarks members
//! announce with `LastApplied` actions and derives the commit cut from them.

use std::collections::BTreeSet;

use dashmap::DashMap;
use log::{debug, info};

use crate::{
    backend::View,
    seqno::{GroupId, MemberId, Seqno},
};

/// Issues sequence numbers to actions as the group orders them.
#[derive(Clone, Copy, Debug)]
pub struct Sequencer {
    group: GroupId,
    last: Seqno,
}

impl Default for Sequencer {
    fn default() -> Self { Self::new() }
}

impl Sequencer {
    /// Start with no history and no group.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            group: GroupId::NIL,
            last: Seqno::UNDEFINED,
        }
    }

    /// Seed the history: the next ordered action receives `last + 1`.
    #[must_use]
    pub const fn seeded(last: Seqno, group: GroupId) -> Self { Self { group, last } }

    /// Assign the next sequence number.
    ///
    /// # Panics
    ///
    /// Panics if the 64-bit sequence space is exhausted.
    pub fn assign(&mut self) -> Seqno {
        let next = self
            .last
            .checked_next()
            .unwrap_or_else(|| panic!("sequence space exhausted after {}", self.last));
        self.last = next;
        next
    }

    /// Record the group identity of a newly installed view.
    ///
    /// Returns true if the identity changed. Numbering is unaffected until
    /// [`Sequencer::resume_after`] applies the base the group agreed on.
    pub fn observe_group(&mut self, group: GroupId) -> bool {
        if self.group == group {
            return false;
        }
        info!(
            "group identity changed: {} -> {group} at seqno {}",
            self.group, self.last
        );
        self.group = group;
        true
    }

    /// Continue numbering after `agreed`, the highest seqno any member of
    /// the group reported. Numbering never moves backwards.
    pub fn resume_after(&mut self, agreed: Seqno) {
        if agreed > self.last {
            info!("group {} resumes numbering after {agreed} (was {})", self.group, self.last);
            self.last = agreed;
        }
    }

    /// Identity of the current membership epoch.
    #[must_use]
    pub const fn group(&self) -> GroupId { self.group }

    /// Last sequence number issued or seeded.
    #[must_use]
    pub const fn last(&self) -> Seqno { self.last }
}

/// Ordering state collected from the members of a freshly installed primary
/// view.
///
/// Items completed while states are outstanding are held back, since no
/// member may number them before the group agrees on a base.
#[derive(Debug)]
pub struct StateExchange<T> {
    view: View,
    awaiting: BTreeSet<MemberId>,
    highest: Option<Seqno>,
    held: Vec<T>,
}

impl<T> StateExchange<T> {
    /// Wait for a state from every member of `view`.
    #[must_use]
    pub fn new(view: View) -> Self {
        Self {
            awaiting: view.members().iter().copied().collect(),
            view,
            highest: None,
            held: Vec::new(),
        }
    }

    /// Group identity being agreed on.
    #[must_use]
    pub fn group(&self) -> GroupId { self.view.group() }

    /// Record the state `member` announced for `group`.
    ///
    /// Returns true once every member has reported. States announced for
    /// another group, or repeated by a member, are ignored.
    pub fn record(&mut self, member: MemberId, group: GroupId, last: Seqno) -> bool {
        if group != self.view.group() || !self.awaiting.remove(&member) {
            debug!("ignoring state from {member} for group {group}");
            return false;
        }
        self.highest = Some(self.highest.map_or(last, |highest| highest.max(last)));
        self.awaiting.is_empty()
    }

    /// Stop waiting for `member`, which left before reporting.
    ///
    /// Returns true if that completes the exchange.
    pub fn forget(&mut self, member: MemberId) -> bool {
        self.awaiting.remove(&member) && self.awaiting.is_empty()
    }

    /// Hold `item` back until the exchange completes.
    pub fn hold(&mut self, item: T) { self.held.push(item); }

    /// Number of items held back.
    #[must_use]
    pub fn held_len(&self) -> usize { self.held.len() }

    /// Complete the exchange, returning the view, the agreed base and the
    /// held items in arrival order.
    #[must_use]
    pub fn finish(self) -> (View, Seqno, Vec<T>) {
        (
            self.view,
            self.highest.unwrap_or(Seqno::UNDEFINED),
            self.held,
        )
    }

    /// Give up on the exchange, returning the held items.
    #[must_use]
    pub fn abandon(self) -> Vec<T> { self.held }
}

/// Concurrent table of last-applied watermarks keyed by member.
#[derive(Debug, Default)]
pub struct LastAppliedTable(DashMap<MemberId, Seqno>);

impl LastAppliedTable {
    /// Record an announcement. Watermarks never move backwards.
    pub fn record(&self, member: MemberId, seqno: Seqno) {
        self.0
            .entry(member)
            .and_modify(|current| *current = (*current).max(seqno))
            .or_insert(seqno);
    }

    /// Announced watermark of `member`, if any.
    #[must_use]
    pub fn get(&self, member: MemberId) -> Option<Seqno> { self.0.get(&member).map(|entry| *entry) }

    /// Forget `member`, typically after it left the group.
    pub fn remove(&self, member: MemberId) { self.0.remove(&member); }

    /// Forget every watermark.
    pub fn clear(&self) { self.0.clear(); }

    /// Forget members not listed in `members`.
    pub fn retain(&self, members: &[MemberId]) {
        self.0.retain(|member, _| members.contains(member));
    }

    /// Lowest watermark among `members` that have announced one.
    ///
    /// Every action at or below the returned seqno has been applied by each
    /// of those members.
    #[must_use]
    pub fn commit_cut(&self, members: &[MemberId]) -> Option<Seqno> {
        members
            .iter()
            .filter_map(|member| self.get(*member))
            .min()
    }

    /// Number of members with a recorded watermark.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether no watermark has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}
