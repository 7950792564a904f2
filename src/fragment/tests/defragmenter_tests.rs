//! Tests for per-sender reassembly, interleaving and membership-driven drops.

use std::num::NonZeroUsize;

use bytes::Bytes;
use rstest::{fixture, rstest};

use crate::{
    action::ActionType,
    fragment::{
        ActionId,
        Defragmenter,
        FragmentError,
        FragmentHeader,
        FragmentIndex,
        Fragmenter,
        ReassemblyError,
    },
    seqno::MemberId,
};

const ALICE: MemberId = MemberId::new(1);
const BOB: MemberId = MemberId::new(2);

fn header(action: u64, index: u32, last: bool, size: u64) -> FragmentHeader {
    FragmentHeader::new(
        ActionId::new(action),
        FragmentIndex::new(index),
        last,
        size,
        ActionType::Replication,
    )
}

#[fixture]
fn defragmenter() -> Defragmenter { Defragmenter::new(NonZeroUsize::new(64).expect("non-zero")) }

#[rstest]
fn single_fragment_completes_immediately(mut defragmenter: Defragmenter) {
    let action = defragmenter
        .push(ALICE, header(1, 0, true, 4), &[1, 2, 3, 4])
        .expect("fragment accepted")
        .expect("single fragment completes the action");

    assert_eq!(action.sender(), ALICE);
    assert_eq!(action.action_id(), ActionId::new(1));
    assert_eq!(action.payload(), &[1, 2, 3, 4]);
    assert_eq!(defragmenter.buffered_len(), 0);
}

#[rstest]
fn interleaved_senders_are_reassembled_independently(mut defragmenter: Defragmenter) {
    assert!(
        defragmenter
            .push(ALICE, header(1, 0, false, 4), &[1, 2])
            .expect("alice first")
            .is_none()
    );
    assert!(
        defragmenter
            .push(BOB, header(1, 0, false, 3), &[7])
            .expect("bob first")
            .is_none()
    );
    assert_eq!(defragmenter.buffered_len(), 2);

    let alice = defragmenter
        .push(ALICE, header(1, 1, true, 4), &[3, 4])
        .expect("alice last")
        .expect("alice complete");
    let bob = defragmenter
        .push(BOB, header(1, 1, true, 3), &[8, 9])
        .expect("bob last")
        .expect("bob complete");

    assert_eq!(alice.payload(), &[1, 2, 3, 4]);
    assert_eq!(bob.payload(), &[7, 8, 9]);
    assert_eq!(defragmenter.buffered_len(), 0);
}

#[rstest]
fn out_of_order_fragment_drops_partial(mut defragmenter: Defragmenter) {
    defragmenter
        .push(ALICE, header(3, 0, false, 6), &[1, 2])
        .expect("first accepted");
    let err = defragmenter
        .push(ALICE, header(3, 2, true, 6), &[5, 6])
        .expect_err("gap must be rejected");

    assert!(matches!(
        err,
        ReassemblyError::Fragment {
            sender: ALICE,
            source: FragmentError::IndexMismatch { .. }
        }
    ));
    assert!(!defragmenter.is_buffering(ALICE));
}

#[rstest]
fn continuation_without_start_is_rejected(mut defragmenter: Defragmenter) {
    let err = defragmenter
        .push(BOB, header(4, 1, true, 8), &[0; 4])
        .expect_err("continuation without start");
    assert!(matches!(err, ReassemblyError::MissingStart { sender: BOB, .. }));
}

#[rstest]
fn declared_size_above_cap_is_rejected(mut defragmenter: Defragmenter) {
    let err = defragmenter
        .push(ALICE, header(5, 0, false, 65), &[0; 8])
        .expect_err("declared size over cap");
    assert!(matches!(
        err,
        ReassemblyError::ActionTooLarge {
            declared: 65,
            limit: 64,
            ..
        }
    ));
    assert_eq!(defragmenter.buffered_len(), 0);
}

#[rstest]
fn overrun_of_declared_size_is_rejected(mut defragmenter: Defragmenter) {
    defragmenter
        .push(ALICE, header(6, 0, false, 4), &[0; 3])
        .expect("first accepted");
    let err = defragmenter
        .push(ALICE, header(6, 1, true, 4), &[0; 3])
        .expect_err("overrun");
    assert!(matches!(err, ReassemblyError::SizeMismatch { received: 6, .. }));
    assert!(!defragmenter.is_buffering(ALICE));
}

#[rstest]
fn short_action_is_rejected_on_completion(mut defragmenter: Defragmenter) {
    let err = defragmenter
        .push(ALICE, header(7, 0, true, 10), &[0; 3])
        .expect_err("short action");
    assert!(matches!(
        err,
        ReassemblyError::SizeMismatch {
            declared: 10,
            received: 3,
            ..
        }
    ));
}

#[rstest]
fn new_action_replaces_abandoned_partial(mut defragmenter: Defragmenter) {
    defragmenter
        .push(ALICE, header(8, 0, false, 10), &[0; 5])
        .expect("first accepted");
    let action = defragmenter
        .push(ALICE, header(9, 0, true, 2), &[4, 2])
        .expect("new action accepted")
        .expect("new action complete");
    assert_eq!(action.action_id(), ActionId::new(9));
    assert_eq!(defragmenter.buffered_len(), 0);
}

#[rstest]
fn dropping_a_member_discards_only_its_partial(mut defragmenter: Defragmenter) {
    defragmenter
        .push(ALICE, header(1, 0, false, 10), &[0; 5])
        .expect("alice first");
    defragmenter
        .push(BOB, header(2, 0, false, 10), &[0; 4])
        .expect("bob first");

    let abandoned = defragmenter.drop_member(ALICE).expect("alice was buffering");
    assert_eq!(abandoned.action_id, ActionId::new(1));
    assert_eq!(abandoned.received, 5);
    assert_eq!(abandoned.declared_size, 10);
    assert!(defragmenter.is_buffering(BOB));
    assert!(defragmenter.drop_member(ALICE).is_none());

    // A late fragment of the dropped action never merges into a new buffer.
    let err = defragmenter
        .push(ALICE, header(1, 1, true, 10), &[0; 5])
        .expect_err("stale continuation");
    assert!(matches!(err, ReassemblyError::MissingStart { .. }));
}

#[rstest]
fn retain_members_drops_departed_senders(mut defragmenter: Defragmenter) {
    defragmenter
        .push(ALICE, header(1, 0, false, 10), &[0; 5])
        .expect("alice first");
    defragmenter
        .push(BOB, header(2, 0, false, 10), &[0; 4])
        .expect("bob first");

    let abandoned = defragmenter.retain_members(&[BOB]);
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned.first().map(|a| a.sender), Some(ALICE));
    assert!(defragmenter.is_buffering(BOB));

    let rest = defragmenter.drop_all();
    assert_eq!(rest.len(), 1);
    assert_eq!(defragmenter.buffered_len(), 0);
}

#[rstest]
fn fragmenter_output_round_trips(mut defragmenter: Defragmenter) {
    let mut fragmenter = Fragmenter::new(NonZeroUsize::new(7).expect("non-zero"));
    let payload: Vec<u8> = (0..50).collect();
    let batch = fragmenter
        .fragment(ActionType::Replication, Bytes::from(payload.clone()))
        .expect("fragment");
    let fragments = batch.len();

    let mut completed = None;
    for (position, fragment) in batch.fragments().iter().enumerate() {
        let result = defragmenter
            .push(ALICE, *fragment.header(), fragment.payload())
            .expect("fragment accepted");
        if position + 1 < fragments {
            assert!(result.is_none(), "action completed early at {position}");
        } else {
            completed = result;
        }
    }

    let action = completed.expect("last fragment completes");
    assert_eq!(action.payload(), payload.as_slice());
}
