//! Outbound splitting.

use std::num::NonZeroUsize;

use bytes::Bytes;
use rstest::rstest;

use crate::{
    action::ActionType,
    fragment::{ActionId, FragmentIndex, Fragmenter},
};

fn fragmenter(payload: usize) -> Fragmenter {
    Fragmenter::new(NonZeroUsize::new(payload).expect("non-zero fragment payload"))
}

#[rstest]
#[case::exact_multiple(9, 3, &[3, 3, 3])]
#[case::short_tail(8, 3, &[3, 3, 2])]
#[case::single(2, 3, &[2])]
#[case::empty(0, 3, &[0])]
fn slices_cover_the_action(#[case] size: usize, #[case] step: usize, #[case] lengths: &[usize]) {
    let action: Bytes = (0..size).map(|byte| byte as u8).collect();
    let batch = fragmenter(step)
        .fragment(ActionType::Replication, action.clone())
        .expect("fragment");

    let seen: Vec<usize> = batch.fragments().iter().map(|f| f.payload().len()).collect();
    assert_eq!(seen, lengths);
    assert_eq!(batch.action_size(), size);

    let rejoined: Vec<u8> = batch
        .fragments()
        .iter()
        .flat_map(|fragment| fragment.payload().iter().copied())
        .collect();
    assert_eq!(rejoined, action.as_ref());

    let last = batch.len() - 1;
    for (position, fragment) in batch.fragments().iter().enumerate() {
        let header = fragment.header();
        assert_eq!(header.fragment_index(), FragmentIndex::try_from(position).expect("u32"));
        assert_eq!(header.is_last_fragment(), position == last);
        assert_eq!(header.action_size(), size as u64);
        assert_eq!(header.action_type(), ActionType::Replication);
    }
}

#[test]
fn each_action_gets_the_next_id() {
    let mut fragmenter = fragmenter(4).starting_at(ActionId::new(7));
    let first = fragmenter
        .fragment(ActionType::Service, Bytes::from_static(b"12345"))
        .expect("first");
    let second = fragmenter
        .fragment(ActionType::Service, Bytes::from_static(b"x"))
        .expect("second");

    assert_eq!(first.action_id(), ActionId::new(7));
    assert_eq!(second.action_id(), ActionId::new(8));
    assert!(
        first
            .fragments()
            .iter()
            .all(|f| f.header().action_id() == ActionId::new(7))
    );
}

#[test]
fn resizing_affects_later_actions_only() {
    let mut fragmenter = fragmenter(2);
    let before = fragmenter
        .fragment(ActionType::Replication, Bytes::from_static(&[0; 10]))
        .expect("before");
    fragmenter.set_max_fragment_size(NonZeroUsize::new(5).expect("non-zero"));
    let after = fragmenter
        .fragment(ActionType::Replication, Bytes::from_static(&[0; 10]))
        .expect("after");

    assert_eq!(before.len(), 5);
    assert_eq!(after.len(), 2);
    assert_eq!(fragmenter.fragment_payload().get(), 5);
}

#[test]
fn fragments_share_the_action_buffer() {
    let action = Bytes::from(vec![5u8; 64]);
    let batch = fragmenter(16)
        .fragment(ActionType::StateTransfer, action.clone())
        .expect("fragment");
    let start = action.as_ptr();
    for (position, fragment) in batch.fragments().iter().enumerate() {
        assert_eq!(fragment.payload().as_ptr(), start.wrapping_add(position * 16));
    }
}
