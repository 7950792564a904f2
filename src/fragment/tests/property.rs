//! Property tests for the fragmentation round trip.

use std::num::NonZeroUsize;

use bytes::Bytes;
use proptest::prelude::*;

use crate::{
    action::ActionType,
    fragment::{Defragmenter, FragmentSizing, Fragmenter},
    seqno::MemberId,
};

proptest! {
    #[test]
    fn split_and_reassemble_preserves_payload(
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
        extra in 0usize..512,
    ) {
        let sizing = FragmentSizing::for_packet_size(FragmentSizing::minimum_packet_size() + extra)
            .expect("packet size above the floor");
        let cap = sizing.fragment_payload().get();
        let mut fragmenter = Fragmenter::new(sizing.fragment_payload());
        let batch = fragmenter
            .fragment(ActionType::Replication, Bytes::from(payload.clone()))
            .expect("fragment payload");

        prop_assert_eq!(batch.len(), sizing.fragment_count(payload.len()));
        prop_assert!(batch.fragments().iter().all(|f| f.payload().len() <= cap));

        let mut defragmenter = Defragmenter::new(NonZeroUsize::new(8192).expect("non-zero"));
        let mut assembled = None;
        for fragment in batch.fragments() {
            assembled = defragmenter
                .push(MemberId::new(3), *fragment.header(), fragment.payload())
                .expect("fragment accepted");
        }
        let action = assembled.expect("final fragment completes the action");
        prop_assert_eq!(action.payload(), payload.as_slice());
    }
}
