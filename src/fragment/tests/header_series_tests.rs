//! Tests for fragment header accessors and fragment-series sequencing rules.

use rstest::rstest;

use crate::{action::ActionType, fragment::*};

fn header(action: u64, index: u32, last: bool) -> FragmentHeader {
    FragmentHeader::new(
        ActionId::new(action),
        FragmentIndex::new(index),
        last,
        16,
        ActionType::Replication,
    )
}

#[test]
fn fragment_header_exposes_fields() {
    let header = FragmentHeader::new(
        ActionId::new(9),
        FragmentIndex::new(2),
        true,
        300,
        ActionType::StateTransfer,
    );
    assert_eq!(header.action_id(), ActionId::new(9));
    assert_eq!(header.fragment_index(), FragmentIndex::new(2));
    assert!(header.is_last_fragment());
    assert_eq!(header.action_size(), 300);
    assert_eq!(header.action_type(), ActionType::StateTransfer);
}

#[rstest]
#[case(1)]
#[case(5)]
fn series_accepts_sequential_fragments(#[case] action: u64) {
    let mut series = FragmentSeries::new(ActionId::new(action));

    assert_eq!(series.accept(header(action, 0, false)), Ok(FragmentStatus::Incomplete));
    assert_eq!(series.accept(header(action, 1, false)), Ok(FragmentStatus::Incomplete));
    assert_eq!(series.accept(header(action, 2, true)), Ok(FragmentStatus::Complete));
    assert!(series.is_complete());
    assert_eq!(series.next_index(), FragmentIndex::new(3));
}

#[test]
fn series_rejects_other_action() {
    let mut series = FragmentSeries::new(ActionId::new(7));
    let err = series
        .accept(header(8, 0, false))
        .expect_err("fragment from another action must be rejected");
    assert!(matches!(err, FragmentError::ActionMismatch { .. }));
}

#[rstest]
#[case::gap(2)]
#[case::repeat(0)]
fn series_rejects_unexpected_index(#[case] second: u32) {
    let mut series = FragmentSeries::new(ActionId::new(7));
    assert_eq!(series.accept(header(7, 0, false)), Ok(FragmentStatus::Incomplete));
    let err = series
        .accept(header(7, second, false))
        .expect_err("unexpected index must be rejected");
    assert!(matches!(err, FragmentError::IndexMismatch { .. }));
}

#[test]
fn series_rejects_fragments_after_completion() {
    let mut series = FragmentSeries::new(ActionId::new(3));
    assert_eq!(series.accept(header(3, 0, true)), Ok(FragmentStatus::Complete));
    assert_eq!(
        series.accept(header(3, 1, true)),
        Err(FragmentError::SeriesComplete)
    );
}

#[test]
fn sizing_subtracts_header_overhead() {
    let sizing = FragmentSizing::for_packet_size(1400).expect("1400 is a valid packet size");
    let overhead = crate::message::fragment_overhead().get();
    assert_eq!(sizing.fragment_payload().get(), 1400 - overhead);
    assert_eq!(sizing.packet_size(), 1400);
}

#[test]
fn sizing_rejects_packets_without_room_for_payload() {
    let minimum = FragmentSizing::minimum_packet_size();
    assert!(FragmentSizing::for_packet_size(minimum).is_ok());
    let err = FragmentSizing::for_packet_size(minimum - 1).expect_err("too small");
    assert!(matches!(
        err,
        crate::CoreError::PacketSizeTooSmall { requested, minimum: floor }
            if requested == minimum - 1 && floor == minimum
    ));
}

#[rstest]
#[case(0, 1)]
#[case(1, 1)]
#[case(10, 1)]
#[case(11, 2)]
#[case(5000, 500)]
fn sizing_counts_fragments(#[case] action_size: usize, #[case] expected: usize) {
    let overhead = crate::message::fragment_overhead().get();
    let sizing = FragmentSizing::for_packet_size(overhead + 10).expect("valid sizing");
    assert_eq!(sizing.fragment_count(action_size), expected);
}
