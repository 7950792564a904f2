//! Deterministic payload generators.

use bytes::Bytes;

/// `len` bytes of a repeating pattern that does not align with common
/// fragment sizes, so misplaced fragments change the content.
#[must_use]
pub fn patterned_payload(len: usize) -> Bytes {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "value is reduced modulo 251 first"
    )]
    let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    Bytes::from(bytes)
}
