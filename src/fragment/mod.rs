//! Action fragmentation and reassembly.
//!
//! The backend only carries messages up to the negotiated packet size. This
//! module splits outbound actions into fragments that fit, and stitches
//! inbound fragments back together per sender. Each sub-module focuses on a
//! single concept; the session wires them to the backend.

pub mod config;
pub mod defragmenter;
pub mod error;
pub mod fragmenter;
pub mod header;
pub mod id;
pub mod index;
pub mod series;

pub use config::{FragmentSizing, MIN_FRAGMENT_PAYLOAD};
pub use defragmenter::{AbandonedAction, Defragmenter, ReassembledAction};
pub use error::{FragmentError, FragmentStatus, FragmentationError, ReassemblyError};
pub use fragmenter::{FragmentBatch, FragmentFrame, Fragmenter};
pub use header::FragmentHeader;
pub use id::ActionId;
pub use index::FragmentIndex;
pub use series::FragmentSeries;

#[cfg(test)]
mod tests;
