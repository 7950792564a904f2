//! Unit tests for the fragmentation and reassembly subsystem.

mod defragmenter_tests;
mod fragmenter_tests;
mod header_series_tests;
mod property;
