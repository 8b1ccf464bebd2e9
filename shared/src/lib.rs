//! Shared types and utilities for tracelens
//!
//! This crate contains the typed view records produced by the collector, the
//! fixed-layout binary codec used to carry them across the buffer hand-off
//! boundary, and small utilities shared by the collector and the CLI.

pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use protocol::codec::{CodecError, RecordIter, MAX_RECORD_LEN};
pub use types::records::*;
