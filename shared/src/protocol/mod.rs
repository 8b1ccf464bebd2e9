//! Buffer hand-off protocol
//!
//! Completed records cross the collector/consumer boundary as byte buffers.
//! This module defines the fixed-layout encoding of records inside those
//! buffers.

pub mod codec;
