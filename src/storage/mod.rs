//! # Storage Module
//!
//! Flash-backed persistence for telemetry records.
//!
//! This module handles:
//! - The page-erasable flash device seam and its RAM/file implementations
//! - Ring log cursors journaled across two metadata pages
//! - Appending with page-granular eviction, and draining undelivered records

pub mod flash;
pub mod metadata;
pub mod ring_log;

pub use flash::{FileFlash, FlashDevice, RamFlash};
pub use metadata::RingLogMetadata;
pub use ring_log::{Drain, RingLog};
