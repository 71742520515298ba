//! # Wire Frame Module
//!
//! Fixed-layout binary frames exchanged between tracker and collector.
//!
//! This module handles:
//! - Frame layout constants and radio identifiers
//! - SHA-256 digest over the canonical payload rendering
//! - Big-endian packing of fixed-point fields
//! - Length-checked unpacking (the digest is relayed, not verified)

pub mod protocol;
pub mod digest;
pub mod encoder;
pub mod decoder;

pub use decoder::{unpack, unpack_record};
pub use encoder::pack;
pub use protocol::{FramePayload, WireFrame, FRAME_LEN};
