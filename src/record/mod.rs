//! # Telemetry Record Module
//!
//! The fixed-size telemetry record and its codecs.
//!
//! This module handles:
//! - Building records from physical sensor readings
//! - Fixed-point scaling with a selectable overflow policy
//! - The fixed-width stored layout used as the ring log stride

pub mod types;
pub mod scale;
pub mod codec;

pub use codec::{decode, encode};
pub use scale::OverflowPolicy;
pub use types::{EnvironmentReading, PositionFix, TelemetryRecord, RECORD_SIZE};
