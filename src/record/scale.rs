//! # Fixed-Point Scales
//!
//! Integer multipliers used to carry fractional physical quantities as
//! fixed-width integers, and the narrowing rules applied when a scaled value
//! does not fit its integer width.
//!
//! Scaling always truncates toward zero (`(int16)(value * scale)` on the
//! deployed firmware), never rounds.

use serde::Deserialize;

/// Latitude/longitude: degrees × 10^7
pub const LAT_LON_SCALE: f32 = 10_000_000.0;

/// Altitude: meters × 10
pub const ALTITUDE_SCALE: f32 = 10.0;

/// Temperature: °C × 100
pub const TEMPERATURE_SCALE: f64 = 100.0;

/// Relative humidity: % × 100
pub const HUMIDITY_SCALE: f64 = 100.0;

/// Pressure: hPa × 10
pub const PRESSURE_SCALE: f64 = 10.0;

/// Gas (VOC, arbitrary unit) × 100
pub const GAS_SCALE: f64 = 100.0;

/// Acceleration: m/s² × 1000
pub const ACCEL_SCALE: f64 = 1000.0;

/// What to do when a scaled value exceeds the range of its 16-bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Saturate to 32 bits, then wrap to 16 bits (bit-compatible with deployed peers).
    #[default]
    Wrap,
    /// Clamp to `i16::MIN..=i16::MAX`.
    Saturate,
}

/// Narrow an already-scaled value to `i16`.
///
/// Float-to-int `as` casts truncate toward zero, saturate and map NaN to 0,
/// which is what the ARM `VCVT` instruction does for the 32-bit step.
pub fn narrow_i16(scaled: f64, policy: OverflowPolicy) -> i16 {
    match policy {
        OverflowPolicy::Wrap => (scaled as i32) as i16,
        OverflowPolicy::Saturate => scaled as i16,
    }
}

/// Scale a physical value into a 16-bit fixed-point field.
pub fn to_fixed_i16(value: f64, scale: f64, policy: OverflowPolicy) -> i16 {
    narrow_i16(value * scale, policy)
}

/// Scale a single-precision value into a 32-bit fixed-point field.
///
/// The product is computed in `f32`, as the firmware does for coordinates.
pub fn to_fixed_i32(value: f32, scale: f32) -> i32 {
    (value * scale) as i32
}

/// Recover the physical approximation of a fixed-point value.
pub fn from_fixed(raw: i64, scale: f64) -> f64 {
    raw as f64 / scale
}
