//! # Telemetry Record Types
//!
//! The fixed-size record persisted by the ring log, and the physical sensor
//! readings it is built from.

use super::scale::{
    from_fixed, to_fixed_i16, OverflowPolicy, ACCEL_SCALE, GAS_SCALE, HUMIDITY_SCALE,
    PRESSURE_SCALE, TEMPERATURE_SCALE,
};

/// Stored record size in bytes.
///
/// This is the ring log's record stride; changing it requires bumping
/// `storage::metadata::METADATA_VERSION`.
pub const RECORD_SIZE: usize = 64;

/// Hemisphere placeholder used when no GNSS fix could be acquired
pub const UNKNOWN_HEMISPHERE: u8 = b'-';

/// Environment and motion readings in physical units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnvironmentReading {
    /// Temperature in °C
    pub temperature_c: f64,

    /// Relative humidity in %
    pub humidity_percent: f64,

    /// Pressure in hPa
    pub pressure_hpa: f64,

    /// VOC reading, arbitrary unit
    pub gas: f64,

    /// Acceleration X in m/s²
    pub accel_x: f64,

    /// Acceleration Y in m/s²
    pub accel_y: f64,

    /// Acceleration Z in m/s²
    pub accel_z: f64,
}

/// GNSS position fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    /// Unix seconds (0 = unknown)
    pub time: u32,

    /// Latitude in degrees
    pub latitude: f32,

    /// 'N' or 'S'
    pub ns: u8,

    /// Longitude in degrees
    pub longitude: f32,

    /// 'E' or 'W'
    pub ew: u8,

    /// Altitude in meters
    pub altitude: f32,

    /// Satellites used in the fix
    pub satellites: u8,
}

impl PositionFix {
    /// Placeholder fix recorded when GNSS acquisition is exhausted.
    pub fn unknown() -> Self {
        Self {
            time: 0,
            latitude: 0.0,
            ns: UNKNOWN_HEMISPHERE,
            longitude: 0.0,
            ew: UNKNOWN_HEMISPHERE,
            altitude: 0.0,
            satellites: 0,
        }
    }
}

/// One persisted telemetry sample.
///
/// Coordinates and altitude stay floating point until they are framed;
/// environment and motion channels are already fixed-point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    /// Unix seconds (0 = unknown)
    pub time: u32,

    /// Seconds since boot, stamped when the record is appended
    pub uptime: u32,

    /// Latitude in degrees
    pub latitude: f32,

    /// Longitude in degrees
    pub longitude: f32,

    /// Altitude in meters
    pub altitude: f32,

    /// 'N' or 'S'
    pub ns: u8,

    /// 'E' or 'W'
    pub ew: u8,

    /// °C × 100
    pub temperature: i16,

    /// % × 100
    pub humidity: i16,

    /// hPa × 10
    pub pressure: i16,

    /// VOC × 100
    pub gas: i16,

    /// m/s² × 1000
    pub accel_x: i16,

    /// m/s² × 1000
    pub accel_y: i16,

    /// m/s² × 1000
    pub accel_z: i16,

    /// Tracker identifier assigned by the gateway
    pub device_id: u8,
}

impl TelemetryRecord {
    /// Build a record from one acquisition, applying the fixed-point scales.
    ///
    /// `uptime` is left at zero; the ring log stamps it on append.
    pub fn from_readings(
        position: &PositionFix,
        environment: &EnvironmentReading,
        device_id: u8,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            time: position.time,
            uptime: 0,
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude,
            ns: position.ns,
            ew: position.ew,
            temperature: to_fixed_i16(environment.temperature_c, TEMPERATURE_SCALE, policy),
            humidity: to_fixed_i16(environment.humidity_percent, HUMIDITY_SCALE, policy),
            pressure: to_fixed_i16(environment.pressure_hpa, PRESSURE_SCALE, policy),
            gas: to_fixed_i16(environment.gas, GAS_SCALE, policy),
            accel_x: to_fixed_i16(environment.accel_x, ACCEL_SCALE, policy),
            accel_y: to_fixed_i16(environment.accel_y, ACCEL_SCALE, policy),
            accel_z: to_fixed_i16(environment.accel_z, ACCEL_SCALE, policy),
            device_id,
        }
    }

    /// Temperature in °C
    pub fn temperature_c(&self) -> f64 {
        from_fixed(self.temperature.into(), TEMPERATURE_SCALE)
    }

    /// Relative humidity in %
    pub fn humidity_percent(&self) -> f64 {
        from_fixed(self.humidity.into(), HUMIDITY_SCALE)
    }

    /// Pressure in hPa
    pub fn pressure_hpa(&self) -> f64 {
        from_fixed(self.pressure.into(), PRESSURE_SCALE)
    }

    /// VOC reading
    pub fn gas_units(&self) -> f64 {
        from_fixed(self.gas.into(), GAS_SCALE)
    }

    /// Acceleration (x, y, z) in m/s²
    pub fn acceleration(&self) -> (f64, f64, f64) {
        (
            from_fixed(self.accel_x.into(), ACCEL_SCALE),
            from_fixed(self.accel_y.into(), ACCEL_SCALE),
            from_fixed(self.accel_z.into(), ACCEL_SCALE),
        )
    }
}
