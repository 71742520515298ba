//! # Wire Frame Constants and Types
//!
//! Fixed 68-byte frame carried in one characteristic notification.
//!
//! ```text
//! [0:32)  SHA-256 digest of the canonical payload rendering
//! [32:36) time             u32
//! [36:40) latitude  × 1e7  i32
//! [40]    ns
//! [41:45) longitude × 1e7  i32
//! [45]    ew
//! [46:48) altitude  × 10   i16
//! [48]    reserved (0)
//! [49:51) temperature × 100
//! [51:53) humidity × 100
//! [53:55) pressure × 10
//! [55:57) gas × 100
//! [57:59) accel_x × 1000
//! [59:61) accel_y × 1000
//! [61:63) accel_z × 1000
//! [63]    device_id
//! [64:68) uptime           u32
//! ```
//!
//! Multi-byte fields are big-endian.

use uuid::Uuid;

use super::digest;
use crate::record::scale::{
    from_fixed, narrow_i16, to_fixed_i32, ACCEL_SCALE, ALTITUDE_SCALE, GAS_SCALE,
    HUMIDITY_SCALE, LAT_LON_SCALE, PRESSURE_SCALE, TEMPERATURE_SCALE,
};
use crate::record::{OverflowPolicy, TelemetryRecord};

/// Total frame size
pub const FRAME_LEN: usize = 68;

/// Digest size (SHA-256)
pub const DIGEST_LEN: usize = 32;

/// Capture time, Unix seconds
pub const OFFSET_TIME: usize = 32;
/// Latitude in 1e-7 degrees
pub const OFFSET_LATITUDE: usize = 36;
/// Hemisphere byte, `N` or `S`
pub const OFFSET_NS: usize = 40;
/// Longitude in 1e-7 degrees
pub const OFFSET_LONGITUDE: usize = 41;
/// Hemisphere byte, `E` or `W`
pub const OFFSET_EW: usize = 45;
/// Altitude in decimetres
pub const OFFSET_ALTITUDE: usize = 46;
/// Always zero
pub const OFFSET_RESERVED: usize = 48;
/// First of the seven i16 sensor fields, temperature onward
pub const OFFSET_TEMPERATURE: usize = 49;
/// Tracker device ID
pub const OFFSET_DEVICE_ID: usize = 63;
/// Tracker uptime, seconds
pub const OFFSET_UPTIME: usize = 64;

/// Service advertised by trackers
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xF0DE_BC9A_7856_3412_7856_3412_7856_3412);

/// Characteristic carrying frames (read, write, notify)
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xAABB_CCDD_EEFF_0011_2233_4455_6677_8899);

/// Client Characteristic Configuration descriptor
pub const CCC_DESCRIPTOR_UUID16: u16 = 0x2902;

/// CCC value enabling notifications
pub const CCC_NOTIFY: u16 = 0x0001;

/// One encoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFrame(pub [u8; FRAME_LEN]);

impl WireFrame {
    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A record as it crosses the link: fixed-point fields plus digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePayload {
    pub digest: [u8; DIGEST_LEN],
    pub time: u32,
    pub latitude: i32,
    pub ns: u8,
    pub longitude: i32,
    pub ew: u8,
    pub altitude: i16,
    pub temperature: i16,
    pub humidity: i16,
    pub pressure: i16,
    pub gas: i16,
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub device_id: u8,
    pub uptime: u32,
}

impl FramePayload {
    /// Convert a stored record to its wire form and compute the digest
    ///
    /// # Arguments
    ///
    /// * `record` - Stored record
    /// * `policy` - Narrowing rule for the altitude field
    pub fn from_record(record: &TelemetryRecord, policy: OverflowPolicy) -> Self {
        let mut payload = Self {
            digest: [0u8; DIGEST_LEN],
            time: record.time,
            latitude: to_fixed_i32(record.latitude, LAT_LON_SCALE),
            ns: record.ns,
            longitude: to_fixed_i32(record.longitude, LAT_LON_SCALE),
            ew: record.ew,
            altitude: narrow_i16(f64::from(record.altitude * ALTITUDE_SCALE), policy),
            temperature: record.temperature,
            humidity: record.humidity,
            pressure: record.pressure,
            gas: record.gas,
            accel_x: record.accel_x,
            accel_y: record.accel_y,
            accel_z: record.accel_z,
            device_id: record.device_id,
            uptime: record.uptime,
        };
        payload.digest = digest::canonical_digest(&payload);
        payload
    }

    /// Rebuild a record from the fixed-point fields
    pub fn to_record(&self) -> TelemetryRecord {
        TelemetryRecord {
            time: self.time,
            uptime: self.uptime,
            latitude: self.latitude_deg() as f32,
            longitude: self.longitude_deg() as f32,
            altitude: self.altitude_m() as f32,
            ns: self.ns,
            ew: self.ew,
            temperature: self.temperature,
            humidity: self.humidity,
            pressure: self.pressure,
            gas: self.gas,
            accel_x: self.accel_x,
            accel_y: self.accel_y,
            accel_z: self.accel_z,
            device_id: self.device_id,
        }
    }

    /// Latitude in degrees; see `ns` for the hemisphere
    pub fn latitude_deg(&self) -> f64 {
        from_fixed(self.latitude.into(), f64::from(LAT_LON_SCALE))
    }

    /// Longitude in degrees; see `ew` for the hemisphere
    pub fn longitude_deg(&self) -> f64 {
        from_fixed(self.longitude.into(), f64::from(LAT_LON_SCALE))
    }

    /// Altitude in metres
    pub fn altitude_m(&self) -> f64 {
        from_fixed(self.altitude.into(), f64::from(ALTITUDE_SCALE))
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

    /// Gas reading in sensor units
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

    /// Digest as uppercase hex
    pub fn digest_hex(&self) -> String {
        hex::encode_upper(self.digest)
    }
}
