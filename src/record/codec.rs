//! # Record Codec
//!
//! Fixed-width byte layout of a [`TelemetryRecord`] as stored in flash.
//!
//! Little-endian, matching the firmware's in-memory struct:
//!
//! ```text
//! [0:4)   time        u32      [24:26) pressure  i16
//! [4:8)   uptime      u32      [26:28) gas       i16
//! [8:12)  latitude    f32      [28:30) accel_x   i16
//! [12:16) longitude   f32      [30:32) accel_y   i16
//! [16:20) altitude    f32      [32:34) accel_z   i16
//! [20:22) temperature i16      [34]    ns
//! [22:24) humidity    i16      [35]    ew
//!                              [36]    device_id
//!                              [37:64) zero padding
//! ```

use bytes::{Buf, BufMut, BytesMut};

use super::types::{TelemetryRecord, RECORD_SIZE};
use crate::error::FormatError;

/// Value of erased flash
const ERASED_BYTE: u8 = 0xFF;

/// Encode a record into its stored form
pub fn encode(record: &TelemetryRecord) -> [u8; RECORD_SIZE] {
    let mut buf = BytesMut::with_capacity(RECORD_SIZE);
    buf.put_u32_le(record.time);
    buf.put_u32_le(record.uptime);
    buf.put_f32_le(record.latitude);
    buf.put_f32_le(record.longitude);
    buf.put_f32_le(record.altitude);
    buf.put_i16_le(record.temperature);
    buf.put_i16_le(record.humidity);
    buf.put_i16_le(record.pressure);
    buf.put_i16_le(record.gas);
    buf.put_i16_le(record.accel_x);
    buf.put_i16_le(record.accel_y);
    buf.put_i16_le(record.accel_z);
    buf.put_u8(record.ns);
    buf.put_u8(record.ew);
    buf.put_u8(record.device_id);
    buf.resize(RECORD_SIZE, 0);

    let mut out = [0u8; RECORD_SIZE];
    out.copy_from_slice(&buf);
    out
}

/// Decode a stored record
///
/// # Errors
///
/// Returns error if:
/// - The buffer is not exactly [`RECORD_SIZE`] bytes
/// - The buffer reads back as erased flash
pub fn decode(bytes: &[u8]) -> Result<TelemetryRecord, FormatError> {
    if bytes.len() != RECORD_SIZE {
        return Err(FormatError::Length {
            expected: RECORD_SIZE,
            actual: bytes.len(),
        });
    }

    if bytes.iter().all(|&b| b == ERASED_BYTE) {
        return Err(FormatError::Blank);
    }

    let mut buf = bytes;
    Ok(TelemetryRecord {
        time: buf.get_u32_le(),
        uptime: buf.get_u32_le(),
        latitude: buf.get_f32_le(),
        longitude: buf.get_f32_le(),
        altitude: buf.get_f32_le(),
        temperature: buf.get_i16_le(),
        humidity: buf.get_i16_le(),
        pressure: buf.get_i16_le(),
        gas: buf.get_i16_le(),
        accel_x: buf.get_i16_le(),
        accel_y: buf.get_i16_le(),
        accel_z: buf.get_i16_le(),
        ns: buf.get_u8(),
        ew: buf.get_u8(),
        device_id: buf.get_u8(),
    })
}
