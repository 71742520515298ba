//! # Frame Decoder
//!
//! Unpacks wire frames received from a tracker. The digest is carried through
//! untouched; nothing here recomputes or checks it.

use bytes::Buf;

use super::protocol::*;
use crate::error::FrameError;
use crate::record::TelemetryRecord;

/// Decode a frame into its wire payload
///
/// # Arguments
///
/// * `frame` - Notification bytes (must be exactly [`FRAME_LEN`] long)
///
/// # Returns
///
/// * `Result<FramePayload, FrameError>` - Decoded fixed-point fields and digest
///
/// # Errors
///
/// Returns `FrameError::Length` if the buffer is not a whole frame
pub fn unpack(frame: &[u8]) -> Result<FramePayload, FrameError> {
    if frame.len() != FRAME_LEN {
        return Err(FrameError::Length {
            expected: FRAME_LEN,
            actual: frame.len(),
        });
    }

    let mut buf = frame;
    let mut digest = [0u8; DIGEST_LEN];
    buf.copy_to_slice(&mut digest);

    let time = buf.get_u32();
    let latitude = buf.get_i32();
    let ns = buf.get_u8();
    let longitude = buf.get_i32();
    let ew = buf.get_u8();
    let altitude = buf.get_i16();
    buf.advance(1); // reserved

    Ok(FramePayload {
        digest,
        time,
        latitude,
        ns,
        longitude,
        ew,
        altitude,
        temperature: buf.get_i16(),
        humidity: buf.get_i16(),
        pressure: buf.get_i16(),
        gas: buf.get_i16(),
        accel_x: buf.get_i16(),
        accel_y: buf.get_i16(),
        accel_z: buf.get_i16(),
        device_id: buf.get_u8(),
        uptime: buf.get_u32(),
    })
}

/// Decode a frame straight to a record
///
/// # Errors
///
/// Returns `FrameError::Length` if the buffer is not a whole frame
pub fn unpack_record(frame: &[u8]) -> Result<TelemetryRecord, FrameError> {
    unpack(frame).map(|payload| payload.to_record())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::OverflowPolicy;
    use crate::wire::digest::digest_canonical;
    use crate::wire::encoder::pack;

    fn sample_record() -> TelemetryRecord {
        TelemetryRecord {
            time: 1_748_525_252,
            uptime: 61,
            latitude: -27.500_187,
            longitude: 153.014_13,
            altitude: 31.0,
            ns: b'S',
            ew: b'E',
            temperature: 2555,
            humidity: 5850,
            pressure: 1021,
            gas: 1400,
            accel_x: 38,
            accel_y: -268,
            accel_z: -9690,
            device_id: 4,
        }
    }

    #[test]
    fn test_unpack_inverts_pack() {
        let record = sample_record();
        let frame = pack(&record, OverflowPolicy::Wrap);

        let decoded = unpack(frame.as_bytes()).unwrap();
        assert_eq!(decoded, FramePayload::from_record(&record, OverflowPolicy::Wrap));
    }

    #[test]
    fn test_digest_matches_independent_rendering() {
        let record = sample_record();
        let decoded = unpack(pack(&record, OverflowPolicy::Wrap).as_bytes()).unwrap();

        // Rebuilt from the decoded strings, as an auditor would
        let text = format!(
            "\"payload\":{{\"timestamp\":\"2025-05-29T13:27:32\",\"uptime\":\"61\",\
             \"location\":{{\"latitude\":\"{:.7}\",\"ns\":\"S\",\"longitude\":\"{:.7}\",\"ew\":\"E\",\"altitude_m\":\"31.0\"}},\
             \"environment\":{{\"temperature_c\":\"25.55\",\"humidity_percent\":\"58.50\",\"pressure_hpa\":\"102.1\",\"gas_ppm\":\"14.00\"}},\
             \"acceleration\":{{\"x_mps2\":\"0.038\",\"y_mps2\":\"-0.268\",\"z_mps2\":\"-9.690\"}}}}",
            decoded.latitude as f64 / 1e7,
            decoded.longitude as f64 / 1e7,
        );

        assert_eq!(decoded.digest, digest_canonical(&text));
    }

    #[test]
    fn test_unpack_record_keeps_integer_fields_exact() {
        let record = sample_record();
        let decoded = unpack_record(pack(&record, OverflowPolicy::Wrap).as_bytes()).unwrap();

        assert_eq!(decoded.time, record.time);
        assert_eq!(decoded.uptime, record.uptime);
        assert_eq!(decoded.temperature, record.temperature);
        assert_eq!(decoded.accel_z, record.accel_z);
        assert_eq!(decoded.device_id, record.device_id);
        assert_eq!(decoded.ns, b'S');
        assert!((decoded.latitude - record.latitude).abs() < 1e-5);
        assert!((decoded.altitude - record.altitude).abs() < 0.1);
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        assert_eq!(
            unpack(&[0u8; FRAME_LEN - 4]),
            Err(FrameError::Length {
                expected: FRAME_LEN,
                actual: FRAME_LEN - 4
            })
        );
        assert!(unpack(&[0u8; FRAME_LEN + 1]).is_err());
        assert!(unpack(&[]).is_err());
    }

    #[test]
    fn test_unpack_does_not_verify_digest() {
        let mut bytes = pack(&sample_record(), OverflowPolicy::Wrap).0;
        bytes[0] ^= 0xFF;

        let decoded = unpack(&bytes).unwrap();
        assert_eq!(decoded.temperature, 2555);
    }
}
