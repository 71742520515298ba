//! # Frame Encoder
//!
//! Packs stored records into wire frames.

use bytes::BufMut;

use super::protocol::*;
use crate::record::{OverflowPolicy, TelemetryRecord};

/// Pack a stored record into a frame
///
/// Computes the digest over the canonical rendering first, then writes the
/// fixed-point fields at their fixed offsets.
///
/// # Arguments
///
/// * `record` - Record read back from the ring log
/// * `policy` - Narrowing rule for fields that do not fit 16 bits
///
/// # Returns
///
/// * `WireFrame` - 68-byte frame
///
/// # Examples
///
/// ```no_run
/// use field_tracker::record::{OverflowPolicy, TelemetryRecord};
/// use field_tracker::wire::encoder::pack;
///
/// # fn frame(record: TelemetryRecord) {
/// let frame = pack(&record, OverflowPolicy::Wrap);
/// assert_eq!(frame.as_bytes().len(), 68);
/// # }
/// ```
pub fn pack(record: &TelemetryRecord, policy: OverflowPolicy) -> WireFrame {
    encode_payload(&FramePayload::from_record(record, policy))
}

/// Serialize an already converted payload
pub fn encode_payload(payload: &FramePayload) -> WireFrame {
    let mut frame = [0u8; FRAME_LEN];
    let mut buf = &mut frame[..];

    buf.put_slice(&payload.digest);
    buf.put_u32(payload.time);
    buf.put_i32(payload.latitude);
    buf.put_u8(payload.ns);
    buf.put_i32(payload.longitude);
    buf.put_u8(payload.ew);
    buf.put_i16(payload.altitude);
    buf.put_u8(0); // reserved
    buf.put_i16(payload.temperature);
    buf.put_i16(payload.humidity);
    buf.put_i16(payload.pressure);
    buf.put_i16(payload.gas);
    buf.put_i16(payload.accel_x);
    buf.put_i16(payload.accel_y);
    buf.put_i16(payload.accel_z);
    buf.put_u8(payload.device_id);
    buf.put_u32(payload.uptime);

    WireFrame(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::digest::canonical_digest;

    fn sample_record() -> TelemetryRecord {
        TelemetryRecord {
            time: 0x6838_6044,
            uptime: 0x0102_0304,
            latitude: 37.77,
            longitude: -122.42,
            altitude: 12.3,
            ns: b'N',
            ew: b'W',
            temperature: 2350,
            humidity: 4567,
            pressure: 10132,
            gas: 5230,
            accel_x: -900,
            accel_y: 200,
            accel_z: 985,
            device_id: 9,
        }
    }

    #[test]
    fn test_frame_length() {
        let frame = pack(&sample_record(), OverflowPolicy::Wrap);
        assert_eq!(frame.as_bytes().len(), FRAME_LEN);
    }

    #[test]
    fn test_big_endian_fields_at_fixed_offsets() {
        let frame = pack(&sample_record(), OverflowPolicy::Wrap);
        let bytes = frame.as_bytes();

        assert_eq!(&bytes[OFFSET_TIME..OFFSET_TIME + 4], &[0x68, 0x38, 0x60, 0x44]);
        assert_eq!(bytes[OFFSET_NS], b'N');
        assert_eq!(bytes[OFFSET_EW], b'W');
        assert_eq!(&bytes[OFFSET_ALTITUDE..OFFSET_ALTITUDE + 2], &123i16.to_be_bytes());
        assert_eq!(bytes[OFFSET_RESERVED], 0);
        assert_eq!(
            &bytes[OFFSET_TEMPERATURE..OFFSET_TEMPERATURE + 2],
            &2350i16.to_be_bytes()
        );
        assert_eq!(&bytes[61..63], &985i16.to_be_bytes());
        assert_eq!(bytes[OFFSET_DEVICE_ID], 9);
        assert_eq!(&bytes[OFFSET_UPTIME..], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_digest_leads_the_frame() {
        let record = sample_record();
        let frame = pack(&record, OverflowPolicy::Wrap);
        let payload = FramePayload::from_record(&record, OverflowPolicy::Wrap);

        assert_eq!(&frame.as_bytes()[..DIGEST_LEN], &canonical_digest(&payload));
    }

    #[test]
    fn test_pack_is_deterministic() {
        let record = sample_record();
        assert_eq!(
            pack(&record, OverflowPolicy::Wrap),
            pack(&record, OverflowPolicy::Wrap)
        );
    }
}
