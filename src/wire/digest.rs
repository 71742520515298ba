//! # Frame Integrity Digest
//!
//! SHA-256 over the canonical text rendering of a frame's payload.
//!
//! The rendering is the `"payload":{...}` JSON snippet the tracker firmware
//! prints, with every value quoted and formatted from the fixed-point wire
//! fields. An auditor holding only the forwarded JSON strings can rebuild the
//! same bytes and check the digest.
//!
//! The snippet is written into a [`CANONICAL_BUFFER_LEN`]-byte buffer,
//! NUL-padded, and truncated to `CANONICAL_BUFFER_LEN - 1` bytes when longer.
//! The whole buffer is hashed.

use chrono::DateTime;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::protocol::{FramePayload, DIGEST_LEN};

/// Size of the buffer the canonical rendering is hashed in
pub const CANONICAL_BUFFER_LEN: usize = 352;

/// Payload values rendered as the strings that appear in the canonical snippet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedFields {
    pub timestamp: String,
    pub uptime: String,
    pub latitude: String,
    pub ns: String,
    pub longitude: String,
    pub ew: String,
    pub altitude_m: String,
    pub temperature_c: String,
    pub humidity_percent: String,
    pub pressure_hpa: String,
    pub gas_ppm: String,
    pub x_mps2: String,
    pub y_mps2: String,
    pub z_mps2: String,
}

impl RenderedFields {
    /// Render every payload field
    pub fn from_payload(payload: &FramePayload) -> Self {
        let (x, y, z) = payload.acceleration();
        Self {
            timestamp: format_timestamp(payload.time),
            uptime: payload.uptime.to_string(),
            latitude: format!("{:.7}", payload.latitude_deg()),
            ns: char::from(payload.ns).to_string(),
            longitude: format!("{:.7}", payload.longitude_deg()),
            ew: char::from(payload.ew).to_string(),
            altitude_m: format!("{:.1}", payload.altitude_m()),
            temperature_c: format!("{:.2}", payload.temperature_c()),
            humidity_percent: format!("{:.2}", payload.humidity_percent()),
            pressure_hpa: format!("{:.1}", payload.pressure_hpa()),
            gas_ppm: format!("{:.2}", payload.gas_units()),
            x_mps2: format!("{:.3}", x),
            y_mps2: format!("{:.3}", y),
            z_mps2: format!("{:.3}", z),
        }
    }

    /// The canonical `"payload":{...}` snippet
    pub fn canonical(&self) -> String {
        format!(
            concat!(
                "\"payload\":{{",
                "\"timestamp\":\"{}\",",
                "\"uptime\":\"{}\",",
                "\"location\":{{",
                "\"latitude\":\"{}\",",
                "\"ns\":\"{}\",",
                "\"longitude\":\"{}\",",
                "\"ew\":\"{}\",",
                "\"altitude_m\":\"{}\"",
                "}},",
                "\"environment\":{{",
                "\"temperature_c\":\"{}\",",
                "\"humidity_percent\":\"{}\",",
                "\"pressure_hpa\":\"{}\",",
                "\"gas_ppm\":\"{}\"",
                "}},",
                "\"acceleration\":{{",
                "\"x_mps2\":\"{}\",",
                "\"y_mps2\":\"{}\",",
                "\"z_mps2\":\"{}\"",
                "}}",
                "}}"
            ),
            self.timestamp,
            self.uptime,
            self.latitude,
            self.ns,
            self.longitude,
            self.ew,
            self.altitude_m,
            self.temperature_c,
            self.humidity_percent,
            self.pressure_hpa,
            self.gas_ppm,
            self.x_mps2,
            self.y_mps2,
            self.z_mps2,
        )
    }
}

/// `YYYY-MM-DDTHH:MM:SS` in UTC
pub fn format_timestamp(unix_seconds: u32) -> String {
    DateTime::from_timestamp(i64::from(unix_seconds), 0)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Canonical rendering of a payload; the digest field is not part of it
pub fn canonical_encoding(payload: &FramePayload) -> String {
    RenderedFields::from_payload(payload).canonical()
}

/// Hash a canonical rendering the way the firmware does
pub fn digest_canonical(text: &str) -> [u8; DIGEST_LEN] {
    let mut buffer = [0u8; CANONICAL_BUFFER_LEN];
    let bytes = text.as_bytes();
    let len = bytes.len().min(CANONICAL_BUFFER_LEN - 1);
    buffer[..len].copy_from_slice(&bytes[..len]);

    let mut hasher = Sha256::new();
    hasher.update(buffer);
    hasher.finalize().into()
}

/// Digest of a payload's canonical rendering
pub fn canonical_digest(payload: &FramePayload) -> [u8; DIGEST_LEN] {
    digest_canonical(&canonical_encoding(payload))
}
