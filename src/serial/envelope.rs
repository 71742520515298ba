//! Gateway uplink message format
//!
//! One JSON object per record, written as a single line. The `payload` object
//! carries the same string renderings the tracker hashed, so a downstream
//! auditor can rebuild the canonical snippet from it and compare against
//! `signature.value`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::wire::digest::{digest_canonical, RenderedFields};
use crate::wire::FramePayload;

pub const SCHEMA_VERSION: &str = "1.0";
pub const MESSAGE_TYPE: &str = "telemetry";
pub const SIGNATURE_ALG: &str = "HS256";
pub const SIGNATURE_KEY_ID: &str = "key-001";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub message_id: String,
    pub gateway_id: String,
    pub schema_version: String,
    pub message_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: String,
    pub ns: String,
    pub longitude: String,
    pub ew: String,
    pub altitude_m: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub temperature_c: String,
    pub humidity_percent: String,
    pub pressure_hpa: String,
    pub gas_ppm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x_mps2: String,
    pub y_mps2: String,
    pub z_mps2: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub device_id: String,
    pub timestamp: String,
    pub uptime: String,
    pub location: Location,
    pub environment: Environment,
    pub acceleration: Acceleration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub alg: String,
    pub key_id: String,
    /// Uppercase hex of the frame digest
    pub value: String,
}

/// Complete uplink message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    pub payload: Payload,
    pub signature: Signature,
}

impl Envelope {
    /// Wrap a decoded frame under a fresh message ID
    pub fn new(gateway_id: &str, frame: &FramePayload) -> Self {
        let fields = RenderedFields::from_payload(frame);
        Self {
            header: Header {
                message_id: Uuid::new_v4().to_string(),
                gateway_id: gateway_id.to_string(),
                schema_version: SCHEMA_VERSION.to_string(),
                message_type: MESSAGE_TYPE.to_string(),
            },
            payload: Payload {
                device_id: format!("dev-{}", frame.device_id),
                timestamp: fields.timestamp,
                uptime: fields.uptime,
                location: Location {
                    latitude: fields.latitude,
                    ns: fields.ns,
                    longitude: fields.longitude,
                    ew: fields.ew,
                    altitude_m: fields.altitude_m,
                },
                environment: Environment {
                    temperature_c: fields.temperature_c,
                    humidity_percent: fields.humidity_percent,
                    pressure_hpa: fields.pressure_hpa,
                    gas_ppm: fields.gas_ppm,
                },
                acceleration: Acceleration {
                    x_mps2: fields.x_mps2,
                    y_mps2: fields.y_mps2,
                    z_mps2: fields.z_mps2,
                },
            },
            signature: Signature {
                alg: SIGNATURE_ALG.to_string(),
                key_id: SIGNATURE_KEY_ID.to_string(),
                value: frame.digest_hex(),
            },
        }
    }

    /// Serialize as one newline-terminated JSON line
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Recompute the digest from the rendered payload strings
    ///
    /// This is the check a downstream auditor runs; the gateway itself does
    /// not verify digests.
    pub fn audit_digest(&self) -> String {
        let p = &self.payload;
        let fields = RenderedFields {
            timestamp: p.timestamp.clone(),
            uptime: p.uptime.clone(),
            latitude: p.location.latitude.clone(),
            ns: p.location.ns.clone(),
            longitude: p.location.longitude.clone(),
            ew: p.location.ew.clone(),
            altitude_m: p.location.altitude_m.clone(),
            temperature_c: p.environment.temperature_c.clone(),
            humidity_percent: p.environment.humidity_percent.clone(),
            pressure_hpa: p.environment.pressure_hpa.clone(),
            gas_ppm: p.environment.gas_ppm.clone(),
            x_mps2: p.acceleration.x_mps2.clone(),
            y_mps2: p.acceleration.y_mps2.clone(),
            z_mps2: p.acceleration.z_mps2.clone(),
        };
        hex::encode_upper(digest_canonical(&fields.canonical()))
    }
}
