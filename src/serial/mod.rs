//! # Serial Uplink Module
//!
//! Forwards decoded records from the gateway to the gateway server over a
//! serial port.
//!
//! This module handles:
//! - Opening the uplink port (8N1, no flow control)
//! - Wrapping each record in the uplink JSON envelope
//! - Writing one JSON line per record

pub mod envelope;
pub mod port_trait;

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::transport::link::RecordSink;
use crate::transport::slots::SlotId;
use crate::wire::FramePayload;
use envelope::Envelope;
use port_trait::{SerialPortIO, TokioSerialPort};

/// Default uplink baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial baud rates the uplink accepts
pub const SUPPORTED_BAUD_RATES: &[u32] = &[9600, 57600, 115_200, 230_400, 460_800, 921_600];

/// Uplink device paths to try when none is configured
pub const DEFAULT_DEVICE_PATHS: &[&str] = &["/dev/ttyACM0", "/dev/ttyUSB0"];

/// Record sink writing uplink envelopes to a serial port
pub struct GatewayUplink<P: SerialPortIO> {
    port: P,
    gateway_id: String,
    device_path: String,
    forwarded: u64,
}

impl<P: SerialPortIO> std::fmt::Debug for GatewayUplink<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayUplink")
            .field("gateway_id", &self.gateway_id)
            .field("device_path", &self.device_path)
            .field("forwarded", &self.forwarded)
            .finish_non_exhaustive()
    }
}

impl GatewayUplink<TokioSerialPort> {
    /// Open the first usable port among `paths`
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try in order (e.g., &["/dev/ttyACM0"])
    /// * `baud_rate` - Line speed
    /// * `gateway_id` - Identifier stamped into every envelope header
    ///
    /// # Returns
    ///
    /// * `Result<GatewayUplink>` - Uplink on the first port that opened
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` if no path could be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use field_tracker::serial::GatewayUplink;
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let uplink = GatewayUplink::open_with_paths(&["/dev/ttyUSB0"], 115_200, "GW-01")?;
    ///     println!("Uplink on {}", uplink.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open_with_paths(paths: &[&str], baud_rate: u32, gateway_id: &str) -> Result<Self> {
        for path in paths {
            debug!("Trying to open uplink port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Uplink opened at {} ({} baud)", path, baud_rate);
                    return Ok(Self::with_port(
                        TokioSerialPort::new(port),
                        gateway_id,
                        path,
                    ));
                }
                Err(e) => warn!("Failed to open {}: {}", path, e),
            }
        }

        Err(TrackerError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TrackerError::Serial(format!("Failed to open {}: {}", path, e)))
    }
}

impl<P: SerialPortIO> GatewayUplink<P> {
    /// Uplink over an already opened port
    pub fn with_port(port: P, gateway_id: &str, device_path: &str) -> Self {
        Self {
            port,
            gateway_id: gateway_id.to_string(),
            device_path: device_path.to_string(),
            forwarded: 0,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Envelopes written successfully
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Write one envelope line
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the write or flush fails
    pub async fn forward(&mut self, envelope: &Envelope) -> Result<()> {
        let line = envelope.to_json_line()?;
        self.port
            .send_line(&line)
            .await
            .map_err(|e| TrackerError::Serial(format!("Failed to write envelope: {}", e)))?;

        self.forwarded += 1;
        debug!(
            "Forwarded {} from {} ({} bytes)",
            envelope.header.message_id,
            envelope.payload.device_id,
            line.len()
        );
        Ok(())
    }
}

#[async_trait]
impl<P: SerialPortIO> RecordSink for GatewayUplink<P> {
    async fn deliver(&mut self, slot: SlotId, payload: &FramePayload) -> Result<()> {
        let envelope = Envelope::new(&self.gateway_id, payload);
        debug!("Slot {} record wrapped as {}", slot, envelope.header.message_id);
        self.forward(&envelope).await
    }
}
