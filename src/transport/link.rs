//! Trait abstractions for both ends of the radio link to enable testing

use async_trait::async_trait;
use tracing::info;

use super::slots::SlotId;
use crate::error::Result;
use crate::wire::digest::RenderedFields;
use crate::wire::{FramePayload, WireFrame};

/// Tracker side of a link: sends frames to the subscribed collector
#[async_trait]
pub trait FrameLink: Send {
    /// A collector is connected and subscribed to notifications
    fn is_connected(&self) -> bool;

    /// Send one frame as a characteristic notification
    async fn notify(&mut self, frame: &WireFrame) -> Result<()>;

    /// Device ID written to the characteristic since the last call
    fn take_device_id(&mut self) -> Option<u8>;
}

/// Collector side: receives every decoded frame
#[async_trait]
pub trait RecordSink: Send {
    async fn deliver(&mut self, slot: SlotId, payload: &FramePayload) -> Result<()>;
}

/// Sink that writes decoded records to the log
#[derive(Debug, Default)]
pub struct LogSink {
    delivered: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

#[async_trait]
impl RecordSink for LogSink {
    async fn deliver(&mut self, slot: SlotId, payload: &FramePayload) -> Result<()> {
        let fields = RenderedFields::from_payload(payload);
        self.delivered += 1;
        info!(
            "[TRACKER {}] dev={} {} up={}s | {} {} {} {} alt {} m | {} C {} % {} hPa gas {} | accel {} {} {}",
            slot,
            payload.device_id,
            fields.timestamp,
            fields.uptime,
            fields.latitude,
            fields.ns,
            fields.longitude,
            fields.ew,
            fields.altitude_m,
            fields.temperature_c,
            fields.humidity_percent,
            fields.pressure_hpa,
            fields.gas_ppm,
            fields.x_mps2,
            fields.y_mps2,
            fields.z_mps2,
        );
        Ok(())
    }
}
