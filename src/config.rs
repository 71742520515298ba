//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::capture::{CaptureSettings, MotionThreshold};
use crate::error::{Result, TrackerError};
use crate::record::{OverflowPolicy, RECORD_SIZE};
use crate::serial::SUPPORTED_BAUD_RATES;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub device: DeviceConfig,
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub motion: MotionConfig,
    pub transport: TransportConfig,
    pub uplink: UplinkConfig,
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tracker identity
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub device_id: u8,
}

/// Flash region backing the ring log
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Flash image file; empty keeps the region in memory
    #[serde(default)]
    pub image_path: String,

    #[serde(default = "default_region_size")]
    pub region_size: usize,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_write_block_size")]
    pub write_block_size: usize,
}

/// Timer-driven capture
#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_interval_s")]
    pub interval_s: u64,

    #[serde(default = "default_sensor_retries")]
    pub sensor_retries: u32,

    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Accelerometer wake thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct MotionConfig {
    #[serde(default = "default_motion_enabled")]
    pub enabled: bool,

    #[serde(default = "default_xy_threshold")]
    pub x_threshold: f64,

    #[serde(default = "default_xy_threshold")]
    pub y_threshold: f64,

    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,

    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

/// Collector limits
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Serial uplink to the gateway server
#[derive(Debug, Deserialize, Clone)]
pub struct UplinkConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_uplink_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_gateway_id")]
    pub gateway_id: String,
}

/// Host harness with simulated trackers
#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_trackers")]
    pub trackers: usize,

    /// Have the collector hand out distinct device IDs on first subscription
    #[serde(default = "default_assign_device_ids")]
    pub assign_device_ids: bool,

    /// Accelerometer samples between simulated jolts (0 never jolts)
    #[serde(default = "default_jolt_every")]
    pub jolt_every: u64,
}

/// Log output
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_device_id() -> u8 { 1 }

fn default_region_size() -> usize { 0x80000 }
fn default_page_size() -> usize { 4096 }
fn default_write_block_size() -> usize { 4 }

fn default_interval_s() -> u64 { 30 }
fn default_sensor_retries() -> u32 { 5 }

fn default_motion_enabled() -> bool { true }
fn default_xy_threshold() -> f64 { 2.0 }
fn default_z_threshold() -> f64 { 10.0 }
fn default_sample_interval_ms() -> u64 { 1000 }

fn default_queue_capacity() -> usize { 10 }
fn default_max_connections() -> usize { 4 }

fn default_uplink_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_gateway_id() -> String { "GW-01".to_string() }

fn default_trackers() -> usize { 2 }
fn default_assign_device_ids() -> bool { true }
fn default_jolt_every() -> u64 { 15 }

fn invalid(message: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use field_tracker::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Capture behaviour for the scheduler
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            device_id: self.device.device_id,
            sensor_retries: self.capture.sensor_retries,
            overflow: self.capture.overflow,
        }
    }

    pub fn motion_threshold(&self) -> MotionThreshold {
        MotionThreshold {
            x: self.motion.x_threshold,
            y: self.motion.y_threshold,
            z: self.motion.z_threshold,
        }
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture.interval_s)
    }

    pub fn motion_sample_interval(&self) -> Duration {
        Duration::from_millis(self.motion.sample_interval_ms)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Flash geometry
        let storage = &self.storage;
        if storage.page_size == 0 || storage.page_size % RECORD_SIZE != 0 {
            return Err(invalid(format!(
                "page_size must be a non-zero multiple of the {}-byte record",
                RECORD_SIZE
            )));
        }

        if storage.write_block_size == 0 || storage.page_size % storage.write_block_size != 0 {
            return Err(invalid("page_size must be a multiple of write_block_size"));
        }

        if RECORD_SIZE % storage.write_block_size != 0 {
            return Err(invalid(format!(
                "write_block_size must divide the {}-byte record",
                RECORD_SIZE
            )));
        }

        if storage.region_size % storage.page_size != 0 {
            return Err(invalid("region_size must be a multiple of page_size"));
        }

        // Two metadata pages plus two record pages
        if storage.region_size < 4 * storage.page_size {
            return Err(invalid("region_size must hold at least four pages"));
        }

        // Capture
        if self.capture.interval_s == 0 || self.capture.interval_s > 86400 {
            return Err(invalid("interval_s must be between 1 and 86400"));
        }

        if self.capture.sensor_retries == 0 || self.capture.sensor_retries > 20 {
            return Err(invalid("sensor_retries must be between 1 and 20"));
        }

        // Motion
        for (name, value) in [
            ("x_threshold", self.motion.x_threshold),
            ("y_threshold", self.motion.y_threshold),
            ("z_threshold", self.motion.z_threshold),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("{} must be a finite number", name)));
            }
        }

        if self.motion.sample_interval_ms == 0 || self.motion.sample_interval_ms > 60000 {
            return Err(invalid("sample_interval_ms must be between 1 and 60000"));
        }

        // Transport
        if self.transport.queue_capacity == 0 || self.transport.queue_capacity > 100 {
            return Err(invalid("queue_capacity must be between 1 and 100"));
        }

        if self.transport.max_connections == 0 || self.transport.max_connections > 16 {
            return Err(invalid("max_connections must be between 1 and 16"));
        }

        // Uplink
        if self.uplink.enabled && self.uplink.port.is_empty() {
            return Err(invalid("uplink port cannot be empty when enabled"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.uplink.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {}",
                SUPPORTED_BAUD_RATES
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        if self.uplink.gateway_id.is_empty() {
            return Err(invalid("gateway_id cannot be empty"));
        }

        // Simulation
        if self.simulation.trackers == 0 || self.simulation.trackers > self.transport.max_connections {
            return Err(invalid("trackers must be between 1 and max_connections"));
        }

        if self.simulation.assign_device_ids
            && usize::from(self.device.device_id) + self.simulation.trackers > 256
        {
            return Err(invalid("assigned device IDs would exceed 255"));
        }

        if matches!(&self.logging.dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging dir cannot be empty when set"));
        }

        Ok(())
    }
}
