//! # Error Types
//!
//! Custom error types for the field tracker pipeline using `thiserror`.

use thiserror::Error;

/// Flash storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backing device could not be opened or is not ready
    #[error("storage device not ready: {0}")]
    DeviceNotReady(String),

    /// Access outside the device's address space
    #[error("access out of bounds: address 0x{address:08X}, length {len}")]
    OutOfBounds { address: u32, len: usize },

    /// Address or length not aligned to the device's write block or page
    #[error("misaligned access: address 0x{address:08X}, length {len}, granularity {granularity}")]
    Misaligned { address: u32, len: usize, granularity: usize },

    /// Write targeted bytes that were not erased since their last write
    #[error("write to unerased flash at 0x{address:08X}")]
    WriteWithoutErase { address: u32 },

    /// Persisted metadata belongs to a different record layout
    #[error("ring log layout mismatch: found version {found_version} stride {found_stride}, expected version {expected_version} stride {expected_stride}")]
    LayoutMismatch {
        found_version: u16,
        found_stride: u16,
        expected_version: u16,
        expected_stride: u16,
    },

    /// Persisted metadata points outside the record region or is inconsistent
    #[error("corrupt ring log metadata: {0}")]
    CorruptMetadata(String),

    /// Geometry that the ring log cannot operate on
    #[error("invalid storage geometry: {0}")]
    Geometry(String),

    /// Underlying file I/O failure
    #[error("flash I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed stored record bytes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Buffer length differs from the fixed record size
    #[error("record length mismatch: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    /// Slot reads back as erased flash
    #[error("record slot is blank")]
    Blank,
}

/// Malformed wire frames
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer length differs from the fixed frame size
    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// Sensor and GNSS acquisition failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorReadError {
    /// Driver reported an I/O failure
    #[error("sensor read failed: {0}")]
    Io(String),

    /// GNSS reported no satellites in view
    #[error("no GNSS fix")]
    NoFix,
}

/// Radio stack failures on the collector side
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Radio stack rejected a request
    #[error("radio request failed: {0}")]
    Request(String),

    /// Attribute discovery did not find the requested attribute
    #[error("attribute discovery failed: {0}")]
    Discovery(String),

    /// Link is not (or no longer) connected
    #[error("link not connected")]
    NotConnected,
}

/// Main error type for the field tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Flash storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Stored record format errors
    #[error("record format error: {0}")]
    Format(#[from] FormatError),

    /// Wire frame errors
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Sensor acquisition errors
    #[error("sensor error: {0}")]
    Sensor(#[from] SensorReadError),

    /// Radio errors
    #[error("radio error: {0}")]
    Radio(#[from] RadioError),

    /// Hand-off queue saturated, frame dropped
    #[error("hand-off queue full, frame dropped")]
    QueueFull,

    /// Hand-off queue consumer is gone
    #[error("hand-off queue closed")]
    QueueClosed,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("serial error: {0}")]
    Serial(String),

    /// No usable serial port
    #[error("serial port not found: {0}")]
    SerialPortNotFound(String),

    /// Uplink rendering errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the field tracker
pub type Result<T> = std::result::Result<T, TrackerError>;
