//! # Capture Module
//!
//! Tracker-side acquisition and delivery.
//!
//! This module handles:
//! - Sensor and GNSS acquisition with bounded retries
//! - Motion detection against per-axis thresholds
//! - The wake-driven scheduler that appends records and drains them to the link

pub mod retry;
pub mod sensors;
pub mod motion;
pub mod scheduler;

pub use motion::{watch_motion, Accelerometer, MotionThreshold, SimulatedAccelerometer};
pub use sensors::{SensorSource, SimulatedSensors};
pub use scheduler::{
    run_timer, wake_channel, CaptureScheduler, CaptureSettings, WakeReason, WakeSource,
};
