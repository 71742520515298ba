//! # Motion Detector
//!
//! Samples the accelerometer at its data rate and raises a motion wake when
//! any axis goes above its threshold.

use std::time::Duration;

use tracing::debug;

use super::scheduler::{WakeReason, WakeSource};
use crate::error::SensorReadError;

/// Per-axis thresholds in m/s²
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionThreshold {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for MotionThreshold {
    fn default() -> Self {
        Self {
            x: 2.0,
            y: 2.0,
            z: 10.0,
        }
    }
}

impl MotionThreshold {
    /// Signed comparison per axis, as the accelerometer interrupt does
    pub fn exceeded_by(&self, x: f64, y: f64, z: f64) -> bool {
        x > self.x || y > self.y || z > self.z
    }
}

/// Acceleration source sampled by the detector
pub trait Accelerometer: Send {
    /// One (x, y, z) sample in m/s²
    fn sample(&mut self) -> Result<(f64, f64, f64), SensorReadError>;
}

/// Accelerometer at rest that registers a jolt every `jolt_every` samples
#[derive(Debug, Clone)]
pub struct SimulatedAccelerometer {
    samples: u64,
    jolt_every: u64,
}

impl SimulatedAccelerometer {
    pub fn new(jolt_every: u64) -> Self {
        Self {
            samples: 0,
            jolt_every,
        }
    }
}

impl Accelerometer for SimulatedAccelerometer {
    fn sample(&mut self) -> Result<(f64, f64, f64), SensorReadError> {
        self.samples += 1;
        if self.jolt_every > 0 && self.samples % self.jolt_every == 0 {
            Ok((3.4, 0.6, 11.2))
        } else {
            Ok((0.05, -0.12, 9.81))
        }
    }
}

/// Sample `accel` every `period` until the scheduler goes away
pub async fn watch_motion<A: Accelerometer>(
    mut accel: A,
    threshold: MotionThreshold,
    period: Duration,
    wake: WakeSource,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        if wake.is_closed() {
            break;
        }

        match accel.sample() {
            Ok((x, y, z)) if threshold.exceeded_by(x, y, z) => {
                debug!("Motion detected: x={:.3} y={:.3} z={:.3}", x, y, z);
                wake.raise(WakeReason::Motion);
            }
            Ok(_) => {}
            Err(e) => debug!("Accelerometer sample failed: {}", e),
        }
    }
    debug!("Motion watcher stopped");
}
