//! Trait abstraction for sensor drivers to enable testing
//!
//! [`SimulatedSensors`] stands in for the environment, motion and GNSS
//! drivers on the host.

use chrono::Utc;

use crate::error::SensorReadError;
use crate::record::{EnvironmentReading, PositionFix};

/// Sensor drivers consumed by the capture scheduler
#[cfg_attr(test, mockall::automock)]
pub trait SensorSource: Send {
    /// Temperature, humidity, pressure, gas and acceleration
    fn fetch_all_readings(&mut self) -> Result<EnvironmentReading, SensorReadError>;

    /// Current GNSS fix
    fn fetch_position(&mut self) -> Result<PositionFix, SensorReadError>;
}

/// A fix reporting no satellites is not a fix
pub fn require_fix(fix: PositionFix) -> Result<PositionFix, SensorReadError> {
    if fix.satellites == 0 {
        return Err(SensorReadError::NoFix);
    }
    Ok(fix)
}

/// Current Unix time in seconds
fn unix_now() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(0)
}

/// Host stand-in for the tracker's drivers
///
/// Starts from a fixed reading and steps temperature, humidity and pressure
/// by 0.1 per sample. Failures can be injected to exercise retry paths.
#[derive(Debug, Clone)]
pub struct SimulatedSensors {
    reading: EnvironmentReading,
    fix: PositionFix,
    reading_failures: u32,
    fix_losses: u32,
}

impl SimulatedSensors {
    /// Sensors for simulated tracker `index`; each index sits slightly
    /// further north-east
    pub fn new(index: u8) -> Self {
        let offset = f32::from(index) * 0.001;
        Self {
            reading: EnvironmentReading {
                temperature_c: 23.50,
                humidity_percent: 45.67,
                pressure_hpa: 1013.2,
                gas: 52.3,
                accel_x: -0.900,
                accel_y: 0.200,
                accel_z: 0.985,
            },
            fix: PositionFix {
                time: 0,
                latitude: 37.77 + offset,
                ns: b'N',
                longitude: -122.42 + offset,
                ew: b'W',
                altitude: 12.3,
                satellites: 7,
            },
            reading_failures: 0,
            fix_losses: 0,
        }
    }

    /// Make the next `count` environment reads fail
    pub fn fail_next_readings(&mut self, count: u32) {
        self.reading_failures = count;
    }

    /// Report no satellites for the next `count` position reads
    pub fn lose_fix_for(&mut self, count: u32) {
        self.fix_losses = count;
    }
}

impl SensorSource for SimulatedSensors {
    fn fetch_all_readings(&mut self) -> Result<EnvironmentReading, SensorReadError> {
        if self.reading_failures > 0 {
            self.reading_failures -= 1;
            return Err(SensorReadError::Io("simulated bus error".to_string()));
        }

        let reading = self.reading;
        self.reading.temperature_c += 0.1;
        self.reading.humidity_percent += 0.1;
        self.reading.pressure_hpa += 0.1;
        Ok(reading)
    }

    fn fetch_position(&mut self) -> Result<PositionFix, SensorReadError> {
        let mut fix = self.fix;
        fix.time = unix_now();
        if self.fix_losses > 0 {
            self.fix_losses -= 1;
            fix.satellites = 0;
        }
        require_fix(fix)
    }
}
