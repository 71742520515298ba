//! # Field Tracker Library
//!
//! Persistent telemetry pipeline for a battery-powered field tracker and the
//! gateway that collects from it over BLE.
//!
//! This library provides the tracker side (sensor capture into a flash ring
//! log, drained as integrity-tagged frames over the radio link) and the
//! gateway side (multi-link collector, frame decoding, serial uplink).

pub mod config;
pub mod error;
pub mod record;
pub mod storage;
pub mod wire;
pub mod capture;
pub mod transport;
pub mod serial;
