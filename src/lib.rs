//! # Dongle Telemetry Library
//!
//! Read live fitness-sensor telemetry from a USB serial dongle.
//!
//! This library provides the ingest pipeline behind the trainer dashboard: the
//! dongle prints one JSON frame per line for heart-rate straps, power meters,
//! smart trainers and simulation changes. Frames are classified into metric
//! samples and device signal reports, then kept in a rolling time-series
//! buffer that the HTTP layer queries.

pub mod buffer;
pub mod config;
pub mod error;
pub mod protocol;
pub mod router;
pub mod serial;
pub mod service;
pub mod telemetry;
pub mod worker;
