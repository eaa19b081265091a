//! # Dongle Telemetry Protocol Module
//!
//! The dongle prints one JSON object per line:
//! `{"type": "hr"|"cp"|"ftms"|"sim", "ts": <ms since boot>, ...numeric fields...}`.
//!
//! This module handles:
//! - Metric, device and event type definitions
//! - Frame classification by `type` tag
//! - Tolerant field coercion (bad fields drop one event, never the frame)

pub mod types;
pub mod decoder;
