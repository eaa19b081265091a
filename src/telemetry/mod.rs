//! # Telemetry Module
//!
//! Handles raw serial line logging with rotation.
//!
//! This module handles:
//! - Appending every decoded line to a text log
//! - Rotating the previous session's log at start-up
//! - Retaining only the last N backups

pub mod raw_log;
