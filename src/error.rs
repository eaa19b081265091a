//! # Error Types
//!
//! Custom error types for the dongle telemetry service using `thiserror`.

use thiserror::Error;

/// Main error type for the dongle telemetry service
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Serial port open/configuration errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker did not stop within the join deadline
    #[error("Shutdown timed out: {0}")]
    ShutdownTimeout(String),

    /// A worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Worker(String),
}


/// Result type alias for the dongle telemetry service
pub type Result<T> = std::result::Result<T, TelemetryError>;
