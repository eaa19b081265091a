//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, TelemetryError};

/// Baud rates accepted for the dongle link
pub const SUPPORTED_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// Rolling buffer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    #[serde(default = "default_max_minutes")]
    pub max_minutes: u32,
}

/// Event router configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Raw line logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Empty disables raw line logging
    #[serde(default)]
    pub log_file: String,

    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

/// Shutdown configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ShutdownConfig {
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_reconnect_interval_ms() -> u64 { 2000 }
fn default_event_channel_capacity() -> usize { 4096 }

fn default_max_minutes() -> u32 { 60 }

fn default_poll_interval_ms() -> u64 { 100 }

fn default_max_backups() -> usize { 5 }

fn default_join_timeout_ms() -> u64 { 2000 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { max_minutes: default_max_minutes() }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { poll_interval_ms: default_poll_interval_ms() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: String::new(),
            max_backups: default_max_backups(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { join_timeout_ms: default_join_timeout_ms() }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl RouterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl LoggingConfig {
    /// Raw line log path, if logging is enabled
    pub fn log_file_path(&self) -> Option<PathBuf> {
        let trimmed = self.log_file.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

impl ShutdownConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
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
    /// use dongle_telemetry::config::Config;
    ///
    /// let config = Config::load("config.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    ///
    /// A file that exists but fails to parse or validate is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(TelemetryError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate serial port configuration
        if self.serial.port.trim().is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {}",
                SUPPORTED_BAUD_RATES
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        // Validate timing fields
        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.serial.reconnect_interval_ms == 0 || self.serial.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.serial.event_channel_capacity == 0 {
            return Err(invalid("event_channel_capacity must be greater than 0"));
        }

        if self.buffer.max_minutes == 0 || self.buffer.max_minutes > 1440 {
            return Err(invalid("max_minutes must be between 1 and 1440"));
        }

        if self.router.poll_interval_ms == 0 || self.router.poll_interval_ms > 10000 {
            return Err(invalid("poll_interval_ms must be between 1 and 10000"));
        }

        if self.logging.max_backups == 0 || self.logging.max_backups > 100 {
            return Err(invalid("max_backups must be between 1 and 100"));
        }

        // Workers only notice a stop request at their timeout boundaries
        if self.shutdown.join_timeout_ms <= self.serial.timeout_ms
            || self.shutdown.join_timeout_ms <= self.router.poll_interval_ms
        {
            return Err(invalid("join_timeout_ms must exceed timeout_ms and poll_interval_ms"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "/dev/ttyUSB0"
reconnect_interval_ms = 500

[buffer]
max_minutes = 5

[logging]
log_file = "logs/serial.log"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.reconnect_interval(), Duration::from_millis(500));
        assert_eq!(config.buffer.max_minutes, 5);
        assert_eq!(config.logging.log_file_path(), Some(PathBuf::from("logs/serial.log")));
        assert_eq!(config.router.poll_interval_ms, 100);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.buffer.max_minutes, 60);
        assert_eq!(config.logging.log_file_path(), None);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = Config::load("/nonexistent/dir/config.toml");
        assert!(matches!(result, Err(TelemetryError::Io(_))));
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let config = Config::load_or_default("/nonexistent/dir/config.toml").unwrap();
        assert_eq!(config.serial.baud_rate, 115200);
    }

    #[test]
    fn test_load_or_default_rejects_invalid_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[serial]\nbaud_rate = 1234\n").unwrap();
        temp_file.flush().unwrap();

        assert!(matches!(
            Config::load_or_default(temp_file.path()),
            Err(TelemetryError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(matches!(
            Config::from_toml_str("[serial\nport = "),
            Err(TelemetryError::Config(_))
        ));
    }

    #[test]
    fn test_blank_log_file_disables_logging() {
        let mut config = create_valid_config();
        config.logging.log_file = "   ".to_string();
        assert_eq!(config.logging.log_file_path(), None);
    }

    #[test]
    fn test_empty_serial_port() {
        let mut config = create_valid_config();
        config.serial.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = create_valid_config();
        config.serial.baud_rate = 420000; // Not in the allowed list
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_baud_rates() {
        for &baud in SUPPORTED_BAUD_RATES {
            let mut config = create_valid_config();
            config.serial.baud_rate = baud;
            assert!(config.validate().is_ok(), "Baud rate {} should be valid", baud);
        }
    }

    #[test]
    fn test_timeout_ms_zero() {
        let mut config = create_valid_config();
        config.serial.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ms_too_high() {
        let mut config = create_valid_config();
        config.serial.timeout_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_interval_zero() {
        let mut config = create_valid_config();
        config.serial.reconnect_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_interval_too_high() {
        let mut config = create_valid_config();
        config.serial.reconnect_interval_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_event_channel_capacity_zero() {
        let mut config = create_valid_config();
        config.serial.event_channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_minutes_bounds() {
        let mut config = create_valid_config();
        config.buffer.max_minutes = 0;
        assert!(config.validate().is_err());

        config.buffer.max_minutes = 1441;
        assert!(config.validate().is_err());

        config.buffer.max_minutes = 1440;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_poll_interval_zero() {
        let mut config = create_valid_config();
        config.router.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_backups_bounds() {
        let mut config = create_valid_config();
        config.logging.max_backups = 0;
        assert!(config.validate().is_err());

        config.logging.max_backups = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_join_timeout_must_exceed_read_timeout() {
        let mut config = create_valid_config();
        config.shutdown.join_timeout_ms = config.serial.timeout_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_join_timeout_must_exceed_poll_interval() {
        let mut config = create_valid_config();
        config.serial.timeout_ms = 10;
        config.router.poll_interval_ms = 500;
        config.shutdown.join_timeout_ms = 400;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_serial_port(), "/dev/ttyACM0");
        assert_eq!(default_baud_rate(), 115200);
        assert_eq!(default_timeout_ms(), 1000);
        assert_eq!(default_reconnect_interval_ms(), 2000);
        assert_eq!(default_event_channel_capacity(), 4096);
        assert_eq!(default_max_minutes(), 60);
        assert_eq!(default_poll_interval_ms(), 100);
        assert_eq!(default_max_backups(), 5);
        assert_eq!(default_join_timeout_ms(), 2000);
    }
}
