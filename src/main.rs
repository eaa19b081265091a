//! # Dongle Telemetry
//!
//! Ingest live fitness-sensor telemetry from a USB serial dongle.
//!
//! This application keeps a rolling window of heart rate, power, cadence,
//! speed and simulation samples read from the dongle, reconnecting whenever
//! the device is unplugged or the link fails.

use anyhow::{Context, Result};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

use dongle_telemetry::config::Config;
use dongle_telemetry::service::TelemetryService;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Period between status log messages
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Main entry point for the dongle telemetry service
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up logging with a non-blocking tracing subscriber
///    - Load configuration (first argument, default `config.toml`)
///    - Start the serial reader and event router
///
/// 2. **Main Loop**
///    - Log link status and the latest device timestamp every 10 seconds
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Stop both workers and join them within the configured deadline
///
/// # Errors
///
/// Returns error if:
/// - The configuration file exists but is invalid
/// - A worker fails to stop within the join deadline
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO dongle_telemetry: Dongle Telemetry v0.1.0 starting...
/// INFO dongle_telemetry::serial: Connected to dongle port=/dev/ttyACM0
/// INFO dongle_telemetry: Link status connected=true latest_ts=182000 dropped=0
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .with_writer(writer)
        .init();

    info!("Dongle Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let service = TelemetryService::start(&config)?;

    let mut status_interval = interval(STATUS_LOG_INTERVAL);
    status_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                let status = service.connection_status();
                info!(
                    port = %status.port,
                    connected = status.connected,
                    latest_ts = service.buffer().latest_timestamp_ms(),
                    dropped = service.dropped_events(),
                    "Link status"
                );
            }

            // Handle Ctrl+C for graceful shutdown
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    service.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        assert_eq!(DEFAULT_CONFIG_PATH, "config.toml");
    }

    #[test]
    fn test_status_interval_constant() {
        assert_eq!(STATUS_LOG_INTERVAL, Duration::from_secs(10));
    }
}
