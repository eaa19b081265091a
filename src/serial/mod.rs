//! # Serial Communication Module
//!
//! Handles the read-only serial link to the sensor dongle.
//!
//! This module handles:
//! - Opening the dongle's serial port at 115,200 baud
//! - Framing newline-delimited output and extracting JSON frames
//! - Classifying frames into telemetry events
//! - Reconnecting after open failures and mid-stream I/O errors
//! - Optional raw line logging
//!
//! The supervisor cycles `Disconnected -> Connecting -> Connected` and back on
//! any link error, forever, until a stop is requested. Reads are bounded by a
//! timeout, so a stop is observed within one timeout period.

pub mod framer;
pub mod port_trait;

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::protocol::decoder::decode_frame;
use crate::protocol::types::TelemetryEvent;
use crate::worker::join_worker;
use crate::telemetry::raw_log::{RawLineLog, DEFAULT_MAX_BACKUPS};
use framer::{decode_line, extract_json, LineFramer};
use port_trait::{SerialConnector, SerialLink};

/// Default dongle baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default dongle device path
pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyACM0";

/// Delay between connection attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on a single read before the loop re-checks for a stop request
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Dropped events between repeated "channel full" warnings
const DROP_WARN_INTERVAL: u64 = 1000;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; reached only on an explicit stop
    Stopped,
}

/// Connection state as reported to status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Port is open and being read
    pub connected: bool,
    /// Reader task has not stopped
    pub running: bool,
    /// Port identifier
    pub port: String,
}

/// Reader timing and logging settings
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub read_timeout: Duration,
    pub reconnect_interval: Duration,
    pub log_file: Option<PathBuf>,
    pub max_log_backups: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            log_file: None,
            max_log_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

impl ReaderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_timeout: config.serial.read_timeout(),
            reconnect_interval: config.serial.reconnect_interval(),
            log_file: config.logging.log_file_path(),
            max_log_backups: config.logging.max_backups,
        }
    }
}

/// Owns the dongle connection and turns its output into telemetry events
///
/// Events go out through a bounded channel with `try_send`: when the consumer
/// falls behind, events are dropped (and counted) instead of stalling reads.
pub struct ConnectionSupervisor {
    connector: Arc<dyn SerialConnector>,
    settings: ReaderSettings,
    events: mpsc::Sender<TelemetryEvent>,
    phase: watch::Sender<LinkPhase>,
    dropped: Arc<AtomicU64>,
    framer: LineFramer,
    raw_log: Option<RawLineLog>,
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("port", &self.connector.port_name())
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn SerialConnector>,
        settings: ReaderSettings,
        events: mpsc::Sender<TelemetryEvent>,
    ) -> Self {
        let (phase, _) = watch::channel(LinkPhase::Disconnected);
        Self {
            connector,
            settings,
            events,
            phase,
            dropped: Arc::new(AtomicU64::new(0)),
            framer: LineFramer::new(),
            raw_log: None,
        }
    }

    /// Start the read loop on the runtime
    ///
    /// The loop runs until `stop` turns `true` (or its sender is dropped).
    pub fn spawn(self, stop: watch::Receiver<bool>) -> SupervisorHandle {
        let port = self.connector.port_name().to_string();
        let phase = self.phase.subscribe();
        let dropped = Arc::clone(&self.dropped);
        let task = tokio::spawn(self.run(stop));

        SupervisorHandle { port, phase, dropped, task }
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let port = self.connector.port_name().to_string();
        self.open_raw_log();
        info!(port = %port, "Serial reader started");

        while !*stop.borrow() {
            self.phase.send_replace(LinkPhase::Connecting);

            match self.connector.connect().await {
                Ok(mut link) => {
                    info!(port = %port, "Connected to dongle");
                    self.phase.send_replace(LinkPhase::Connected);
                    self.framer.clear();

                    let result = self.read_loop(link.as_mut(), &stop).await;
                    drop(link);
                    self.phase.send_replace(LinkPhase::Disconnected);

                    match result {
                        Ok(()) => break,
                        Err(e) => error!(port = %port, error = %e, "Serial link lost, reconnecting"),
                    }
                }
                Err(e) => {
                    self.phase.send_replace(LinkPhase::Disconnected);
                    warn!(port = %port, error = %e, "Failed to open serial port");
                }
            }

            if wait_or_stop(&mut stop, self.settings.reconnect_interval).await {
                break;
            }
        }

        self.raw_log = None;
        self.phase.send_replace(LinkPhase::Stopped);
        info!(port = %port, "Serial reader stopped");
    }

    /// Read lines until a stop request (`Ok`) or a link error (`Err`)
    async fn read_loop(&mut self, link: &mut dyn SerialLink, stop: &watch::Receiver<bool>) -> io::Result<()> {
        loop {
            // A dropped stop sender counts as a stop
            if *stop.borrow() || stop.has_changed().is_err() {
                return Ok(());
            }

            match timeout(self.settings.read_timeout, self.framer.read_line(link)).await {
                // Quiet line
                Err(_) => continue,
                Ok(Ok(line)) => self.process_line(&line),
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    fn process_line(&mut self, raw: &[u8]) {
        let text = decode_line(raw);

        let write_failed = match self.raw_log.as_mut() {
            Some(log) => log.write_line(&text).err(),
            None => None,
        };
        if let Some(e) = write_failed {
            warn!(error = %e, "Raw line log write failed, disabling raw logging");
            self.raw_log = None;
        }

        if text.trim().is_empty() {
            return;
        }

        let Some(json) = extract_json(&text) else {
            debug!(line = %text.trim(), "Ignoring non-telemetry line");
            return;
        };

        for event in decode_frame(json) {
            self.publish(event);
        }
    }

    fn publish(&self, event: TelemetryEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % DROP_WARN_INTERVAL == 0 {
                    warn!(dropped, "Event channel full, dropping telemetry events");
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event consumer gone, discarding event");
            }
        }
    }

    fn open_raw_log(&mut self) {
        let Some(path) = self.settings.log_file.as_ref() else {
            return;
        };

        match RawLineLog::open(path, self.settings.max_log_backups) {
            Ok(log) => self.raw_log = Some(log),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to open raw line log"),
        }
    }
}

/// Sleep for `delay` unless a stop arrives first; returns whether to stop
///
/// A dropped stop sender counts as a stop.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = sleep(delay) => false,
        _ = stop.wait_for(|stopped| *stopped) => true,
    }
}

/// Handle to a running supervisor
#[derive(Debug)]
pub struct SupervisorHandle {
    port: String,
    phase: watch::Receiver<LinkPhase>,
    dropped: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Current lifecycle phase
    pub fn phase(&self) -> LinkPhase {
        *self.phase.borrow()
    }

    /// Receiver that observes every phase change
    pub fn subscribe(&self) -> watch::Receiver<LinkPhase> {
        self.phase.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        let phase = self.phase();
        ConnectionStatus {
            connected: phase == LinkPhase::Connected,
            running: phase != LinkPhase::Stopped,
            port: self.port.clone(),
        }
    }

    /// Events discarded because the channel was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait for the reader to finish after a stop request
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` (after aborting the task) if it does not
    /// finish within `deadline`.
    pub async fn join(self, deadline: Duration) -> Result<()> {
        join_worker("serial reader", self.task, deadline).await.map(|_| ())
    }
}
