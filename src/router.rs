//! # Event Router
//!
//! Single consumer of the supervisor's event channel. Metric samples go to the
//! rolling buffer; device signal reports overwrite the device-status table.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::buffer::RollingBuffer;
use crate::protocol::types::{DeviceKind, DeviceSignal, MetricSample, TelemetryEvent, DEVICE_COUNT};

/// A device counts as connected if seen within this many ms of the latest sample
pub const DEVICE_TIMEOUT_MS: i64 = 5_000;

/// Default wait on the channel before re-checking for a stop request
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Routed events between progress log messages
const LOG_INTERVAL_EVENTS: u64 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DeviceRecord {
    rssi: Option<f64>,
    last_seen_ms: Option<i64>,
}

/// Status of one device as reported to queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceReport {
    /// Last reported signal strength in dBm
    pub rssi: Option<f64>,
    /// Device timestamp of the last report
    pub last_seen_ms: Option<i64>,
    /// Seen within [`DEVICE_TIMEOUT_MS`] of the buffer's latest timestamp
    pub connected: bool,
}

/// Last-write-wins table of device signal reports
///
/// Only the router writes to it; queries read under the same lock.
#[derive(Debug, Default)]
pub struct DeviceStatusTable {
    records: Mutex<[DeviceRecord; DEVICE_COUNT]>,
}

impl DeviceStatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, signal: &DeviceSignal) {
        self.lock()[signal.device.index()] = DeviceRecord {
            rssi: Some(signal.rssi),
            last_seen_ms: Some(signal.timestamp_ms),
        };
    }

    /// Report every device relative to `now_ms` (the buffer's latest timestamp)
    pub fn snapshot(&self, now_ms: i64) -> BTreeMap<DeviceKind, DeviceReport> {
        let records = *self.lock();

        DeviceKind::ALL
            .into_iter()
            .map(|device| {
                let record = records[device.index()];
                let connected = match record.last_seen_ms {
                    Some(last_seen) if now_ms > 0 => now_ms.saturating_sub(last_seen) < DEVICE_TIMEOUT_MS,
                    _ => false,
                };
                let report = DeviceReport {
                    rssi: record.rssi,
                    last_seen_ms: record.last_seen_ms,
                    connected,
                };
                (device, report)
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, [DeviceRecord; DEVICE_COUNT]> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drains telemetry events into the buffer and device table
#[derive(Debug)]
pub struct EventRouter {
    events: mpsc::Receiver<TelemetryEvent>,
    buffer: Arc<RollingBuffer>,
    devices: Arc<DeviceStatusTable>,
    poll_interval: Duration,
    routed: u64,
}

impl EventRouter {
    pub fn new(
        events: mpsc::Receiver<TelemetryEvent>,
        buffer: Arc<RollingBuffer>,
        devices: Arc<DeviceStatusTable>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            events,
            buffer,
            devices,
            poll_interval,
            routed: 0,
        }
    }

    /// Start the consumer loop; the task yields the number of routed events
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<u64> {
        tokio::spawn(self.run(stop))
    }

    /// Consume events until a stop request or until every sender is gone
    pub async fn run(mut self, stop: watch::Receiver<bool>) -> u64 {
        debug!("Event router started");

        loop {
            // A dropped stop sender counts as a stop
            if *stop.borrow() || stop.has_changed().is_err() {
                break;
            }

            match timeout(self.poll_interval, self.events.recv()).await {
                Ok(Some(event)) => self.route(event),
                Ok(None) => {
                    debug!("Event channel closed");
                    break;
                }
                // Idle poll
                Err(_) => {}
            }
        }

        info!(routed = self.routed, "Event router stopped");
        self.routed
    }

    /// Apply one event
    pub fn route(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Metric(MetricSample { metric, timestamp_ms, value }) => {
                if !value.is_finite() {
                    return;
                }
                self.buffer.append(metric, timestamp_ms, value);
            }
            TelemetryEvent::Signal(signal) => {
                if !signal.rssi.is_finite() {
                    return;
                }
                self.devices.record(&signal);
            }
        }

        self.routed += 1;
        if self.routed % LOG_INTERVAL_EVENTS == 0 {
            info!(
                routed = self.routed,
                latest_ts = self.buffer.latest_timestamp_ms(),
                "Routed telemetry events"
            );
        }
    }

    pub fn routed(&self) -> u64 {
        self.routed
    }
}
