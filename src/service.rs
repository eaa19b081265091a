//! # Telemetry Service
//!
//! Composition root: builds the rolling buffer, device table, connection
//! supervisor and event router, wires the channel between them, and exposes
//! the query operations used by the HTTP layer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::buffer::{RollingBuffer, WindowSnapshot};
use crate::config::Config;
use crate::error::Result;
use crate::protocol::types::{DeviceKind, MetricKind};
use crate::router::{DeviceReport, DeviceStatusTable, EventRouter};
use crate::serial::port_trait::{SerialConnector, TokioSerialConnector};
use crate::serial::{ConnectionStatus, ConnectionSupervisor, LinkPhase, ReaderSettings, SupervisorHandle};
use crate::worker::join_worker;

/// Running ingest pipeline
#[derive(Debug)]
pub struct TelemetryService {
    buffer: Arc<RollingBuffer>,
    devices: Arc<DeviceStatusTable>,
    supervisor: SupervisorHandle,
    router: JoinHandle<u64>,
    stop: watch::Sender<bool>,
    join_timeout: Duration,
}

impl TelemetryService {
    /// Start ingesting from the serial port named in `config`
    ///
    /// Must be called from within a tokio runtime. Opening the port happens
    /// in the background, so a missing dongle is not an error here.
    pub fn start(config: &Config) -> Result<Self> {
        let connector = TokioSerialConnector::new(config.serial.port.clone(), config.serial.baud_rate);
        Self::start_with_connector(config, Arc::new(connector))
    }

    /// Start ingesting through an arbitrary connector
    pub fn start_with_connector(config: &Config, connector: Arc<dyn SerialConnector>) -> Result<Self> {
        config.validate()?;

        let buffer = Arc::new(RollingBuffer::new(config.buffer.max_minutes));
        let devices = Arc::new(DeviceStatusTable::new());
        let (events_tx, events_rx) = mpsc::channel(config.serial.event_channel_capacity);
        let (stop, stop_rx) = watch::channel(false);

        let router = EventRouter::new(
            events_rx,
            Arc::clone(&buffer),
            Arc::clone(&devices),
            config.router.poll_interval(),
        )
        .spawn(stop_rx.clone());

        let supervisor =
            ConnectionSupervisor::new(connector, ReaderSettings::from_config(config), events_tx).spawn(stop_rx);

        info!(
            port = %config.serial.port,
            retention_minutes = config.buffer.max_minutes,
            "Telemetry service started"
        );

        Ok(Self {
            buffer,
            devices,
            supervisor,
            router,
            stop,
            join_timeout: config.shutdown.join_timeout(),
        })
    }

    /// Samples per metric within the trailing `minutes` of the latest timestamp
    pub fn query_window(&self, minutes: u32) -> WindowSnapshot {
        self.buffer.query_window(minutes)
    }

    pub fn metrics_list(&self) -> Vec<MetricKind> {
        self.buffer.metrics_list()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.supervisor.status()
    }

    /// Signal reports per device, judged against the buffer's latest timestamp
    pub fn device_status(&self) -> BTreeMap<DeviceKind, DeviceReport> {
        self.devices.snapshot(self.buffer.latest_timestamp_ms())
    }

    pub fn buffer(&self) -> &Arc<RollingBuffer> {
        &self.buffer
    }

    pub fn link_phase(&self) -> LinkPhase {
        self.supervisor.phase()
    }

    pub fn dropped_events(&self) -> u64 {
        self.supervisor.dropped_events()
    }

    /// Stop both workers and wait for them
    ///
    /// # Errors
    ///
    /// Returns the first failure: `ShutdownTimeout` for a worker that missed
    /// its deadline (it is aborted), `Worker` for one that panicked. Both
    /// workers are always joined or aborted before this returns.
    pub async fn shutdown(self) -> Result<()> {
        info!("Stopping telemetry service");
        self.stop.send_replace(true);

        let reader = self.supervisor.join(self.join_timeout).await;
        let router = join_worker("event router", self.router, self.join_timeout).await;

        if let Err(e) = &reader {
            error!(error = %e, "Serial reader did not stop cleanly");
        }

        match router {
            Ok(routed) => {
                info!(routed, latest_ts = self.buffer.latest_timestamp_ms(), "Telemetry service stopped");
                reader
            }
            Err(e) => {
                error!(error = %e, "Event router did not stop cleanly");
                reader.and(Err(e))
            }
        }
    }
}
