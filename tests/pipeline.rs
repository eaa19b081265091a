//! End-to-end tests of the ingest pipeline over in-memory serial links

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::time::{sleep, timeout};

use dongle_telemetry::config::Config;
use dongle_telemetry::error::{Result, TelemetryError};
use dongle_telemetry::protocol::types::{DeviceKind, MetricKind};
use dongle_telemetry::serial::port_trait::{SerialConnector, SerialLink};
use dongle_telemetry::serial::LinkPhase;
use dongle_telemetry::service::TelemetryService;

/// Hands out the read ends of pre-made pipes, one per connection attempt
struct PipeConnector {
    links: Mutex<VecDeque<DuplexStream>>,
    opened: AtomicUsize,
}

impl PipeConnector {
    /// Returns the connector and the write ends, in connection order
    fn with_links(count: usize) -> (Arc<Self>, Vec<DuplexStream>) {
        let mut links = VecDeque::new();
        let mut writers = Vec::new();
        for _ in 0..count {
            let (writer, reader) = duplex(4096);
            links.push_back(reader);
            writers.push(writer);
        }

        let connector = Arc::new(Self {
            links: Mutex::new(links),
            opened: AtomicUsize::new(0),
        });
        (connector, writers)
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SerialConnector for PipeConnector {
    async fn connect(&self) -> Result<Box<dyn SerialLink>> {
        let next = self.links.lock().unwrap().pop_front();
        match next {
            Some(link) => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(link))
            }
            None => Err(TelemetryError::Serial("no device".to_string())),
        }
    }

    fn port_name(&self) -> &str {
        "pipe0"
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.serial.port = "pipe0".to_string();
    config.serial.timeout_ms = 20;
    config.serial.reconnect_interval_ms = 20;
    config.router.poll_interval_ms = 10;
    config.shutdown.join_timeout_ms = 1000;
    config
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(3), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn heart_rate(service: &TelemetryService) -> Vec<(i64, f64)> {
    service
        .query_window(60)
        .samples(MetricKind::HeartRate)
        .iter()
        .map(|p| (p.timestamp_ms, p.value))
        .collect()
}

#[tokio::test]
async fn test_heart_rate_frames_reach_buffer_and_device_table() {
    let (connector, mut writers) = PipeConnector::with_links(1);
    let service = TelemetryService::start_with_connector(&test_config(), connector).unwrap();

    let link = &mut writers[0];
    link.write_all(b"{\"type\":\"hr\",\"ts\":1000,\"bpm\":142,\"rssi\":-61}\n").await.unwrap();
    link.write_all(b"{\"type\":\"hr\",\"ts\":2000,\"bpm\":145}\n").await.unwrap();

    wait_until(|| heart_rate(&service).len() == 2).await;
    assert_eq!(heart_rate(&service), vec![(1000, 142.0), (2000, 145.0)]);

    let hr = service.device_status()[&DeviceKind::Hr];
    assert_eq!(hr.rssi, Some(-61.0));
    assert_eq!(hr.last_seen_ms, Some(1000));
    assert!(!service.device_status()[&DeviceKind::Cp].connected);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_noise_and_partial_frames_are_tolerated() {
    let (connector, mut writers) = PipeConnector::with_links(1);
    let service = TelemetryService::start_with_connector(&test_config(), connector).unwrap();

    let link = &mut writers[0];
    link.write_all(b"ets Jun  8 2016 00:22:57\r\n").await.unwrap();
    link.write_all(b"{\"type\":\"ftms\",\"ts\":10,\"spe").await.unwrap();
    link.write_all(b"ed\":31.5,\"power\":\"250\"}\n").await.unwrap();
    link.write_all(b"{not json}\n{\"type\":\"gps\",\"ts\":11}\n").await.unwrap();
    link.write_all(b"{\"type\":\"cp\",\"ts\":12,\"power\":true,\"cadence\":88}\n").await.unwrap();

    wait_until(|| service.buffer().len() == 3).await;

    let snapshot = service.query_window(60);
    assert_eq!(snapshot.samples(MetricKind::TrainerSpeed)[0].value, 31.5);
    assert_eq!(snapshot.samples(MetricKind::TrainerPower)[0].value, 250.0);
    assert!(snapshot.samples(MetricKind::PowerMeterPower).is_empty());
    assert_eq!(snapshot.samples(MetricKind::PowerMeterCadence)[0].value, 88.0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retention_drops_samples_beyond_horizon() {
    let mut config = test_config();
    config.buffer.max_minutes = 1;

    let (connector, mut writers) = PipeConnector::with_links(1);
    let service = TelemetryService::start_with_connector(&config, connector).unwrap();

    let link = &mut writers[0];
    link.write_all(b"{\"type\":\"hr\",\"ts\":0,\"bpm\":100}\n").await.unwrap();
    link.write_all(b"{\"type\":\"hr\",\"ts\":70000,\"bpm\":120}\n").await.unwrap();

    wait_until(|| service.buffer().latest_timestamp_ms() == 70000).await;
    assert_eq!(heart_rate(&service), vec![(70000, 120.0)]);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_delivery_resumes_after_reconnect() {
    let (connector, mut writers) = PipeConnector::with_links(2);
    let service = TelemetryService::start_with_connector(&test_config(), connector.clone()).unwrap();

    let mut second = writers.pop().unwrap();
    let mut first = writers.pop().unwrap();

    first.write_all(b"{\"type\":\"hr\",\"ts\":1000,\"bpm\":100}\n").await.unwrap();
    wait_until(|| heart_rate(&service).len() == 1).await;

    // Unplug: the reader sees end-of-stream
    drop(first);
    wait_until(|| connector.opened() == 2).await;
    wait_until(|| service.link_phase() == LinkPhase::Connected).await;

    // Device clock restarted after the reconnect
    second.write_all(b"{\"type\":\"hr\",\"ts\":500,\"bpm\":105}\n").await.unwrap();
    second.write_all(b"{\"type\":\"hr\",\"ts\":1500,\"bpm\":110}\n").await.unwrap();

    wait_until(|| heart_rate(&service).len() == 3).await;
    assert_eq!(heart_rate(&service), vec![(1000, 100.0), (500, 105.0), (1500, 110.0)]);
    assert!(service.connection_status().connected);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_while_device_absent() {
    let (connector, _writers) = PipeConnector::with_links(0);
    let service = TelemetryService::start_with_connector(&test_config(), connector).unwrap();

    sleep(Duration::from_millis(50)).await;
    let status = service.connection_status();
    assert!(!status.connected);
    assert!(status.running);
    assert_eq!(status.port, "pipe0");

    service.shutdown().await.unwrap();
}
