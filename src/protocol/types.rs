//! # Telemetry Protocol Constants and Types
//!
//! Core definitions for the newline-delimited JSON frames emitted by the dongle
//! and the typed events derived from them.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Frame type tag for heart-rate monitor frames
pub const FRAME_TYPE_HR: &str = "hr";

/// Frame type tag for cycling power meter frames
pub const FRAME_TYPE_CP: &str = "cp";

/// Frame type tag for smart trainer (FTMS) frames
pub const FRAME_TYPE_FTMS: &str = "ftms";

/// Frame type tag for simulation parameters pushed by the game
pub const FRAME_TYPE_SIM: &str = "sim";

/// Number of metric series tracked by the buffer
pub const METRIC_COUNT: usize = 8;

/// Number of devices that report signal strength
pub const DEVICE_COUNT: usize = 3;

/// Metric series stored in the rolling buffer.
///
/// The set is fixed; names outside of it are rejected rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HeartRate,
    PowerMeterPower,
    PowerMeterCadence,
    TrainerSpeed,
    TrainerPower,
    /// Kept for parity with the other trainer series; no frame type feeds it yet
    TrainerCadence,
    SimGrade,
    SimResistance,
}

impl MetricKind {
    /// Every metric, in buffer order
    pub const ALL: [MetricKind; METRIC_COUNT] = [
        MetricKind::HeartRate,
        MetricKind::PowerMeterPower,
        MetricKind::PowerMeterCadence,
        MetricKind::TrainerSpeed,
        MetricKind::TrainerPower,
        MetricKind::TrainerCadence,
        MetricKind::SimGrade,
        MetricKind::SimResistance,
    ];

    /// Wire/API name of the metric
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::HeartRate => "heart_rate",
            MetricKind::PowerMeterPower => "power_meter_power",
            MetricKind::PowerMeterCadence => "power_meter_cadence",
            MetricKind::TrainerSpeed => "trainer_speed",
            MetricKind::TrainerPower => "trainer_power",
            MetricKind::TrainerCadence => "trainer_cadence",
            MetricKind::SimGrade => "sim_grade",
            MetricKind::SimResistance => "sim_resistance",
        }
    }

    /// Slot of this metric in fixed-size per-metric tables
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown metric or device name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownName(pub String);

impl fmt::Display for UnknownName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown name: {}", self.0)
    }
}

impl std::error::Error for UnknownName {}

impl FromStr for MetricKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// Sensor devices whose link quality the dongle reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Heart-rate monitor
    Hr,
    /// Cycling power meter
    Cp,
    /// Smart trainer
    Ftms,
}

impl DeviceKind {
    /// Every device, in status-table order
    pub const ALL: [DeviceKind; DEVICE_COUNT] = [DeviceKind::Hr, DeviceKind::Cp, DeviceKind::Ftms];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Hr => FRAME_TYPE_HR,
            DeviceKind::Cp => FRAME_TYPE_CP,
            DeviceKind::Ftms => FRAME_TYPE_FTMS,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceKind::ALL
            .into_iter()
            .find(|device| device.as_str() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// One observation destined for the rolling buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    /// Which series the value belongs to
    pub metric: MetricKind,

    /// Device-side timestamp in milliseconds since dongle boot
    pub timestamp_ms: i64,

    /// Sample value
    pub value: f64,
}

/// Link-quality observation for one sensor device
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceSignal {
    /// Reporting device
    pub device: DeviceKind,

    /// Received signal strength in dBm
    pub rssi: f64,

    /// Device-side timestamp in milliseconds since dongle boot
    pub timestamp_ms: i64,
}

/// Event emitted by the classifier for every derived observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryEvent {
    /// Time-series sample
    Metric(MetricSample),
    /// Device presence/quality report
    Signal(DeviceSignal),
}

impl TelemetryEvent {
    pub fn metric(metric: MetricKind, timestamp_ms: i64, value: f64) -> Self {
        TelemetryEvent::Metric(MetricSample { metric, timestamp_ms, value })
    }

    pub fn signal(device: DeviceKind, rssi: f64, timestamp_ms: i64) -> Self {
        TelemetryEvent::Signal(DeviceSignal { device, rssi, timestamp_ms })
    }

    /// Timestamp carried by the event
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            TelemetryEvent::Metric(sample) => sample.timestamp_ms,
            TelemetryEvent::Signal(signal) => signal.timestamp_ms,
        }
    }
}
