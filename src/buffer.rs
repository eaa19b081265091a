//! # Rolling Buffer
//!
//! Concurrent, time-windowed history of metric samples.
//!
//! Each metric keeps its samples in arrival order. "Now" is the largest device
//! timestamp ever observed; every append prunes samples older than that minus
//! the retention horizon. Device clocks may reset across reconnects, so
//! timestamps inside a series are not assumed to be sorted.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::protocol::types::{MetricKind, METRIC_COUNT};

/// Milliseconds per minute
pub const MS_PER_MINUTE: i64 = 60_000;

/// One stored `(timestamp, value)` pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    /// Device-side timestamp in milliseconds
    pub timestamp_ms: i64,
    /// Sample value
    pub value: f64,
}

impl SamplePoint {
    /// Device timestamp projected onto the fixed display base (2024-01-01T00:00:00)
    ///
    /// Device time only counts from dongle boot, so the base date is arbitrary;
    /// front-ends use it to lay samples out on a time axis. `None` only for
    /// timestamps beyond the calendar range.
    pub fn display_time(&self) -> Option<NaiveDateTime> {
        TimeDelta::try_milliseconds(self.timestamp_ms)
            .and_then(|offset| display_base().checked_add_signed(offset))
    }
}

impl Serialize for SamplePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut point = serializer.serialize_struct("SamplePoint", 3)?;
        point.serialize_field("timestamp_ms", &self.timestamp_ms)?;
        point.serialize_field("time", &self.display_time())?;
        point.serialize_field("value", &self.value)?;
        point.end()
    }
}

fn display_base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Result of a window query, detached from the live buffer
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WindowSnapshot {
    /// Requested window length
    pub window_minutes: u32,
    /// Reference point of the window (largest timestamp seen)
    pub latest_timestamp_ms: i64,
    /// Samples per metric, in arrival order; every metric is present
    pub series: BTreeMap<MetricKind, Vec<SamplePoint>>,
}

impl WindowSnapshot {
    /// Samples of a single metric
    pub fn samples(&self, metric: MetricKind) -> &[SamplePoint] {
        self.series.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Samples of one metric, in arrival order
#[derive(Debug, Clone)]
struct Series {
    samples: VecDeque<SamplePoint>,
    /// True while timestamps are non-decreasing front to back
    sorted: bool,
}

impl Series {
    fn new() -> Self {
        Self { samples: VecDeque::new(), sorted: true }
    }

    fn push(&mut self, point: SamplePoint) {
        if let Some(last) = self.samples.back() {
            if point.timestamp_ms < last.timestamp_ms {
                self.sorted = false;
            }
        }
        self.samples.push_back(point);
    }

    /// Drop every sample older than `cutoff_ms`
    ///
    /// Sorted series pop from the front only. Out-of-order series fall back to a
    /// full scan, after which the ordering flag is recomputed.
    fn prune(&mut self, cutoff_ms: i64) {
        if self.sorted {
            while self.samples.front().is_some_and(|p| p.timestamp_ms < cutoff_ms) {
                self.samples.pop_front();
            }
            return;
        }

        self.samples.retain(|p| p.timestamp_ms >= cutoff_ms);
        self.sorted = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .all(|(a, b)| a.timestamp_ms <= b.timestamp_ms);
    }
}

#[derive(Debug)]
struct BufferState {
    latest_timestamp_ms: i64,
    series: [Series; METRIC_COUNT],
}

/// Thread-safe rolling buffer keyed by [`MetricKind`]
///
/// One writer (the event router) and any number of readers share it behind an
/// `Arc`. Each operation holds the lock for its whole duration.
///
/// # Examples
///
/// ```
/// use dongle_telemetry::buffer::RollingBuffer;
/// use dongle_telemetry::protocol::types::MetricKind;
///
/// let buffer = RollingBuffer::new(60);
/// buffer.append(MetricKind::HeartRate, 1_000, 142.0);
///
/// let snapshot = buffer.query_window(5);
/// assert_eq!(snapshot.samples(MetricKind::HeartRate).len(), 1);
/// ```
#[derive(Debug)]
pub struct RollingBuffer {
    retention_ms: i64,
    state: Mutex<BufferState>,
}

impl RollingBuffer {
    /// Create an empty buffer keeping `retention_minutes` of history
    pub fn new(retention_minutes: u32) -> Self {
        Self {
            retention_ms: i64::from(retention_minutes) * MS_PER_MINUTE,
            state: Mutex::new(BufferState {
                latest_timestamp_ms: 0,
                series: std::array::from_fn(|_| Series::new()),
            }),
        }
    }

    /// Retention horizon in milliseconds
    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    /// Append a sample and prune every series against the new horizon
    pub fn append(&self, metric: MetricKind, timestamp_ms: i64, value: f64) {
        let mut state = self.lock();

        state.latest_timestamp_ms = state.latest_timestamp_ms.max(timestamp_ms);
        state.series[metric.index()].push(SamplePoint { timestamp_ms, value });

        self.prune_locked(&mut state);
    }

    /// Append by metric name; names outside the fixed key set are ignored
    ///
    /// Returns whether the sample was accepted.
    pub fn append_named(&self, metric: &str, timestamp_ms: i64, value: f64) -> bool {
        match metric.parse::<MetricKind>() {
            Ok(kind) => {
                self.append(kind, timestamp_ms, value);
                true
            }
            Err(_) => false,
        }
    }

    /// Copy out every sample with `timestamp_ms >= latest - window`
    pub fn query_window(&self, window_minutes: u32) -> WindowSnapshot {
        let state = self.lock();
        let window_ms = i64::from(window_minutes) * MS_PER_MINUTE;
        let cutoff_ms = state.latest_timestamp_ms.saturating_sub(window_ms);

        let series = MetricKind::ALL
            .into_iter()
            .map(|metric| {
                let points = state.series[metric.index()]
                    .samples
                    .iter()
                    .filter(|p| p.timestamp_ms >= cutoff_ms)
                    .copied()
                    .collect();
                (metric, points)
            })
            .collect();

        WindowSnapshot {
            window_minutes,
            latest_timestamp_ms: state.latest_timestamp_ms,
            series,
        }
    }

    /// The fixed metric key set
    pub fn metrics_list(&self) -> Vec<MetricKind> {
        MetricKind::ALL.to_vec()
    }

    /// Largest timestamp observed so far (0 before the first sample)
    pub fn latest_timestamp_ms(&self) -> i64 {
        self.lock().latest_timestamp_ms
    }

    /// Total number of stored samples across all metrics
    pub fn len(&self) -> usize {
        self.lock().series.iter().map(|s| s.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn prune(&self) {
        let mut state = self.lock();
        self.prune_locked(&mut state);
    }

    fn prune_locked(&self, state: &mut BufferState) {
        let cutoff_ms = state.latest_timestamp_ms.saturating_sub(self.retention_ms);
        for series in state.series.iter_mut() {
            series.prune(cutoff_ms);
        }
    }

    // A panic while holding the lock leaves the state consistent (every
    // mutation is a single push or removal), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
