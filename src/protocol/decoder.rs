//! # Telemetry Frame Decoder
//!
//! Classifies a JSON frame by its `type` tag and derives typed events from it.
//!
//! Malformed frames are routine serial noise, so nothing here returns an error:
//! a frame that does not parse yields no events, and a field of the wrong type
//! only suppresses the one event derived from it.

use serde_json::{Map, Value};

use super::types::*;

/// Frame object as parsed from the wire
type FrameObject = Map<String, Value>;

/// Decode one JSON frame into telemetry events
///
/// # Arguments
///
/// * `json` - Candidate JSON text, usually the output of the frame extractor
///
/// # Returns
///
/// * `Vec<TelemetryEvent>` - Derived events, in field order of the table below;
///   empty for invalid JSON, non-object JSON or an unknown `type`
///
/// | type   | events                                               |
/// |--------|------------------------------------------------------|
/// | `hr`   | `heart_rate` from `bpm`, signal from `rssi`          |
/// | `cp`   | `power_meter_power`, `power_meter_cadence`, signal   |
/// | `ftms` | `trainer_speed`, `trainer_power`, signal             |
/// | `sim`  | `sim_grade`, `sim_resistance`                        |
///
/// # Examples
///
/// ```
/// use dongle_telemetry::protocol::decoder::decode_frame;
/// use dongle_telemetry::protocol::types::{MetricKind, TelemetryEvent};
///
/// let events = decode_frame(r#"{"type":"hr","ts":1000,"bpm":142}"#);
/// assert_eq!(events, vec![TelemetryEvent::metric(MetricKind::HeartRate, 1000, 142.0)]);
/// ```
pub fn decode_frame(json: &str) -> Vec<TelemetryEvent> {
    let frame: FrameObject = match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => map,
        _ => return Vec::new(),
    };

    let ts = frame_timestamp(&frame);
    let mut events = Vec::new();

    match frame.get("type").and_then(Value::as_str) {
        Some(FRAME_TYPE_HR) => decode_heart_rate(&frame, ts, &mut events),
        Some(FRAME_TYPE_CP) => decode_power_meter(&frame, ts, &mut events),
        Some(FRAME_TYPE_FTMS) => decode_trainer(&frame, ts, &mut events),
        Some(FRAME_TYPE_SIM) => decode_simulation(&frame, ts, &mut events),
        _ => {}
    }

    events
}

/// Decode a heart-rate monitor frame (`bpm`, `rssi`)
fn decode_heart_rate(frame: &FrameObject, ts: i64, events: &mut Vec<TelemetryEvent>) {
    push_metric(frame, "bpm", MetricKind::HeartRate, ts, events);
    push_signal(frame, DeviceKind::Hr, ts, events);
}

/// Decode a power meter frame (`power`, `cadence`, `rssi`)
fn decode_power_meter(frame: &FrameObject, ts: i64, events: &mut Vec<TelemetryEvent>) {
    push_metric(frame, "power", MetricKind::PowerMeterPower, ts, events);
    push_metric(frame, "cadence", MetricKind::PowerMeterCadence, ts, events);
    push_signal(frame, DeviceKind::Cp, ts, events);
}

/// Decode a smart trainer frame (`speed`, `power`, `rssi`)
fn decode_trainer(frame: &FrameObject, ts: i64, events: &mut Vec<TelemetryEvent>) {
    push_metric(frame, "speed", MetricKind::TrainerSpeed, ts, events);
    push_metric(frame, "power", MetricKind::TrainerPower, ts, events);
    push_signal(frame, DeviceKind::Ftms, ts, events);
}

/// Decode a simulation frame (`grade`, `resistance`)
fn decode_simulation(frame: &FrameObject, ts: i64, events: &mut Vec<TelemetryEvent>) {
    push_metric(frame, "grade", MetricKind::SimGrade, ts, events);
    push_metric(frame, "resistance", MetricKind::SimResistance, ts, events);
}

fn push_metric(
    frame: &FrameObject,
    field: &str,
    metric: MetricKind,
    ts: i64,
    events: &mut Vec<TelemetryEvent>,
) {
    if let Some(value) = numeric_field(frame, field) {
        events.push(TelemetryEvent::metric(metric, ts, value));
    }
}

fn push_signal(frame: &FrameObject, device: DeviceKind, ts: i64, events: &mut Vec<TelemetryEvent>) {
    if let Some(rssi) = numeric_field(frame, "rssi") {
        events.push(TelemetryEvent::signal(device, rssi, ts));
    }
}

/// Read `ts`, defaulting to 0 when absent or not a number
///
/// Fractional timestamps are truncated toward zero.
fn frame_timestamp(frame: &FrameObject) -> i64 {
    match frame.get("ts") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Coerce a field to `f64`
///
/// Numbers and numeric strings are accepted. `null`, non-numeric values and
/// non-finite results count as missing.
fn numeric_field(frame: &FrameObject, field: &str) -> Option<f64> {
    let value = match frame.get(field)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };

    value.is_finite().then_some(value)
}
