//! Telemetry payload model.
//!
//! Parses the device JSON envelope and fills per-metric statistics:
//! `avg` defaults to `value`, `min`/`max` to `avg`, `stddev`/`slope` to
//! zero and the sample count to one.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One metric reading with its statistical summary.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub metric: String,
    pub unit: Option<String>,
    pub value: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub slope: f64,
    pub sample_count: i64,
}

/// Parsed telemetry envelope.
#[derive(Debug, Clone)]
pub struct TelemetryPayload {
    pub component_type: String,
    pub instance_name: String,
    pub snapshot_id: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub sequence_number: Option<u64>,
    pub readings: Vec<MetricReading>,
}

/// Convert a JSON value to a float if possible.
pub fn value_to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Convert a JSON value to an integer if possible.
pub fn value_to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn required_str(payload: &Value, field: &str) -> Result<String, String> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| format!("missing field: {}", field))
}

impl TelemetryPayload {
    pub fn from_value(payload: &Value) -> Result<Self, String> {
        if !payload.is_object() {
            return Err("payload is not a JSON object".to_string());
        }

        let component_type = required_str(payload, "component_type")?;
        let instance_name = required_str(payload, "instance_name")?;
        let snapshot_id = required_str(payload, "snapshot_id")?;

        let captured_at = payload
            .get("captured_at")
            .and_then(|v| v.as_str())
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let sequence_number = match payload.get("sequence_number") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                    .ok_or_else(|| "invalid sequence_number".to_string())?,
            ),
        };

        let data = payload
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| "missing field: data".to_string())?;

        let readings = data
            .iter()
            .enumerate()
            .map(|(idx, entry)| parse_reading(idx, entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            component_type,
            instance_name,
            snapshot_id,
            captured_at,
            sequence_number,
            readings,
        })
    }
}

fn parse_reading(idx: usize, entry: &Value) -> Result<MetricReading, String> {
    let metric = entry
        .get("metric")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("data[{}]: missing metric", idx))?
        .to_string();

    let field = |name: &str| entry.get(name).and_then(value_to_float);

    let value = field("value")
        .or_else(|| field("avg"))
        .ok_or_else(|| format!("data[{}]: missing value", idx))?;
    let avg = field("avg").unwrap_or(value);

    Ok(MetricReading {
        metric,
        unit: entry.get("unit").and_then(|v| v.as_str()).map(|s| s.to_string()),
        value,
        avg,
        min: field("min").unwrap_or(avg),
        max: field("max").unwrap_or(avg),
        stddev: field("stddev").unwrap_or(0.0),
        slope: field("slope").unwrap_or(0.0),
        sample_count: entry.get("count").and_then(value_to_int).unwrap_or(1),
    })
}
