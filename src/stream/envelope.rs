//! Two-layer decoding of pushed events.
//!
//! ```text
//! SSE data: {"data":"<inner>","ttl":60,"published_at":"...","coreid":"<device>"}
//!                    ├── {"temp":18.5,"target":19.0,"heatStatus":0,"coolStatus":1}
//!                    └── 18.5,19.0
//! ```
//!
//! The outer layer is a [`RawEvent`]; its `data` string is decoded again into
//! a [`Measurement`]. Each layer has its own [`DecodeError`] kind.

use crate::error::{DecodeError, StreamError};
use crate::measurement::Measurement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Outer envelope of one pushed event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Inner payload, itself a JSON document
    #[serde(rename = "data")]
    pub payload: String,

    #[serde(rename = "ttl", default)]
    pub ttl_seconds: i64,

    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,

    /// Device that published the event
    #[serde(rename = "coreid")]
    pub origin_device_id: String,
}

/// Inner payload as sent by the controller firmware.
#[derive(Deserialize)]
struct MeasurementPayload {
    temp: Numeric,
    target: Numeric,
    #[serde(rename = "heatStatus", default)]
    heat_status: Option<Flag>,
    #[serde(rename = "coolStatus", default)]
    cool_status: Option<Flag>,
}

/// Firmware revisions send numbers either bare or quoted.
#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn to_f64(&self, field: &str) -> Result<f64, DecodeError> {
        let value = match self {
            Numeric::Number(n) => *n,
            Numeric::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                DecodeError::MalformedMeasurement(format!("{} is not a number: {:?}", field, s))
            })?,
        };
        if !value.is_finite() {
            return Err(DecodeError::MalformedMeasurement(format!(
                "{} is not finite",
                field
            )));
        }
        Ok(value)
    }
}

/// Heating/cooling status: bool, 0/1, or their string forms.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Flag {
    fn to_bool(&self, field: &str) -> Result<bool, DecodeError> {
        match self {
            Flag::Bool(b) => Ok(*b),
            Flag::Number(n) => Ok(*n != 0.0),
            Flag::Text(s) => match s.trim() {
                "1" | "true" | "on" => Ok(true),
                "0" | "false" | "off" | "" => Ok(false),
                other => Err(DecodeError::MalformedMeasurement(format!(
                    "{} is not a status flag: {:?}",
                    field, other
                ))),
            },
        }
    }
}

fn flag(value: &Option<Flag>, field: &str) -> Result<bool, DecodeError> {
    match value {
        Some(f) => f.to_bool(field),
        None => Ok(false),
    }
}

/// Decodes the outer envelope.
pub fn decode_envelope(data: &str) -> Result<RawEvent, DecodeError> {
    serde_json::from_str(data).map_err(|e| DecodeError::MalformedEnvelope(e.to_string()))
}

/// Decodes the inner payload into a measurement observed at `observed_at`.
///
/// Accepts the JSON object form and the comma-separated `temp,target[,...]`
/// form. The comma-separated form carries no status flags; heating and
/// cooling decode as `false`.
pub fn decode_measurement(
    payload: &str,
    observed_at: DateTime<Utc>,
) -> Result<Measurement, DecodeError> {
    let payload = payload.trim();
    if !payload.starts_with('{') {
        return decode_delimited(payload, observed_at);
    }

    let raw: MeasurementPayload = serde_json::from_str(payload)
        .map_err(|e| DecodeError::MalformedMeasurement(e.to_string()))?;

    Ok(Measurement {
        temperature: raw.temp.to_f64("temp")?,
        target: raw.target.to_f64("target")?,
        heating: flag(&raw.heat_status, "heatStatus")?,
        cooling: flag(&raw.cool_status, "coolStatus")?,
        observed_at,
    })
}

fn decode_delimited(payload: &str, observed_at: DateTime<Utc>) -> Result<Measurement, DecodeError> {
    let mut fields = payload.split(',');
    let (Some(temp), Some(target)) = (fields.next(), fields.next()) else {
        return Err(DecodeError::MalformedMeasurement(format!(
            "expected temp,target: {:?}",
            payload
        )));
    };

    Ok(Measurement {
        temperature: Numeric::Text(temp.to_string()).to_f64("temp")?,
        target: Numeric::Text(target.to_string()).to_f64("target")?,
        heating: false,
        cooling: false,
        observed_at,
    })
}

/// Classifies one pushed message for the monitored device.
///
/// Checks, in order: non-empty data, outer envelope, origin device, inner
/// payload. Everything except `Ok` is per-message noise the stream skips.
pub fn decode_message(data: &str, device_id: &str) -> Result<Measurement, StreamError> {
    let data = data.trim();
    if data.is_empty() {
        return Err(StreamError::Empty);
    }

    let event = decode_envelope(data)?;
    if event.payload.trim().is_empty() {
        return Err(StreamError::Empty);
    }

    if event.origin_device_id != device_id {
        return Err(StreamError::DeviceMismatch {
            expected: device_id.to_string(),
            actual: event.origin_device_id,
        });
    }

    let observed_at = event.published_at.unwrap_or_else(Utc::now);
    Ok(decode_measurement(&event.payload, observed_at)?)
}

/// Encodes a measurement the way the relay delivers it.
pub fn encode_message(measurement: &Measurement, device_id: &str) -> String {
    let inner = json!({
        "temp": measurement.temperature,
        "target": measurement.target,
        "heatStatus": u8::from(measurement.heating),
        "coolStatus": u8::from(measurement.cooling),
    });
    let event = RawEvent {
        payload: inner.to_string(),
        ttl_seconds: 60,
        published_at: Some(measurement.observed_at),
        origin_device_id: device_id.to_string(),
    };
    // RawEvent has only string, integer and timestamp fields.
    serde_json::to_string(&event).unwrap_or_default()
}
