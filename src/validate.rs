//! Structural and range validation for inbound telemetry payloads.
//!
//! A payload that passes comes out as a normalised [`TelemetryRecord`]:
//! trimmed identifier, coerced finite numbers, lowercased engine status and
//! a parsed timestamp. Counting accepted/rejected messages is the ingest
//! pipeline's job, not this module's.

use serde_json::Value;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::model::{EngineStatus, Position, TelemetryRecord};

/// Why a payload was rejected. The field name is kept for log context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Payload was not a JSON object.
    #[error("payload is not an object")]
    NotAnObject,
    /// A required field was absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// A field failed its type or range check.
    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
}

/// Validates a decoded JSON payload into a normalised record.
pub fn validate(raw: &Value) -> Result<TelemetryRecord, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let vehicle_id = obj
        .get("vehicleId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(ValidationError::InvalidField("vehicleId"))?
        .to_string();

    let lat = finite_in_range(obj.get("lat"), -90.0, 90.0)
        .ok_or(ValidationError::InvalidField("lat"))?;
    let lng = finite_in_range(obj.get("lng"), -180.0, 180.0)
        .ok_or(ValidationError::InvalidField("lng"))?;
    let fuel_level = finite_in_range(obj.get("fuelLevel"), 0.0, 100.0)
        .ok_or(ValidationError::InvalidField("fuelLevel"))?;

    let engine_status = obj
        .get("engineStatus")
        .and_then(Value::as_str)
        .and_then(EngineStatus::parse)
        .ok_or(ValidationError::InvalidField("engineStatus"))?;

    let timestamp = parse_instant(
        obj.get("timestamp")
            .ok_or(ValidationError::MissingField("timestamp"))?,
    )
    .ok_or(ValidationError::InvalidField("timestamp"))?;

    Ok(TelemetryRecord {
        vehicle_id,
        position: Position::new(lat, lng),
        timestamp,
        fuel_level,
        engine_status,
    })
}

/// Coerces a JSON number or numeric string into a finite f64 within bounds.
fn finite_in_range(value: Option<&Value>, min: f64, max: f64) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

/// Accepts RFC 3339 strings or millisecond Unix epochs, which is the set of
/// timestamp shapes the fleet producers emit.
fn parse_instant(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::String(s) => OffsetDateTime::parse(s.trim(), &Rfc3339).ok(),
        Value::Number(n) => {
            let ms = n.as_i64()?;
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
        }
        _ => None,
    }
}
