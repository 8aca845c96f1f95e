//! Core data model for telemetry ingestion.
//!
//! # Key Types
//!
//! - [`TelemetryRecord`] - A validated, normalised inbound observation
//! - [`EnrichedVehicle`] - Latest known state of one vehicle, with derived speed
//! - [`EngineStatus`] - Canonical engine state reported by the vehicle
//! - [`Position`] - A WGS84 latitude/longitude pair in degrees

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Unique identifier of a vehicle as reported by the producer.
pub type VehicleId = String;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees, within [-90, 90].
    pub lat: f64,
    /// Longitude in degrees, within [-180, 180].
    pub lng: f64,
}

impl Position {
    /// Builds a position without range checking; validation happens at ingest.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Engine state reported by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine running and the vehicle presumably moving.
    Running,
    /// Engine on but the vehicle stationary.
    Idle,
    /// Engine off.
    Off,
}

impl EngineStatus {
    /// Parses a case-insensitive status string.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Some(Self::Running),
            "idle" => Some(Self::Idle),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Off => "off",
        }
    }
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated and normalised telemetry observation.
///
/// Immutable once accepted: the ingest pipeline derives further fields into
/// [`EnrichedVehicle`] but never mutates the record itself.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    /// Trimmed, non-empty vehicle identifier.
    pub vehicle_id: VehicleId,
    /// Reported position.
    pub position: Position,
    /// Instant the observation was taken, from the message itself.
    pub timestamp: OffsetDateTime,
    /// Fuel level percentage within [0, 100].
    pub fuel_level: f64,
    /// Canonical engine status.
    pub engine_status: EngineStatus,
}

/// Latest known state of one vehicle held in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedVehicle {
    /// The observation this state was built from.
    pub record: TelemetryRecord,
    /// Speed derived from the previous observation, km/h, never negative.
    /// Zero for the first observation and for non-increasing timestamps.
    pub speed_kmh: f64,
    /// Server-side instant of ingestion; monotonic per vehicle.
    pub last_seen: OffsetDateTime,
}

/// Formats an instant as an RFC 3339 string, the canonical wire form.
///
/// Formatting an in-range UTC instant cannot fail; a failure would indicate
/// a corrupted value, so the epoch is returned instead of propagating.
pub fn format_rfc3339(instant: OffsetDateTime) -> String {
    instant
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Millisecond Unix epoch for an instant.
pub fn epoch_ms(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Instant from a millisecond Unix epoch, clamped into the representable range.
pub fn from_epoch_ms(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
