//! Durable telemetry store over SQLite.
//!
//! Three concerns live here:
//! - an append-only event log plus a per-vehicle cumulative-distance cache,
//!   both written in one atomic step by [`TelemetryStore::record`];
//! - paginated history and windowed aggregate queries;
//! - incremental, idempotent rollup computation (see [`rollup`]).
//!
//! All access goes through one connection behind a mutex; callers on async
//! tasks wrap store calls in `spawn_blocking`.

mod migrations;
mod rollup;

pub use rollup::{RollupSummary, WindowRollupStats};

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::config::TelemetryDbConfig;
use crate::error::{FleetError, Result};
use crate::geo;
use crate::model::{epoch_ms, from_epoch_ms, EngineStatus, Position, TelemetryRecord, VehicleId};

/// Default page size for history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
/// Upper bound on history page size.
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Durable store for telemetry events, vehicles and rollups.
pub struct TelemetryStore {
    conn: Mutex<Connection>,
    windows: Vec<u32>,
    base_window: u32,
    catch_up_windows: u32,
}

/// Rollup-related knobs the store needs from the configuration.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Materialised rollup windows in seconds, base window included.
    pub windows: Vec<u32>,
    /// Base window used when no materialised window fits a request.
    pub base_window: u32,
    /// How many already-processed windows each rollup pass revisits.
    pub catch_up_windows: u32,
}

impl From<&TelemetryDbConfig> for StoreOptions {
    fn from(cfg: &TelemetryDbConfig) -> Self {
        Self {
            windows: cfg.effective_windows(),
            base_window: cfg.rollup_window_seconds,
            catch_up_windows: cfg.rollup_catch_up_windows,
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions::from(&TelemetryDbConfig::default())
    }
}

/// One persisted telemetry event.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    /// Monotonically increasing event identifier.
    pub event_id: i64,
    /// Vehicle the event belongs to.
    pub vehicle_id: VehicleId,
    /// Instant from the message itself.
    pub recorded_at: OffsetDateTime,
    /// Server-side ingestion instant.
    pub ingest_at: OffsetDateTime,
    /// Reported position.
    pub position: Position,
    /// Derived speed at ingest time.
    pub speed_kmh: f64,
    /// Fuel level percentage.
    pub fuel_level: f64,
    /// Engine status.
    pub engine_status: EngineStatus,
    /// Great-circle distance from the vehicle's previous event, km.
    pub distance_km: f64,
}

/// Result of one atomic record call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordOutcome {
    /// Identifier of the appended event.
    pub event_id: i64,
    /// Distance delta credited to this event.
    pub distance_km: f64,
    /// Cumulative distance for the vehicle after this event.
    pub cumulative_km: f64,
}

/// Parameters of a history query.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    /// Restrict to these vehicles; empty means all.
    pub vehicle_ids: Vec<VehicleId>,
    /// Inclusive lower bound on `recorded_at`.
    pub start: Option<OffsetDateTime>,
    /// Exclusive upper bound on `recorded_at`.
    pub end: Option<OffsetDateTime>,
    /// Page size, clamped into [1, MAX_HISTORY_LIMIT].
    pub limit: usize,
    /// Continuation token from a previous page.
    pub page_token: Option<i64>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            vehicle_ids: Vec::new(),
            start: None,
            end: None,
            limit: DEFAULT_HISTORY_LIMIT,
            page_token: None,
        }
    }
}

/// One page of ascending-time history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Events in ascending event-id order.
    pub events: Vec<TelemetryEvent>,
    /// Present when the page filled up; resume with `event_id > token`.
    pub next_page_token: Option<i64>,
}

/// Which metrics an aggregate response should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateMetric {
    /// Sample-weighted mean speed.
    AvgSpeed,
    /// Maximum speed.
    MaxSpeed,
    /// Minimum fuel level.
    MinFuel,
    /// Sum of distance deltas.
    TotalDistance,
    /// Number of events in the bucket.
    SampleCount,
}

impl AggregateMetric {
    /// Parses the wire name of a metric.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "avgSpeed" => Some(Self::AvgSpeed),
            "maxSpeed" => Some(Self::MaxSpeed),
            "minFuel" => Some(Self::MinFuel),
            "totalDistance" => Some(Self::TotalDistance),
            "sampleCount" => Some(Self::SampleCount),
            _ => None,
        }
    }

    /// All metrics, the default selection.
    pub fn all() -> Vec<Self> {
        vec![
            Self::AvgSpeed,
            Self::MaxSpeed,
            Self::MinFuel,
            Self::TotalDistance,
            Self::SampleCount,
        ]
    }
}

/// Parameters of an aggregate query.
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    /// Restrict to these vehicles; empty means all.
    pub vehicle_ids: Vec<VehicleId>,
    /// Inclusive lower bound on bucket start, as an instant.
    pub start: Option<OffsetDateTime>,
    /// Exclusive upper bound on bucket start, as an instant.
    pub end: Option<OffsetDateTime>,
    /// Requested bucket width in seconds.
    pub window_seconds: u32,
    /// Metrics to include; empty means all.
    pub metrics: Vec<AggregateMetric>,
}

/// One aggregate bucket; unselected metrics are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateBucket {
    /// Vehicle the bucket belongs to.
    pub vehicle_id: VehicleId,
    /// Bucket start, Unix epoch seconds.
    pub bucket_start: i64,
    /// Bucket end, Unix epoch seconds.
    pub bucket_end: i64,
    /// Sample-weighted mean speed.
    pub avg_speed: Option<f64>,
    /// Maximum speed.
    pub max_speed: Option<f64>,
    /// Minimum fuel level.
    pub min_fuel: Option<f64>,
    /// Summed distance deltas.
    pub total_distance: Option<f64>,
    /// Event count.
    pub sample_count: Option<u64>,
}

/// Aggregate response; `window_seconds` may have been raised to the base
/// window when no materialised window divided the request.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    /// Effective bucket width.
    pub window_seconds: u32,
    /// Buckets ordered by (bucket_start, vehicle_id).
    pub buckets: Vec<AggregateBucket>,
}

/// Row counts reported by the one-shot CLI.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReport {
    /// Vehicles known to the store.
    pub vehicles: u64,
    /// Persisted telemetry events.
    pub events: u64,
    /// Materialised rollup rows.
    pub rollup_rows: u64,
}

impl TelemetryStore {
    /// Opens (creating if missing) the store at `path` and applies pending
    /// migrations.
    pub fn open(path: &Path, opts: StoreOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn, opts)
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory(opts: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, opts)
    }

    fn initialize(mut conn: Connection, opts: StoreOptions) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::apply(&mut conn)?;

        let mut windows = opts.windows;
        if windows.is_empty() {
            windows.push(opts.base_window);
        }
        windows.sort_unstable();
        windows.dedup();
        Ok(Self {
            conn: Mutex::new(conn),
            windows,
            base_window: opts.base_window,
            catch_up_windows: opts.catch_up_windows,
        })
    }

    /// The materialised rollup windows, ascending.
    pub fn windows(&self) -> &[u32] {
        &self.windows
    }

    /// The base rollup window in seconds.
    pub fn base_window(&self) -> u32 {
        self.base_window
    }

    /// Atomically upserts the vehicle row, appends one event and updates the
    /// cumulative-distance cache.
    ///
    /// The distance delta is the great-circle distance from the vehicle's
    /// previously persisted position, zero for its first event.
    pub fn record(
        &self,
        rec: &TelemetryRecord,
        speed_kmh: f64,
        ingest_at: OffsetDateTime,
    ) -> Result<RecordOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let prev: Option<(f64, f64)> = tx
            .query_row(
                "SELECT last_lat, last_lng FROM vehicles WHERE vehicle_id = ?1",
                params![rec.vehicle_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let distance_km = prev
            .map(|(lat, lng)| geo::haversine_km(Position::new(lat, lng), rec.position))
            .unwrap_or(0.0);

        let recorded_ms = epoch_ms(rec.timestamp);
        let ingest_ms = epoch_ms(ingest_at);
        tx.execute(
            "INSERT INTO vehicles
                (vehicle_id, first_seen_at, last_seen_at, last_lat, last_lng,
                 last_engine_status, last_fuel_level)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(vehicle_id) DO UPDATE SET
                last_seen_at = excluded.last_seen_at,
                last_lat = excluded.last_lat,
                last_lng = excluded.last_lng,
                last_engine_status = excluded.last_engine_status,
                last_fuel_level = excluded.last_fuel_level",
            params![
                rec.vehicle_id,
                ingest_ms,
                rec.position.lat,
                rec.position.lng,
                rec.engine_status.as_str(),
                rec.fuel_level,
            ],
        )?;

        tx.execute(
            "INSERT INTO telemetry_events
                (vehicle_id, recorded_at, ingest_at, lat, lng, speed_kmh,
                 fuel_level, engine_status, distance_km)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                rec.vehicle_id,
                recorded_ms,
                ingest_ms,
                rec.position.lat,
                rec.position.lng,
                speed_kmh,
                rec.fuel_level,
                rec.engine_status.as_str(),
                distance_km,
            ],
        )?;
        let event_id = tx.last_insert_rowid();

        let cumulative_km: f64 = tx.query_row(
            "INSERT INTO telemetry_distance_cache (vehicle_id, last_event_id, cumulative_km)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(vehicle_id) DO UPDATE SET
                last_event_id = excluded.last_event_id,
                cumulative_km = telemetry_distance_cache.cumulative_km + excluded.cumulative_km
             RETURNING cumulative_km",
            params![rec.vehicle_id, event_id, distance_km],
            |r| r.get(0),
        )?;

        tx.commit()?;
        Ok(RecordOutcome {
            event_id,
            distance_km,
            cumulative_km,
        })
    }

    /// One ascending-time page of events.
    pub fn history(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        validate_range(query.start, query.end)?;
        let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);

        let mut sql = String::from(
            "SELECT event_id, vehicle_id, recorded_at, ingest_at, lat, lng,
                    speed_kmh, fuel_level, engine_status, distance_km
             FROM telemetry_events WHERE 1=1",
        );
        let mut args: Vec<SqlValue> = Vec::new();
        push_vehicle_filter(&mut sql, &mut args, &query.vehicle_ids);
        if let Some(start) = query.start {
            sql.push_str(&format!(" AND recorded_at >= ?{}", args.len() + 1));
            args.push(SqlValue::from(epoch_ms(start)));
        }
        if let Some(end) = query.end {
            sql.push_str(&format!(" AND recorded_at < ?{}", args.len() + 1));
            args.push(SqlValue::from(epoch_ms(end)));
        }
        if let Some(token) = query.page_token {
            sql.push_str(&format!(" AND event_id > ?{}", args.len() + 1));
            args.push(SqlValue::from(token));
        }
        sql.push_str(&format!(" ORDER BY event_id ASC LIMIT ?{}", args.len() + 1));
        args.push(SqlValue::from(limit as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(rusqlite::params_from_iter(args), row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let next_page_token = if events.len() == limit {
            events.last().map(|e| e.event_id)
        } else {
            None
        };
        Ok(HistoryPage {
            events,
            next_page_token,
        })
    }

    /// Windowed aggregates read from the rollup table.
    ///
    /// A request for a window that is not materialised regroups rows of the
    /// smallest materialised window dividing it; when nothing divides it the
    /// base window is used and the response reports the raised window.
    pub fn aggregates(&self, query: &AggregateQuery) -> Result<AggregateResult> {
        validate_range(query.start, query.end)?;
        if query.window_seconds == 0 {
            return Err(FleetError::InvalidArgument(
                "windowSeconds must be positive".into(),
            ));
        }

        let (source, target) = self.resolve_window(query.window_seconds);

        let mut sql = String::from(
            "SELECT vehicle_id, bucket_start, bucket_end, avg_speed, max_speed,
                    min_fuel, total_distance, sample_count
             FROM telemetry_rollups WHERE bucket_end - bucket_start = ?1",
        );
        let mut args: Vec<SqlValue> = vec![SqlValue::from(i64::from(source))];
        push_vehicle_filter(&mut sql, &mut args, &query.vehicle_ids);
        if let Some(start) = query.start {
            sql.push_str(&format!(" AND bucket_start >= ?{}", args.len() + 1));
            args.push(SqlValue::from(start.unix_timestamp()));
        }
        if let Some(end) = query.end {
            sql.push_str(&format!(" AND bucket_start < ?{}", args.len() + 1));
            args.push(SqlValue::from(end.unix_timestamp()));
        }
        sql.push_str(" ORDER BY bucket_start ASC, vehicle_id ASC");

        struct SourceRow {
            vehicle_id: String,
            bucket_start: i64,
            avg_speed: f64,
            max_speed: f64,
            min_fuel: f64,
            total_distance: f64,
            sample_count: u64,
        }

        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let result = stmt
                .query_map(rusqlite::params_from_iter(args), |r| {
                    Ok(SourceRow {
                        vehicle_id: r.get(0)?,
                        bucket_start: r.get(1)?,
                        avg_speed: r.get(3)?,
                        max_speed: r.get(4)?,
                        min_fuel: r.get(5)?,
                        total_distance: r.get(6)?,
                        sample_count: r.get::<_, i64>(7)? as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            result
        };

        // Regroup source buckets onto the target grid. Weighted mean for the
        // average, straight min/max/sum for the rest.
        struct Acc {
            speed_sum: f64,
            max_speed: f64,
            min_fuel: f64,
            total_distance: f64,
            sample_count: u64,
        }
        let target_i64 = i64::from(target);
        let mut grouped: BTreeMap<(i64, String), Acc> = BTreeMap::new();
        for row in rows {
            let target_start = row.bucket_start.div_euclid(target_i64) * target_i64;
            let acc = grouped
                .entry((target_start, row.vehicle_id))
                .or_insert(Acc {
                    speed_sum: 0.0,
                    max_speed: f64::NEG_INFINITY,
                    min_fuel: f64::INFINITY,
                    total_distance: 0.0,
                    sample_count: 0,
                });
            acc.speed_sum += row.avg_speed * row.sample_count as f64;
            acc.max_speed = acc.max_speed.max(row.max_speed);
            acc.min_fuel = acc.min_fuel.min(row.min_fuel);
            acc.total_distance += row.total_distance;
            acc.sample_count += row.sample_count;
        }

        let selection: Vec<AggregateMetric> = if query.metrics.is_empty() {
            AggregateMetric::all()
        } else {
            query.metrics.clone()
        };
        let selected = |m: AggregateMetric| selection.contains(&m);

        let buckets = grouped
            .into_iter()
            .map(|((bucket_start, vehicle_id), acc)| AggregateBucket {
                vehicle_id,
                bucket_start,
                bucket_end: bucket_start + target_i64,
                avg_speed: selected(AggregateMetric::AvgSpeed)
                    .then(|| acc.speed_sum / acc.sample_count.max(1) as f64),
                max_speed: selected(AggregateMetric::MaxSpeed).then_some(acc.max_speed),
                min_fuel: selected(AggregateMetric::MinFuel).then_some(acc.min_fuel),
                total_distance: selected(AggregateMetric::TotalDistance)
                    .then_some(acc.total_distance),
                sample_count: selected(AggregateMetric::SampleCount).then_some(acc.sample_count),
            })
            .collect();

        Ok(AggregateResult {
            window_seconds: target,
            buckets,
        })
    }

    /// Picks `(source, target)` windows for an aggregate request.
    fn resolve_window(&self, requested: u32) -> (u32, u32) {
        if self.windows.contains(&requested) {
            return (requested, requested);
        }
        match self
            .windows
            .iter()
            .copied()
            .filter(|&w| requested % w == 0)
            .min()
        {
            Some(source) => (source, requested),
            None => (self.base_window, self.base_window),
        }
    }

    /// Cumulative distance for one vehicle, if it has any events.
    pub fn cumulative_km(&self, vehicle_id: &str) -> Result<Option<f64>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT cumulative_km FROM telemetry_distance_cache WHERE vehicle_id = ?1",
                params![vehicle_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    /// Row counts for operational tooling.
    pub fn report(&self) -> Result<StoreReport> {
        let conn = self.conn.lock();
        let vehicles: i64 = conn.query_row("SELECT COUNT(*) FROM vehicles", [], |r| r.get(0))?;
        let events: i64 =
            conn.query_row("SELECT COUNT(*) FROM telemetry_events", [], |r| r.get(0))?;
        let rollup_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM telemetry_rollups", [], |r| r.get(0))?;
        Ok(StoreReport {
            vehicles: vehicles as u64,
            events: events as u64,
            rollup_rows: rollup_rows as u64,
        })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    pub(crate) fn catch_up_windows(&self) -> u32 {
        self.catch_up_windows
    }
}

/// Rejects inverted or empty caller-supplied time ranges.
pub fn validate_range(start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> Result<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(FleetError::InvalidArgument(
                "start must be before end".into(),
            ));
        }
    }
    Ok(())
}

fn push_vehicle_filter(sql: &mut String, args: &mut Vec<SqlValue>, vehicle_ids: &[VehicleId]) {
    if vehicle_ids.is_empty() {
        return;
    }
    let placeholders: Vec<String> = vehicle_ids
        .iter()
        .enumerate()
        .map(|(i, _)| format!("?{}", args.len() + i + 1))
        .collect();
    sql.push_str(&format!(" AND vehicle_id IN ({})", placeholders.join(", ")));
    for id in vehicle_ids {
        args.push(SqlValue::from(id.clone()));
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<TelemetryEvent> {
    let status_raw: String = row.get(8)?;
    let engine_status = EngineStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown engine status `{status_raw}`").into(),
        )
    })?;
    Ok(TelemetryEvent {
        event_id: row.get(0)?,
        vehicle_id: row.get(1)?,
        recorded_at: from_epoch_ms(row.get(2)?),
        ingest_at: from_epoch_ms(row.get(3)?),
        position: Position::new(row.get(4)?, row.get(5)?),
        speed_kmh: row.get(6)?,
        fuel_level: row.get(7)?,
        engine_status,
        distance_km: row.get(9)?,
    })
}
