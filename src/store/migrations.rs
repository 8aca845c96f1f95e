//! Embedded schema migrations for the telemetry store.
//!
//! Migrations are keyed by a lexically ordered version string and applied
//! inside a single transaction; each applied version is recorded in
//! `schema_migrations` so reopening an existing database is a no-op.

use rusqlite::{params, Connection};
use time::OffsetDateTime;

use crate::error::Result;
use crate::model::format_rfc3339;

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_telemetry_schema",
    "
    CREATE TABLE vehicles (
        vehicle_id         TEXT PRIMARY KEY,
        first_seen_at      INTEGER NOT NULL,
        last_seen_at       INTEGER NOT NULL,
        last_lat           REAL NOT NULL,
        last_lng           REAL NOT NULL,
        last_engine_status TEXT NOT NULL,
        last_fuel_level    REAL NOT NULL
    );

    CREATE TABLE telemetry_events (
        event_id      INTEGER PRIMARY KEY AUTOINCREMENT,
        vehicle_id    TEXT NOT NULL REFERENCES vehicles(vehicle_id),
        recorded_at   INTEGER NOT NULL,
        ingest_at     INTEGER NOT NULL,
        lat           REAL NOT NULL,
        lng           REAL NOT NULL,
        speed_kmh     REAL NOT NULL,
        fuel_level    REAL NOT NULL,
        engine_status TEXT NOT NULL,
        distance_km   REAL NOT NULL
    );
    CREATE INDEX idx_events_vehicle_recorded
        ON telemetry_events (vehicle_id, recorded_at DESC);
    CREATE INDEX idx_events_ingest ON telemetry_events (ingest_at);

    CREATE TABLE telemetry_distance_cache (
        vehicle_id    TEXT PRIMARY KEY,
        last_event_id INTEGER NOT NULL,
        cumulative_km REAL NOT NULL
    );

    CREATE TABLE telemetry_rollups (
        bucket_start   INTEGER NOT NULL,
        bucket_end     INTEGER NOT NULL,
        vehicle_id     TEXT NOT NULL,
        avg_speed      REAL NOT NULL,
        max_speed      REAL NOT NULL,
        min_fuel       REAL NOT NULL,
        total_distance REAL NOT NULL,
        sample_count   INTEGER NOT NULL,
        PRIMARY KEY (bucket_start, bucket_end, vehicle_id)
    );
    ",
)];

/// Applies every pending migration, oldest first.
pub fn apply(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;

    let tx = conn.transaction()?;
    let now = format_rfc3339(OffsetDateTime::now_utc());
    for (version, sql) in MIGRATIONS {
        let applied: bool = tx
            .prepare("SELECT 1 FROM schema_migrations WHERE version = ?1")?
            .exists(params![version])?;
        if applied {
            continue;
        }
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, now],
        )?;
        tracing::info!(version, "applied store migration");
    }
    tx.commit()?;
    Ok(())
}
