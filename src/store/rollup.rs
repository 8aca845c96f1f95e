//! Incremental rollup computation.
//!
//! For every configured window `S`, buckets align on epoch boundaries:
//! `bucket_start = floor(recorded_at_epoch / S) * S`. A pass recomputes the
//! range `[aligned_start, aligned_end)` where `aligned_end` is the current
//! instant aligned down and `aligned_start` backs off `catch_up` windows
//! from the newest materialised bucket, clamped to the oldest event. Upserts
//! make the pass idempotent: recomputing a range yields identical rows.

use rusqlite::params;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::Result;

use super::TelemetryStore;

/// Outcome of one rollup pass across all configured windows.
#[derive(Debug, Clone, Default)]
pub struct RollupSummary {
    /// Per-window details, in ascending window order.
    pub windows: Vec<WindowRollupStats>,
}

impl RollupSummary {
    /// Total buckets written across every window.
    pub fn buckets_upserted(&self) -> usize {
        self.windows.iter().map(|w| w.buckets_upserted).sum()
    }
}

/// Details of a single window's rollup pass.
#[derive(Debug, Clone)]
pub struct WindowRollupStats {
    /// The window size in seconds.
    pub window_seconds: u32,
    /// Start of the recomputed range, epoch seconds.
    pub range_start: i64,
    /// End of the recomputed range, epoch seconds.
    pub range_end: i64,
    /// Bucket rows written.
    pub buckets_upserted: usize,
}

impl TelemetryStore {
    /// Runs one rollup pass over every configured window.
    ///
    /// `force` recomputes from the oldest event instead of backing off from
    /// the last processed bucket.
    pub fn compute_rollups(&self, now: OffsetDateTime, force: bool) -> Result<RollupSummary> {
        let mut summary = RollupSummary::default();
        let windows = self.windows().to_vec();
        for window in windows {
            if let Some(stats) = self.rollup_window(now, window, force)? {
                debug!(
                    window_seconds = window,
                    range_start = stats.range_start,
                    range_end = stats.range_end,
                    buckets = stats.buckets_upserted,
                    "rollup pass"
                );
                summary.windows.push(stats);
            }
        }
        Ok(summary)
    }

    fn rollup_window(
        &self,
        now: OffsetDateTime,
        window: u32,
        force: bool,
    ) -> Result<Option<WindowRollupStats>> {
        let window_i64 = i64::from(window);
        let catch_up = i64::from(self.catch_up_windows());
        let aligned_end = now.unix_timestamp().div_euclid(window_i64) * window_i64;

        self.with_conn(|conn| {
            let oldest_ms: Option<i64> = conn.query_row(
                "SELECT MIN(recorded_at) FROM telemetry_events",
                [],
                |r| r.get(0),
            )?;
            let Some(oldest_ms) = oldest_ms else {
                return Ok(None);
            };
            let oldest_aligned = (oldest_ms / 1000).div_euclid(window_i64) * window_i64;

            let last_end: Option<i64> = conn.query_row(
                "SELECT MAX(bucket_end) FROM telemetry_rollups
                 WHERE bucket_end - bucket_start = ?1",
                params![window_i64],
                |r| r.get(0),
            )?;

            let range_start = match (force, last_end) {
                (true, _) | (false, None) => oldest_aligned,
                (false, Some(last_end)) => {
                    let backed_off =
                        (last_end - catch_up * window_i64).div_euclid(window_i64) * window_i64;
                    backed_off.max(oldest_aligned)
                }
            };
            if range_start >= aligned_end {
                return Ok(None);
            }

            let tx = conn.transaction()?;
            let buckets_upserted;
            {
                let mut select = tx.prepare(
                    "SELECT vehicle_id,
                            (recorded_at / 1000 / ?1) * ?1 AS bucket_start,
                            AVG(speed_kmh),
                            MAX(speed_kmh),
                            MIN(fuel_level),
                            SUM(distance_km),
                            COUNT(*)
                     FROM telemetry_events
                     WHERE recorded_at >= ?2 AND recorded_at < ?3
                     GROUP BY vehicle_id, bucket_start",
                )?;
                let mut upsert = tx.prepare(
                    "INSERT INTO telemetry_rollups
                        (bucket_start, bucket_end, vehicle_id, avg_speed, max_speed,
                         min_fuel, total_distance, sample_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(bucket_start, bucket_end, vehicle_id) DO UPDATE SET
                        avg_speed = excluded.avg_speed,
                        max_speed = excluded.max_speed,
                        min_fuel = excluded.min_fuel,
                        total_distance = excluded.total_distance,
                        sample_count = excluded.sample_count",
                )?;

                struct BucketRow {
                    vehicle_id: String,
                    bucket_start: i64,
                    avg_speed: f64,
                    max_speed: f64,
                    min_fuel: f64,
                    total_distance: f64,
                    sample_count: i64,
                }
                let rows = select
                    .query_map(
                        params![window_i64, range_start * 1000, aligned_end * 1000],
                        |r| {
                            Ok(BucketRow {
                                vehicle_id: r.get(0)?,
                                bucket_start: r.get(1)?,
                                avg_speed: r.get(2)?,
                                max_speed: r.get(3)?,
                                min_fuel: r.get(4)?,
                                total_distance: r.get(5)?,
                                sample_count: r.get(6)?,
                            })
                        },
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                buckets_upserted = rows.len();
                for row in rows {
                    upsert.execute(params![
                        row.bucket_start,
                        row.bucket_start + window_i64,
                        row.vehicle_id,
                        row.avg_speed,
                        row.max_speed,
                        row.min_fuel,
                        row.total_distance,
                        row.sample_count,
                    ])?;
                }
            }
            tx.commit()?;

            Ok(Some(WindowRollupStats {
                window_seconds: window,
                range_start,
                range_end: aligned_end,
                buckets_upserted,
            }))
        })
    }
}
