//! The ingest pipeline: parse → validate → enrich → cache → persist → fan out.
//!
//! The pipeline is the only writer of the vehicle cache (the expiry sweep
//! aside), the rate window and the store. It never propagates errors: bad
//! payloads are counted and dropped, storage failures are logged and the
//! in-memory view stays consistent with the live stream.

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::cache::SharedVehicleCache;
use crate::fanout::FanoutHub;
use crate::geo;
use crate::metrics::ServiceStats;
use crate::model::{EnrichedVehicle, TelemetryRecord};
use crate::store::TelemetryStore;
use crate::validate::validate;

/// Drives every inbound payload through the ingest steps.
pub struct IngestPipeline {
    cache: SharedVehicleCache,
    store: Arc<TelemetryStore>,
    hub: Arc<FanoutHub>,
    stats: Arc<ServiceStats>,
}

impl IngestPipeline {
    /// Wires the pipeline to its collaborators.
    pub fn new(
        cache: SharedVehicleCache,
        store: Arc<TelemetryStore>,
        hub: Arc<FanoutHub>,
        stats: Arc<ServiceStats>,
    ) -> Self {
        Self {
            cache,
            store,
            hub,
            stats,
        }
    }

    /// Processes one broker payload end to end.
    ///
    /// Exactly one of the two counters is incremented per call: accepted
    /// payloads count towards `totalMessages`, everything else towards
    /// `invalidMessages`.
    pub fn handle_payload(&self, payload: &[u8]) {
        let raw: Value = match serde_json::from_slice(payload) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "undecodable telemetry payload");
                self.stats.record_invalid();
                return;
            }
        };
        let record = match validate(&raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "rejected telemetry payload");
                self.stats.record_invalid();
                return;
            }
        };

        let now = OffsetDateTime::now_utc();
        let speed_kmh = {
            let cache = self.cache.read();
            derive_speed(cache.get(&record.vehicle_id), &record)
        };
        let enriched = EnrichedVehicle {
            record: record.clone(),
            speed_kmh,
            last_seen: now,
        };

        self.cache
            .write()
            .set(record.vehicle_id.clone(), enriched.clone());
        self.stats.record_valid();

        if let Err(err) = self.store.record(&record, speed_kmh, now) {
            // The cache and the live stream stay ahead of the log; rollups
            // recover on their own since they read events only.
            error!(vehicle_id = %record.vehicle_id, error = %err, "event persistence failed");
        }

        self.hub.broadcast_update(&enriched);
    }
}

/// Speed between the previous enriched state and the next observation.
///
/// Zero for the first observation of a vehicle and whenever the timestamp
/// does not strictly increase.
fn derive_speed(prev: Option<&EnrichedVehicle>, next: &TelemetryRecord) -> f64 {
    let Some(prev) = prev else {
        return 0.0;
    };
    if next.timestamp <= prev.record.timestamp {
        return 0.0;
    }
    let dt_hours = (next.timestamp - prev.record.timestamp).as_seconds_f64() / 3600.0;
    geo::haversine_km(prev.record.position, next.position) / dt_hours
}

/// Consumes payloads off the broker channel on a blocking worker, keeping
/// SQLite writes away from the async reactor. The loop ends when the sender
/// side is dropped at shutdown.
pub fn spawn_ingest_loop(
    pipeline: Arc<IngestPipeline>,
    mut payloads: UnboundedReceiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while let Some(payload) = payloads.blocking_recv() {
            pipeline.handle_payload(&payload);
        }
    })
}
