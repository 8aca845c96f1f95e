//! gRPC query surface.
//!
//! Four operations mirror the HTTP queries: a unary fleet snapshot, a live
//! snapshot stream that re-polls the cache, a history page stream, and
//! unary aggregates. Server streams stamp an `active-stream-count` metadata
//! header; a truncated history page additionally carries `next-page-token`.
//! Invalid time ranges come back as `InvalidArgument`, everything
//! unexpected as `Internal` with the message as detail.

pub mod proto;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::cache::SharedVehicleCache;
use crate::config::GrpcConfig;
use crate::error::{FleetError, Result};
use crate::fanout::FanoutHub;
use crate::metrics::ServiceStats;
use crate::model::{format_rfc3339, EnrichedVehicle};
use crate::store::{
    AggregateBucket, AggregateMetric, AggregateQuery, HistoryQuery, TelemetryEvent,
    TelemetryStore, DEFAULT_HISTORY_LIMIT,
};

use proto::fleet_telemetry_server::{FleetTelemetry, FleetTelemetryServer};

/// The service behind the four RPC operations.
pub struct FleetTelemetryService {
    cache: SharedVehicleCache,
    store: Arc<TelemetryStore>,
    stats: Arc<ServiceStats>,
    hub: Arc<FanoutHub>,
    stream_interval: Duration,
    stream_heartbeat: Duration,
    active_streams: Arc<AtomicI64>,
}

impl FleetTelemetryService {
    /// Wires the service to the shared state.
    pub fn new(
        cache: SharedVehicleCache,
        store: Arc<TelemetryStore>,
        stats: Arc<ServiceStats>,
        hub: Arc<FanoutHub>,
        config: &GrpcConfig,
    ) -> Self {
        Self {
            cache,
            store,
            stats,
            hub,
            stream_interval: Duration::from_millis(config.stream_interval_ms.max(10)),
            stream_heartbeat: Duration::from_millis(config.stream_heartbeat_ms.max(10)),
            active_streams: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Streams currently held open by callers.
    pub fn active_streams(&self) -> i64 {
        self.active_streams.load(Ordering::Acquire)
    }

    fn fleet_metrics(&self) -> proto::FleetMetrics {
        proto::FleetMetrics {
            total_messages: self.stats.total_messages(),
            invalid_messages: self.stats.invalid_messages(),
            vehicles_tracked: self.cache.read().len() as u64,
            connected_clients: self.hub.connected_clients() as u64,
            message_rate_per_second: self.stats.message_rate(),
            window_seconds: self.stats.window_seconds(),
        }
    }
}

/// Counts a live stream for the lifetime of the guard; the decrement in
/// `Drop` runs exactly once however the stream ends.
struct StreamGuard {
    counter: Arc<AtomicI64>,
    count_at_open: i64,
}

impl StreamGuard {
    fn new(counter: Arc<AtomicI64>) -> Self {
        let count_at_open = counter.fetch_add(1, Ordering::AcqRel) + 1;
        Self {
            counter,
            count_at_open,
        }
    }

    fn count(&self) -> i64 {
        self.count_at_open
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

fn status_from(err: FleetError) -> Status {
    if err.is_invalid_argument() {
        Status::invalid_argument(err.to_string())
    } else {
        Status::internal(err.to_string())
    }
}

fn join_error(err: task::JoinError) -> Status {
    Status::internal(format!("internal task failure: {err}"))
}

/// Empty strings mean an unbounded endpoint; anything else must parse.
fn parse_bound(name: &str, value: &str) -> std::result::Result<Option<OffsetDateTime>, Status> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    OffsetDateTime::parse(trimmed, &Rfc3339)
        .map(Some)
        .map_err(|_| Status::invalid_argument(format!("`{name}` is not a valid instant")))
}

fn insert_ascii(metadata: &mut MetadataMap, key: &'static str, value: String) {
    match value.parse() {
        Ok(value) => {
            metadata.insert(key, value);
        }
        Err(_) => warn!(key, "metadata value not representable"),
    }
}

fn vehicle_state(vehicle: &EnrichedVehicle) -> proto::VehicleState {
    let rec = &vehicle.record;
    proto::VehicleState {
        vehicle_id: rec.vehicle_id.clone(),
        lat: rec.position.lat,
        lng: rec.position.lng,
        recorded_at: format_rfc3339(rec.timestamp),
        speed_kmh: vehicle.speed_kmh,
        fuel_level: rec.fuel_level,
        engine_status: rec.engine_status.as_str().to_string(),
        last_seen: format_rfc3339(vehicle.last_seen),
    }
}

fn event_message(event: &TelemetryEvent) -> proto::TelemetryEventMessage {
    proto::TelemetryEventMessage {
        event_id: event.event_id,
        vehicle_id: event.vehicle_id.clone(),
        recorded_at: format_rfc3339(event.recorded_at),
        ingest_at: format_rfc3339(event.ingest_at),
        lat: event.position.lat,
        lng: event.position.lng,
        speed_kmh: event.speed_kmh,
        fuel_level: event.fuel_level,
        engine_status: event.engine_status.as_str().to_string(),
        distance_km: event.distance_km,
    }
}

fn bucket_message(bucket: AggregateBucket) -> proto::AggregateBucketMessage {
    proto::AggregateBucketMessage {
        vehicle_id: bucket.vehicle_id,
        bucket_start: bucket.bucket_start,
        bucket_end: bucket.bucket_end,
        avg_speed: bucket.avg_speed,
        max_speed: bucket.max_speed,
        min_fuel: bucket.min_fuel,
        total_distance: bucket.total_distance,
        sample_count: bucket.sample_count,
    }
}

#[tonic::async_trait]
impl FleetTelemetry for FleetTelemetryService {
    async fn get_fleet_snapshot(
        &self,
        request: Request<proto::FleetSnapshotRequest>,
    ) -> std::result::Result<Response<proto::FleetSnapshotResponse>, Status> {
        let req = request.into_inner();
        let filter: HashSet<String> = req.vehicle_ids.into_iter().collect();
        let vehicles: Vec<proto::VehicleState> = self
            .cache
            .read()
            .entries()
            .into_iter()
            .filter(|(id, _)| filter.is_empty() || filter.contains(id))
            .map(|(_, vehicle)| vehicle_state(&vehicle))
            .collect();
        let metrics = req.include_metrics.then(|| self.fleet_metrics());
        Ok(Response::new(proto::FleetSnapshotResponse {
            vehicles,
            metrics,
        }))
    }

    type StreamFleetSnapshotsStream =
        ReceiverStream<std::result::Result<proto::VehicleState, Status>>;

    async fn stream_fleet_snapshots(
        &self,
        request: Request<proto::StreamFleetSnapshotsRequest>,
    ) -> std::result::Result<Response<Self::StreamFleetSnapshotsStream>, Status> {
        let req = request.into_inner();
        let filter: HashSet<String> = req.vehicle_ids.into_iter().collect();

        let guard = StreamGuard::new(self.active_streams.clone());
        let count = guard.count();
        let (tx, rx) = mpsc::channel(16);
        let cache = self.cache.clone();
        let interval = self.stream_interval;
        let heartbeat = self.stream_heartbeat;

        // Per-call backpressure: the bounded channel makes `send` wait for
        // the transport to drain before the next poll round.
        tokio::spawn(async move {
            let _guard = guard;
            let mut last_sent: HashMap<String, OffsetDateTime> = HashMap::new();
            let mut last_activity = tokio::time::Instant::now();
            loop {
                let entries = cache.read().entries();
                let force = last_activity.elapsed() >= heartbeat;
                let mut sent_any = false;
                for (id, vehicle) in entries {
                    if !filter.is_empty() && !filter.contains(&id) {
                        continue;
                    }
                    let changed = last_sent.get(&id) != Some(&vehicle.last_seen);
                    if changed || force {
                        if tx.send(Ok(vehicle_state(&vehicle))).await.is_err() {
                            debug!("live snapshot stream cancelled");
                            return;
                        }
                        last_sent.insert(id, vehicle.last_seen);
                        sent_any = true;
                    }
                }
                if sent_any {
                    last_activity = tokio::time::Instant::now();
                }
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("live snapshot stream cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        let mut response = Response::new(ReceiverStream::new(rx));
        insert_ascii(
            response.metadata_mut(),
            "active-stream-count",
            count.to_string(),
        );
        Ok(response)
    }

    type StreamHistoryStream =
        ReceiverStream<std::result::Result<proto::TelemetryEventMessage, Status>>;

    async fn stream_history(
        &self,
        request: Request<proto::HistoryRequest>,
    ) -> std::result::Result<Response<Self::StreamHistoryStream>, Status> {
        let req = request.into_inner();
        let start = parse_bound("start", &req.start)?;
        let end = parse_bound("end", &req.end)?;
        let query = HistoryQuery {
            vehicle_ids: req.vehicle_ids,
            start,
            end,
            limit: if req.limit == 0 {
                DEFAULT_HISTORY_LIMIT
            } else {
                req.limit as usize
            },
            page_token: (req.page_token != 0).then_some(req.page_token),
        };

        let store = self.store.clone();
        let page = task::spawn_blocking(move || store.history(&query))
            .await
            .map_err(join_error)?
            .map_err(status_from)?;

        let guard = StreamGuard::new(self.active_streams.clone());
        let count = guard.count();
        let events: Vec<proto::TelemetryEventMessage> =
            page.events.iter().map(event_message).collect();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _guard = guard;
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        let mut response = Response::new(ReceiverStream::new(rx));
        insert_ascii(
            response.metadata_mut(),
            "active-stream-count",
            count.to_string(),
        );
        if let Some(token) = page.next_page_token {
            insert_ascii(response.metadata_mut(), "next-page-token", token.to_string());
        }
        Ok(response)
    }

    async fn get_aggregates(
        &self,
        request: Request<proto::AggregatesRequest>,
    ) -> std::result::Result<Response<proto::AggregatesResponse>, Status> {
        let req = request.into_inner();
        let start = parse_bound("start", &req.start)?;
        let end = parse_bound("end", &req.end)?;
        let mut metrics = Vec::with_capacity(req.aggregates.len());
        for name in &req.aggregates {
            let metric = AggregateMetric::parse(name.trim()).ok_or_else(|| {
                Status::invalid_argument(format!("unknown aggregate `{name}`"))
            })?;
            metrics.push(metric);
        }
        let query = AggregateQuery {
            vehicle_ids: req.vehicle_ids,
            start,
            end,
            window_seconds: if req.window_seconds == 0 {
                self.store.base_window()
            } else {
                req.window_seconds
            },
            metrics,
        };

        let store = self.store.clone();
        let result = task::spawn_blocking(move || store.aggregates(&query))
            .await
            .map_err(join_error)?
            .map_err(status_from)?;

        Ok(Response::new(proto::AggregatesResponse {
            window_seconds: result.window_seconds,
            buckets: result.buckets.into_iter().map(bucket_message).collect(),
        }))
    }
}

/// Runs the gRPC server until `shutdown` resolves.
pub async fn serve(
    service: FleetTelemetryService,
    config: &GrpcConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|err| FleetError::Config(format!("invalid grpc listen address: {err}")))?;
    tracing::info!(%addr, "grpc listening");
    tonic::transport::Server::builder()
        .http2_keepalive_interval(Some(Duration::from_millis(config.keepalive_time_ms)))
        .http2_keepalive_timeout(Some(Duration::from_millis(config.keepalive_timeout_ms)))
        .add_service(FleetTelemetryServer::new(service))
        .serve_with_shutdown(addr, shutdown)
        .await
        .map_err(|err| FleetError::Internal(format!("grpc server error: {err}")))
}
