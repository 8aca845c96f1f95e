//! HTTP query surface and the WebSocket upgrade endpoint.
//!
//! All responses are JSON and CORS is wide open; the dashboard is served
//! from elsewhere. Invalid caller input maps to 400, everything unexpected
//! to 500 with the message as detail and never a backtrace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{RawQuery, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::SharedVehicleCache;
use crate::error::FleetError;
use crate::fanout::FanoutHub;
use crate::metrics::{ServiceStats, StatsSnapshot};
use crate::model::{format_rfc3339, from_epoch_ms};
use crate::store::{
    AggregateMetric, AggregateQuery, HistoryQuery, TelemetryEvent, TelemetryStore,
    DEFAULT_HISTORY_LIMIT,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Vehicle cache, read-only from here.
    pub cache: SharedVehicleCache,
    /// Live fan-out hub.
    pub hub: Arc<FanoutHub>,
    /// Durable store.
    pub store: Arc<TelemetryStore>,
    /// Operational counters.
    pub stats: Arc<ServiceStats>,
    /// Broker connectivity flag backing the readiness probe.
    pub broker_ready: Arc<AtomicBool>,
}

/// Builds the full router, including the push channel at `ws_path`.
pub fn build_router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/stats", get(stats_handler))
        .route("/telemetry/summary", get(summary_handler))
        .route("/telemetry/history", get(history_handler))
        .route(ws_path, get(stream_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Error)]
enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Internal(String),
}

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::InvalidArgument(msg) => ApiError::InvalidArgument(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<task::JoinError> for ApiError {
    fn from(err: task::JoinError) -> Self {
        ApiError::Internal(format!("internal task failure: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = Json(json!({"error": kind, "message": self.to_string()}));
        (status, body).into_response()
    }
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn readyz_handler(State(state): State<AppState>) -> Response {
    if state.broker_ready.load(Ordering::Acquire) {
        (StatusCode::OK, Json(json!({"status": "ready"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready"})),
        )
            .into_response()
    }
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(StatsSnapshot {
        total_messages: state.stats.total_messages(),
        invalid_messages: state.stats.invalid_messages(),
        vehicles_tracked: state.cache.read().len(),
        connected_clients: state.hub.connected_clients(),
        message_rate_per_second: state.stats.message_rate(),
        window_seconds: state.stats.window_seconds(),
    })
}

async fn stream_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| hub.serve_socket(socket))
}

#[derive(Debug, Default)]
struct QueryParams {
    vehicle_ids: Vec<String>,
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
    duration_seconds: Option<u64>,
    window_seconds: Option<u32>,
    limit: Option<usize>,
    page_token: Option<i64>,
    aggregates: Vec<AggregateMetric>,
}

impl QueryParams {
    fn parse(query: Option<&str>) -> Result<Self, ApiError> {
        let mut params = QueryParams::default();
        let Some(query) = query.filter(|q| !q.is_empty()) else {
            return Ok(params);
        };
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|err| ApiError::InvalidArgument(format!("malformed query string: {err}")))?;
        for (key, value) in pairs {
            match key.as_str() {
                "vehicleId" => params.vehicle_ids.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(String::from),
                ),
                "start" => params.start = Some(parse_instant("start", &value)?),
                "end" => params.end = Some(parse_instant("end", &value)?),
                "durationSeconds" => {
                    params.duration_seconds = Some(parse_number("durationSeconds", &value)?)
                }
                "windowSeconds" => {
                    params.window_seconds = Some(parse_number("windowSeconds", &value)?)
                }
                "limit" => params.limit = Some(parse_number("limit", &value)?),
                "pageToken" => {
                    params.page_token = Some(parse_number("pageToken", &value)?);
                }
                "aggregate" => {
                    let metric = AggregateMetric::parse(value.trim()).ok_or_else(|| {
                        ApiError::InvalidArgument(format!("unknown aggregate `{value}`"))
                    })?;
                    params.aggregates.push(metric);
                }
                // Unknown parameters are ignored for forward compatibility.
                _ => {}
            }
        }
        Ok(params)
    }

    /// Resolves the effective time range: explicit bounds win, otherwise a
    /// trailing `durationSeconds` window ending now.
    fn time_range(&self) -> (Option<OffsetDateTime>, Option<OffsetDateTime>) {
        if self.start.is_some() || self.end.is_some() {
            return (self.start, self.end);
        }
        if let Some(duration) = self.duration_seconds {
            let end = OffsetDateTime::now_utc();
            let start = end - std::time::Duration::from_secs(duration);
            return (Some(start), Some(end));
        }
        (None, None)
    }
}

fn parse_instant(name: &str, value: &str) -> Result<OffsetDateTime, ApiError> {
    OffsetDateTime::parse(value.trim(), &Rfc3339)
        .map_err(|_| ApiError::InvalidArgument(format!("`{name}` is not a valid instant")))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ApiError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ApiError::InvalidArgument(format!("`{name}` is not a valid number")))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventPayload {
    event_id: i64,
    vehicle_id: String,
    recorded_at: String,
    ingest_at: String,
    lat: f64,
    lng: f64,
    speed_kmh: f64,
    fuel_level: f64,
    engine_status: String,
    distance_km: f64,
}

impl From<&TelemetryEvent> for EventPayload {
    fn from(event: &TelemetryEvent) -> Self {
        Self {
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
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPayload {
    events: Vec<EventPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

async fn history_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<HistoryPayload>, ApiError> {
    let params = QueryParams::parse(query.as_deref())?;
    let (start, end) = params.time_range();
    let request = HistoryQuery {
        vehicle_ids: params.vehicle_ids,
        start,
        end,
        limit: params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        page_token: params.page_token,
    };

    let store = state.store.clone();
    let page = task::spawn_blocking(move || store.history(&request)).await??;
    Ok(Json(HistoryPayload {
        events: page.events.iter().map(EventPayload::from).collect(),
        next_page_token: page.next_page_token.map(|token| token.to_string()),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BucketPayload {
    vehicle_id: String,
    bucket_start: String,
    bucket_end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    avg_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_fuel: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_count: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryPayload {
    window_seconds: u32,
    buckets: Vec<BucketPayload>,
}

async fn summary_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<SummaryPayload>, ApiError> {
    let params = QueryParams::parse(query.as_deref())?;
    let (start, end) = params.time_range();
    let request = AggregateQuery {
        vehicle_ids: params.vehicle_ids,
        start,
        end,
        window_seconds: params
            .window_seconds
            .unwrap_or_else(|| state.store.base_window()),
        metrics: params.aggregates,
    };

    let store = state.store.clone();
    let result = task::spawn_blocking(move || store.aggregates(&request)).await??;
    let buckets = result
        .buckets
        .into_iter()
        .map(|b| BucketPayload {
            vehicle_id: b.vehicle_id,
            bucket_start: format_rfc3339(from_epoch_ms(b.bucket_start * 1000)),
            bucket_end: format_rfc3339(from_epoch_ms(b.bucket_end * 1000)),
            avg_speed: b.avg_speed,
            max_speed: b.max_speed,
            min_fuel: b.min_fuel,
            total_distance: b.total_distance,
            sample_count: b.sample_count,
        })
        .collect();
    Ok(Json(SummaryPayload {
        window_seconds: result.window_seconds,
        buckets,
    }))
}
