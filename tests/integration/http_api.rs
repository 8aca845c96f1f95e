#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::RwLock;
use serde_json::Value;
use tower::ServiceExt;

use fleetstream::cache::{SharedVehicleCache, VehicleCache};
use fleetstream::config::WebSocketConfig;
use fleetstream::fanout::FanoutHub;
use fleetstream::http::{build_router, AppState};
use fleetstream::metrics::ServiceStats;
use fleetstream::model::{EngineStatus, Position, TelemetryRecord};
use fleetstream::store::{StoreOptions, TelemetryStore};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

const T0: OffsetDateTime = datetime!(2024-01-01 00:00:00 UTC);

struct Rig {
    router: Router,
    store: Arc<TelemetryStore>,
    broker_ready: Arc<AtomicBool>,
}

fn rig() -> Rig {
    let cache: SharedVehicleCache = Arc::new(RwLock::new(VehicleCache::new(100)));
    let hub = Arc::new(FanoutHub::new(cache.clone(), &WebSocketConfig::default()));
    let store = Arc::new(
        TelemetryStore::open_in_memory(StoreOptions {
            windows: vec![60, 300],
            base_window: 300,
            catch_up_windows: 1,
        })
        .unwrap(),
    );
    let stats = Arc::new(ServiceStats::new(60_000));
    let broker_ready = Arc::new(AtomicBool::new(false));
    let state = AppState {
        cache,
        hub,
        store: store.clone(),
        stats,
        broker_ready: broker_ready.clone(),
    };
    Rig {
        router: build_router(state, "/stream"),
        store,
        broker_ready,
    }
}

fn seed_events(store: &TelemetryStore, count: i64) {
    for i in 0..count {
        let ts = T0 + Duration::minutes(i);
        let rec = TelemetryRecord {
            vehicle_id: "veh-1".to_string(),
            position: Position::new(48.0 + i as f64 * 0.001, 2.0),
            timestamp: ts,
            fuel_level: 80.0 - i as f64,
            engine_status: EngineStatus::Running,
        };
        store.record(&rec, 25.0, ts).unwrap();
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn healthz_is_always_ok() {
    let rig = rig();
    let (status, body) = get(&rig.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn readyz_follows_broker_connectivity() {
    let rig = rig();
    let (status, body) = get(&rig.router, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "not_ready");

    rig.broker_ready.store(true, Ordering::Release);
    let (status, body) = get(&rig.router, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn stats_fields_are_present_and_non_negative() {
    let rig = rig();
    let (status, body) = get(&rig.router, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    for field in [
        "totalMessages",
        "invalidMessages",
        "vehiclesTracked",
        "connectedClients",
        "windowSeconds",
    ] {
        let value = body[field].as_u64();
        assert!(value.is_some(), "missing or negative `{field}`: {body}");
    }
    assert!(body["messageRatePerSecond"].as_f64().unwrap() >= 0.0);
    assert_eq!(body["windowSeconds"], 60);
}

#[tokio::test]
async fn non_get_methods_are_rejected() {
    let rig = rig();
    for path in ["/healthz", "/stats", "/telemetry/history"] {
        let response = rig
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED,
            "POST {path}"
        );
    }
}

#[tokio::test]
async fn history_pages_through_events() {
    let rig = rig();
    seed_events(&rig.store, 5);

    let (status, body) = get(&rig.router, "/telemetry/history?vehicleId=veh-1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["vehicleId"], "veh-1");
    assert_eq!(events[0]["recordedAt"], "2024-01-01T00:00:00Z");
    let token = body["nextPageToken"].as_str().unwrap().to_string();

    let (status, body) = get(
        &rig.router,
        &format!("/telemetry/history?vehicleId=veh-1&limit=10&pageToken={token}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rest = body["events"].as_array().unwrap();
    assert_eq!(rest.len(), 3);
    assert!(body.get("nextPageToken").is_none());
}

#[tokio::test]
async fn history_supports_comma_separated_vehicle_ids() {
    let rig = rig();
    seed_events(&rig.store, 2);
    let (status, body) = get(
        &rig.router,
        "/telemetry/history?vehicleId=veh-1,veh-2&limit=10",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn inverted_range_is_a_bad_request() {
    let rig = rig();
    let (status, body) = get(
        &rig.router,
        "/telemetry/summary?start=2024-01-02T00:00:00Z&end=2024-01-01T00:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");

    let (status, _) = get(
        &rig.router,
        "/telemetry/history?start=2024-01-02T00:00:00Z&end=2024-01-01T00:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unparseable_instants_are_a_bad_request() {
    let rig = rig();
    let (status, body) = get(&rig.router, "/telemetry/history?start=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
}

#[tokio::test]
async fn summary_returns_bucketed_metrics() {
    let rig = rig();
    seed_events(&rig.store, 3);
    rig.store
        .compute_rollups(T0 + Duration::hours(1), true)
        .unwrap();

    let (status, body) = get(&rig.router, "/telemetry/summary?windowSeconds=60").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["windowSeconds"], 60);
    let buckets = body["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 3);
    assert_eq!(buckets[0]["vehicleId"], "veh-1");
    assert_eq!(buckets[0]["sampleCount"], 1);
    assert_eq!(buckets[0]["bucketStart"], "2024-01-01T00:00:00Z");
    assert_eq!(buckets[0]["bucketEnd"], "2024-01-01T00:01:00Z");
}

#[tokio::test]
async fn summary_honours_aggregate_selection() {
    let rig = rig();
    seed_events(&rig.store, 1);
    rig.store
        .compute_rollups(T0 + Duration::hours(1), true)
        .unwrap();

    let (status, body) = get(
        &rig.router,
        "/telemetry/summary?windowSeconds=60&aggregate=maxSpeed&aggregate=sampleCount",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let bucket = &body["buckets"][0];
    assert_eq!(bucket["maxSpeed"], 25.0);
    assert_eq!(bucket["sampleCount"], 1);
    assert!(bucket.get("avgSpeed").is_none());

    let (status, body) = get(&rig.router, "/telemetry/summary?aggregate=median").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
}
