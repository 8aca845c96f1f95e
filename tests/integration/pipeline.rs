#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use fleetstream::cache::{SharedVehicleCache, VehicleCache};
use fleetstream::config::WebSocketConfig;
use fleetstream::fanout::FanoutHub;
use fleetstream::geo;
use fleetstream::metrics::ServiceStats;
use fleetstream::model::Position;
use fleetstream::pipeline::IngestPipeline;
use fleetstream::store::{HistoryQuery, StoreOptions, TelemetryStore};

struct Rig {
    cache: SharedVehicleCache,
    hub: Arc<FanoutHub>,
    store: Arc<TelemetryStore>,
    stats: Arc<ServiceStats>,
    pipeline: IngestPipeline,
}

fn rig_with_capacity(capacity: usize) -> Rig {
    let cache: SharedVehicleCache = Arc::new(RwLock::new(VehicleCache::new(capacity)));
    let hub = Arc::new(FanoutHub::new(cache.clone(), &WebSocketConfig::default()));
    let store = Arc::new(TelemetryStore::open_in_memory(StoreOptions::default()).unwrap());
    let stats = Arc::new(ServiceStats::new(60_000));
    let pipeline = IngestPipeline::new(cache.clone(), store.clone(), hub.clone(), stats.clone());
    Rig {
        cache,
        hub,
        store,
        stats,
        pipeline,
    }
}

fn payload(id: &str, lat: f64, lng: f64, ts: &str, fuel: f64) -> Vec<u8> {
    json!({
        "vehicleId": id,
        "lat": lat,
        "lng": lng,
        "timestamp": ts,
        "fuelLevel": fuel,
        "engineStatus": "running"
    })
    .to_string()
    .into_bytes()
}

fn frame_json(msg: axum::extract::ws::Message) -> Value {
    match msg {
        axum::extract::ws::Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[test]
fn first_observation_flows_end_to_end() {
    let rig = rig_with_capacity(100);
    let mut sub = rig.hub.attach();

    rig.pipeline.handle_payload(&payload(
        "veh-1",
        48.8566,
        2.3522,
        "2024-01-01T00:00:00.000Z",
        82.5,
    ));

    assert_eq!(rig.cache.read().len(), 1);
    assert_eq!(rig.stats.total_messages(), 1);
    assert_eq!(rig.stats.invalid_messages(), 0);

    let report = rig.store.report().unwrap();
    assert_eq!(report.events, 1);
    let page = rig.store.history(&HistoryQuery::default()).unwrap();
    assert_eq!(page.events[0].distance_km, 0.0);
    assert_eq!(page.events[0].speed_kmh, 0.0);

    let frame = frame_json(sub.try_recv().expect("one broadcast frame"));
    assert_eq!(frame["type"], "vehicle_update");
    assert_eq!(frame["vehicleId"], "veh-1");
    assert_eq!(frame["telemetry"]["speed"], 0.0);
    assert_eq!(frame["position"]["lat"], 48.8566);
    assert_eq!(frame["position"]["lng"], 2.3522);
    assert!(sub.try_recv().is_none());
}

#[test]
fn second_observation_derives_speed_and_distance() {
    let rig = rig_with_capacity(100);
    rig.pipeline.handle_payload(&payload(
        "veh-1",
        48.8566,
        2.3522,
        "2024-01-01T00:00:00.000Z",
        82.5,
    ));

    let mut sub = rig.hub.attach();
    // Drain the snapshot frame so only the broadcast remains.
    let _ = sub.try_recv().expect("snapshot frame");

    rig.pipeline.handle_payload(&payload(
        "veh-1",
        48.8666,
        2.3622,
        "2024-01-01T00:05:00.000Z",
        54.4,
    ));

    let distance = geo::haversine_km(Position::new(48.8566, 2.3522), Position::new(48.8666, 2.3622));
    let expected_speed = distance / (5.0 / 60.0);

    let frame = frame_json(sub.try_recv().expect("broadcast frame"));
    let speed = frame["telemetry"]["speed"].as_f64().unwrap();
    assert!(
        (speed - expected_speed).abs() < 0.5,
        "speed {speed} vs expected {expected_speed}"
    );

    let page = rig.store.history(&HistoryQuery::default()).unwrap();
    assert_eq!(page.events.len(), 2);
    let second = &page.events[1];
    assert!((second.distance_km - distance).abs() < 1e-9);
    assert_eq!(
        rig.store.cumulative_km("veh-1").unwrap(),
        Some(second.distance_km)
    );
}

#[test]
fn undecodable_payload_counts_invalid_and_stays_silent() {
    let rig = rig_with_capacity(100);
    let mut sub = rig.hub.attach();

    rig.pipeline.handle_payload(b"not-json");

    assert_eq!(rig.stats.invalid_messages(), 1);
    assert_eq!(rig.stats.total_messages(), 0);
    assert_eq!(rig.cache.read().len(), 0);
    assert_eq!(rig.store.report().unwrap().events, 0);
    assert!(sub.try_recv().is_none());
}

#[test]
fn schema_violations_count_invalid() {
    let rig = rig_with_capacity(100);
    let bad = [
        json!({"vehicleId": "", "lat": 0, "lng": 0, "timestamp": "2024-01-01T00:00:00Z", "fuelLevel": 1, "engineStatus": "off"}),
        json!({"vehicleId": "v", "lat": 91.0, "lng": 0, "timestamp": "2024-01-01T00:00:00Z", "fuelLevel": 1, "engineStatus": "off"}),
        json!({"vehicleId": "v", "lat": 0, "lng": 0, "timestamp": "whenever", "fuelLevel": 1, "engineStatus": "off"}),
        json!({"vehicleId": "v", "lat": 0, "lng": 0, "timestamp": "2024-01-01T00:00:00Z", "fuelLevel": 1, "engineStatus": "parked"}),
        json!([1, 2, 3]),
    ];
    for payload in &bad {
        rig.pipeline.handle_payload(payload.to_string().as_bytes());
    }
    assert_eq!(rig.stats.invalid_messages(), bad.len() as u64);
    assert_eq!(rig.stats.total_messages(), 0);
}

/// Every payload moves exactly one of the two counters.
#[test]
fn counter_totality_over_a_mixed_batch() {
    let rig = rig_with_capacity(100);
    for i in 0..50 {
        let before = rig.stats.total_messages() + rig.stats.invalid_messages();
        if i % 3 == 0 {
            rig.pipeline.handle_payload(b"garbage");
        } else {
            rig.pipeline.handle_payload(&payload(
                &format!("veh-{i}"),
                10.0,
                20.0,
                "2024-01-01T00:00:00Z",
                50.0,
            ));
        }
        let after = rig.stats.total_messages() + rig.stats.invalid_messages();
        assert_eq!(after, before + 1);
    }
}

#[test]
fn cache_capacity_evicts_the_oldest_vehicle() {
    let rig = rig_with_capacity(2);
    for id in ["veh-1", "veh-2", "veh-3"] {
        rig.pipeline
            .handle_payload(&payload(id, 10.0, 20.0, "2024-01-01T00:00:00Z", 50.0));
    }
    let cache = rig.cache.read();
    assert_eq!(cache.len(), 2);
    assert!(cache.get("veh-1").is_none());
    assert!(cache.get("veh-2").is_some());
    assert!(cache.get("veh-3").is_some());
}

#[test]
fn non_increasing_timestamps_reset_speed_to_zero() {
    let rig = rig_with_capacity(100);
    rig.pipeline.handle_payload(&payload(
        "veh-1",
        48.0,
        2.0,
        "2024-01-01T00:10:00Z",
        80.0,
    ));
    let mut sub = rig.hub.attach();
    let _ = sub.try_recv();

    // Same timestamp, different position.
    rig.pipeline.handle_payload(&payload(
        "veh-1",
        48.5,
        2.5,
        "2024-01-01T00:10:00Z",
        79.0,
    ));
    let frame = frame_json(sub.try_recv().unwrap());
    assert_eq!(frame["telemetry"]["speed"], 0.0);

    // Earlier timestamp.
    rig.pipeline.handle_payload(&payload(
        "veh-1",
        48.6,
        2.6,
        "2024-01-01T00:05:00Z",
        78.0,
    ));
    let frame = frame_json(sub.try_recv().unwrap());
    assert_eq!(frame["telemetry"]["speed"], 0.0);
}
