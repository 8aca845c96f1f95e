#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;

use fleetstream::cache::{spawn_sweeper, SharedVehicleCache, VehicleCache};
use fleetstream::config::WebSocketConfig;
use fleetstream::fanout::FanoutHub;
use fleetstream::model::{EngineStatus, EnrichedVehicle, Position, TelemetryRecord};

fn vehicle(id: &str, last_seen: OffsetDateTime) -> EnrichedVehicle {
    EnrichedVehicle {
        record: TelemetryRecord {
            vehicle_id: id.to_string(),
            position: Position::new(48.8566, 2.3522),
            timestamp: last_seen,
            fuel_level: 60.0,
            engine_status: EngineStatus::Idle,
        },
        speed_kmh: 0.0,
        last_seen,
    }
}

#[test]
fn capacity_bound_holds_across_any_write_sequence() {
    let mut cache = VehicleCache::new(10);
    let now = OffsetDateTime::now_utc();
    for i in 0..100 {
        cache.set(format!("veh-{}", i % 17), vehicle("x", now));
        assert!(cache.len() <= 10, "bound violated after write {i}");
    }
}

#[test]
fn last_write_is_most_recent_in_iteration_order() {
    let mut cache = VehicleCache::new(5);
    let now = OffsetDateTime::now_utc();
    for id in ["a", "b", "c", "b", "a"] {
        cache.set(id.to_string(), vehicle(id, now));
        let ids: Vec<_> = cache.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(ids.last().map(String::as_str), Some(id));
    }
}

/// One stale and one fresh entry: the sweep removes exactly the stale one,
/// fires the callback once, and subscribers see one `vehicle_remove`.
#[tokio::test(start_paused = true)]
async fn ttl_sweep_expires_stale_entries_and_notifies() {
    let cache: SharedVehicleCache = Arc::new(RwLock::new(VehicleCache::new(10)));
    let hub = Arc::new(FanoutHub::new(cache.clone(), &WebSocketConfig::default()));

    let now = OffsetDateTime::now_utc();
    cache
        .write()
        .set("stale".to_string(), vehicle("stale", now - Duration::from_secs(5)));
    cache.write().set("fresh".to_string(), vehicle("fresh", now));

    let mut sub = hub.attach();
    // Drain the two snapshot frames.
    assert!(sub.try_recv().is_some());
    assert!(sub.try_recv().is_some());

    let removed = Arc::new(Mutex::new(Vec::new()));
    let sweeper = {
        let removed = removed.clone();
        let hub = hub.clone();
        spawn_sweeper(
            cache.clone(),
            Duration::from_secs(1),
            Arc::new(move |id: &str, _entry: &EnrichedVehicle| {
                removed.lock().push(id.to_string());
                hub.broadcast_remove(id);
            }),
        )
        .expect("ttl enabled")
    };

    // Paused time: advancing the clock fires the interval immediately.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    tokio::task::yield_now().await;
    // Give the sweep task a chance to run to completion.
    for _ in 0..10 {
        tokio::task::yield_now().await;
        if !removed.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(removed.lock().clone(), vec!["stale".to_string()]);
    assert!(cache.read().get("stale").is_none());
    assert!(cache.read().get("fresh").is_some());

    let frame = match sub.try_recv().expect("remove frame") {
        axum::extract::ws::Message::Text(text) => {
            serde_json::from_str::<serde_json::Value>(&text).unwrap()
        }
        other => panic!("expected text frame, got {other:?}"),
    };
    assert_eq!(frame["type"], "vehicle_remove");
    assert_eq!(frame["vehicleId"], "stale");
    assert!(sub.try_recv().is_none(), "exactly one removal expected");

    sweeper.stop();
}

#[tokio::test]
async fn zero_ttl_disables_the_sweeper() {
    let cache: SharedVehicleCache = Arc::new(RwLock::new(VehicleCache::new(10)));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = calls.clone();
    let sweeper = spawn_sweeper(
        cache,
        Duration::ZERO,
        Arc::new(move |_: &str, _: &EnrichedVehicle| {
            calls_cb.fetch_add(1, Ordering::Relaxed);
        }),
    );
    assert!(sweeper.is_none());
    assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn panicking_callback_does_not_stop_the_sweep() {
    let cache: SharedVehicleCache = Arc::new(RwLock::new(VehicleCache::new(10)));
    let now = OffsetDateTime::now_utc();
    cache
        .write()
        .set("a".to_string(), vehicle("a", now - Duration::from_secs(10)));
    cache
        .write()
        .set("b".to_string(), vehicle("b", now - Duration::from_secs(10)));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sweeper = {
        let seen = seen.clone();
        spawn_sweeper(
            cache.clone(),
            Duration::from_secs(1),
            Arc::new(move |id: &str, _: &EnrichedVehicle| {
                seen.lock().push(id.to_string());
                panic!("callback failure");
            }),
        )
        .expect("ttl enabled")
    };

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
        if seen.lock().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Both entries were swept despite the first callback panicking.
    assert_eq!(seen.lock().len(), 2);
    assert!(cache.read().is_empty());
    sweeper.stop();
}
