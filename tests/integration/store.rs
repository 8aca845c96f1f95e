#![allow(missing_docs)]

use fleetstream::geo;
use fleetstream::model::{EngineStatus, Position, TelemetryRecord};
use fleetstream::store::{
    AggregateMetric, AggregateQuery, HistoryQuery, StoreOptions, TelemetryStore,
};
use proptest::prelude::*;
use tempfile::tempdir;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

const T0: OffsetDateTime = datetime!(2024-01-01 00:00:00 UTC);

fn store_with_windows(windows: &[u32]) -> TelemetryStore {
    let opts = StoreOptions {
        windows: windows.to_vec(),
        base_window: windows[0],
        catch_up_windows: 1,
    };
    TelemetryStore::open_in_memory(opts).expect("open in-memory store")
}

fn record(id: &str, lat: f64, lng: f64, ts: OffsetDateTime, fuel: f64) -> TelemetryRecord {
    TelemetryRecord {
        vehicle_id: id.to_string(),
        position: Position::new(lat, lng),
        timestamp: ts,
        fuel_level: fuel,
        engine_status: EngineStatus::Running,
    }
}

#[test]
fn reopening_a_database_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fleet.db");
    let opts = StoreOptions::default();
    {
        let store = TelemetryStore::open(&path, opts.clone()).unwrap();
        store
            .record(&record("veh-1", 48.8566, 2.3522, T0, 82.5), 0.0, T0)
            .unwrap();
    }
    let store = TelemetryStore::open(&path, opts).unwrap();
    let report = store.report().unwrap();
    assert_eq!(report.vehicles, 1);
    assert_eq!(report.events, 1);
}

#[test]
fn first_event_has_zero_distance() {
    let store = store_with_windows(&[300]);
    let outcome = store
        .record(&record("veh-1", 48.8566, 2.3522, T0, 82.5), 0.0, T0)
        .unwrap();
    assert_eq!(outcome.distance_km, 0.0);
    assert_eq!(outcome.cumulative_km, 0.0);
    assert_eq!(store.report().unwrap().events, 1);
}

#[test]
fn distance_accumulates_from_previous_position() {
    let store = store_with_windows(&[300]);
    let a = Position::new(48.8566, 2.3522);
    let b = Position::new(48.8666, 2.3622);
    let expected = geo::haversine_km(a, b);

    store
        .record(&record("veh-1", a.lat, a.lng, T0, 82.5), 0.0, T0)
        .unwrap();
    let outcome = store
        .record(
            &record("veh-1", b.lat, b.lng, T0 + Duration::minutes(5), 54.4),
            17.0,
            T0 + Duration::minutes(5),
        )
        .unwrap();

    assert!((outcome.distance_km - expected).abs() < 1e-9);
    assert!((outcome.cumulative_km - expected).abs() < 1e-9);
    assert_eq!(store.cumulative_km("veh-1").unwrap(), Some(outcome.cumulative_km));
}

#[test]
fn cumulative_distance_is_monotonic() {
    let store = store_with_windows(&[300]);
    let mut previous = 0.0;
    for i in 0..20 {
        let lat = 48.0 + f64::from(i) * 0.01;
        let ts = T0 + Duration::minutes(i.into());
        let outcome = store
            .record(&record("veh-1", lat, 2.35, ts, 80.0), 10.0, ts)
            .unwrap();
        assert!(
            outcome.cumulative_km >= previous,
            "cumulative went backwards at step {i}"
        );
        previous = outcome.cumulative_km;
    }
}

#[test]
fn vehicles_accumulate_independently() {
    let store = store_with_windows(&[300]);
    store
        .record(&record("veh-1", 48.0, 2.0, T0, 80.0), 0.0, T0)
        .unwrap();
    store
        .record(&record("veh-2", 50.0, 3.0, T0, 70.0), 0.0, T0)
        .unwrap();
    let out = store
        .record(
            &record("veh-1", 48.1, 2.0, T0 + Duration::minutes(1), 79.0),
            10.0,
            T0 + Duration::minutes(1),
        )
        .unwrap();
    assert!(out.distance_km > 0.0);
    assert_eq!(store.cumulative_km("veh-2").unwrap(), Some(0.0));
}

#[test]
fn history_pages_concatenate_to_the_full_result() {
    let store = store_with_windows(&[300]);
    for i in 0..10 {
        let ts = T0 + Duration::minutes(i);
        store
            .record(&record("veh-1", 48.0 + i as f64 * 0.001, 2.0, ts, 80.0), 5.0, ts)
            .unwrap();
    }

    let full = store
        .history(&HistoryQuery {
            limit: 1000,
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(full.events.len(), 10);
    assert!(full.next_page_token.is_none());

    let mut paged = Vec::new();
    let mut token = None;
    loop {
        let page = store
            .history(&HistoryQuery {
                limit: 3,
                page_token: token,
                ..HistoryQuery::default()
            })
            .unwrap();
        let final_page = page.next_page_token.is_none();
        paged.extend(page.events);
        if final_page {
            break;
        }
        token = page.next_page_token;
    }
    assert_eq!(paged, full.events);
}

#[test]
fn history_filters_by_vehicle_and_range() {
    let store = store_with_windows(&[300]);
    for (id, minute) in [("veh-1", 0), ("veh-2", 1), ("veh-1", 2), ("veh-1", 10)] {
        let ts = T0 + Duration::minutes(minute);
        store
            .record(&record(id, 48.0, 2.0, ts, 80.0), 0.0, ts)
            .unwrap();
    }
    let page = store
        .history(&HistoryQuery {
            vehicle_ids: vec!["veh-1".to_string()],
            start: Some(T0),
            end: Some(T0 + Duration::minutes(5)),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(page.events.len(), 2);
    assert!(page.events.iter().all(|e| e.vehicle_id == "veh-1"));
    // Ascending order.
    assert!(page.events[0].event_id < page.events[1].event_id);
}

#[test]
fn inverted_range_is_invalid_argument() {
    let store = store_with_windows(&[300]);
    let err = store
        .history(&HistoryQuery {
            start: Some(T0 + Duration::hours(1)),
            end: Some(T0),
            ..HistoryQuery::default()
        })
        .unwrap_err();
    assert!(err.is_invalid_argument());

    let err = store
        .aggregates(&AggregateQuery {
            vehicle_ids: Vec::new(),
            start: Some(T0),
            end: Some(T0),
            window_seconds: 300,
            metrics: Vec::new(),
        })
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

/// Three events across ten minutes, rolled up twice with force, must agree
/// with direct aggregation and with each other.
#[test]
fn rollup_recomputation_is_idempotent_and_correct() {
    let store = store_with_windows(&[300]);
    let speeds = [10.0, 30.0, 20.0];
    let fuels = [80.0, 70.0, 75.0];
    let mut distances = vec![0.0];
    let mut prev = Position::new(48.0, 2.0);
    for (i, (&speed, &fuel)) in speeds.iter().zip(&fuels).enumerate() {
        let pos = Position::new(48.0 + i as f64 * 0.01, 2.0);
        let ts = T0 + Duration::minutes(5 * i as i64);
        store
            .record(&record("veh-1", pos.lat, pos.lng, ts, fuel), speed, ts)
            .unwrap();
        if i > 0 {
            distances.push(geo::haversine_km(prev, pos));
        }
        prev = pos;
    }

    let now = T0 + Duration::hours(1);
    let first = store.compute_rollups(now, true).unwrap();
    assert_eq!(first.windows.len(), 1);
    let query = AggregateQuery {
        vehicle_ids: Vec::new(),
        start: None,
        end: None,
        window_seconds: 300,
        metrics: Vec::new(),
    };
    let rows_first = store.aggregates(&query).unwrap();
    store.compute_rollups(now, true).unwrap();
    let rows_second = store.aggregates(&query).unwrap();
    assert_eq!(rows_first.buckets, rows_second.buckets);

    // Buckets: events at 00:00, 00:05, 00:10 → three 300 s buckets.
    assert_eq!(rows_first.buckets.len(), 3);
    let b0 = &rows_first.buckets[0];
    assert_eq!(b0.bucket_start, T0.unix_timestamp());
    assert_eq!(b0.bucket_end, T0.unix_timestamp() + 300);
    assert_eq!(b0.sample_count, Some(1));
    assert_eq!(b0.avg_speed, Some(10.0));
    assert_eq!(b0.max_speed, Some(10.0));
    assert_eq!(b0.min_fuel, Some(80.0));

    let b1 = &rows_first.buckets[1];
    assert_eq!(b1.avg_speed, Some(30.0));
    assert!((b1.total_distance.unwrap() - distances[1]).abs() < 1e-9);
}

#[test]
fn incremental_rollup_picks_up_new_buckets() {
    let store = store_with_windows(&[60]);
    store
        .record(&record("veh-1", 48.0, 2.0, T0, 80.0), 10.0, T0)
        .unwrap();
    store
        .compute_rollups(T0 + Duration::minutes(2), false)
        .unwrap();

    let later = T0 + Duration::minutes(5);
    store
        .record(&record("veh-1", 48.1, 2.0, later, 78.0), 20.0, later)
        .unwrap();
    store
        .compute_rollups(T0 + Duration::minutes(10), false)
        .unwrap();

    let rows = store
        .aggregates(&AggregateQuery {
            vehicle_ids: Vec::new(),
            start: None,
            end: None,
            window_seconds: 60,
            metrics: Vec::new(),
        })
        .unwrap();
    assert_eq!(rows.buckets.len(), 2);
}

#[test]
fn unaligned_window_regroups_the_smallest_divisor() {
    let store = store_with_windows(&[60, 300]);
    // Two events in consecutive 60 s buckets with different speeds and
    // sample counts so the weighted average is distinguishable.
    for (minute, speed) in [(0, 10.0), (0, 30.0), (1, 60.0)] {
        let ts = T0 + Duration::minutes(minute) + Duration::seconds(1);
        store
            .record(&record("veh-1", 48.0, 2.0, ts, 80.0), speed, ts)
            .unwrap();
    }
    store
        .compute_rollups(T0 + Duration::minutes(10), true)
        .unwrap();

    // 120 s is not materialised but divisible by 60 s.
    let rows = store
        .aggregates(&AggregateQuery {
            vehicle_ids: Vec::new(),
            start: None,
            end: None,
            window_seconds: 120,
            metrics: Vec::new(),
        })
        .unwrap();
    assert_eq!(rows.window_seconds, 120);
    assert_eq!(rows.buckets.len(), 1);
    let bucket = &rows.buckets[0];
    assert_eq!(bucket.sample_count, Some(3));
    // Weighted by sample count: (10 + 30 + 60) / 3.
    assert!((bucket.avg_speed.unwrap() - 100.0 / 3.0).abs() < 1e-9);
    assert_eq!(bucket.max_speed, Some(60.0));
}

#[test]
fn indivisible_window_falls_back_to_the_base_window() {
    let store = store_with_windows(&[60, 300]);
    store
        .record(&record("veh-1", 48.0, 2.0, T0, 80.0), 10.0, T0)
        .unwrap();
    store
        .compute_rollups(T0 + Duration::minutes(10), true)
        .unwrap();

    let rows = store
        .aggregates(&AggregateQuery {
            vehicle_ids: Vec::new(),
            start: None,
            end: None,
            window_seconds: 90,
            metrics: Vec::new(),
        })
        .unwrap();
    assert_eq!(rows.window_seconds, 60);
    assert!(!rows.buckets.is_empty());
}

#[test]
fn aggregate_selection_limits_the_reported_metrics() {
    let store = store_with_windows(&[60]);
    store
        .record(&record("veh-1", 48.0, 2.0, T0, 80.0), 10.0, T0)
        .unwrap();
    store
        .compute_rollups(T0 + Duration::minutes(2), true)
        .unwrap();

    let rows = store
        .aggregates(&AggregateQuery {
            vehicle_ids: Vec::new(),
            start: None,
            end: None,
            window_seconds: 60,
            metrics: vec![AggregateMetric::MaxSpeed, AggregateMetric::SampleCount],
        })
        .unwrap();
    let bucket = &rows.buckets[0];
    assert_eq!(bucket.max_speed, Some(10.0));
    assert_eq!(bucket.sample_count, Some(1));
    assert!(bucket.avg_speed.is_none());
    assert!(bucket.min_fuel.is_none());
    assert!(bucket.total_distance.is_none());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Recomputing rollups over any generated event set yields the same rows.
    #[test]
    fn rollups_are_idempotent_for_generated_events(
        samples in proptest::collection::vec(
            (0i64..3600, 0.0f64..120.0, 0.0f64..100.0),
            1..40,
        )
    ) {
        let store = store_with_windows(&[300]);
        for (offset, speed, fuel) in &samples {
            let ts = T0 + Duration::seconds(*offset);
            store
                .record(&record("veh-1", 48.0, 2.0, ts, *fuel), *speed, ts)
                .unwrap();
        }
        let now = T0 + Duration::hours(2);
        store.compute_rollups(now, true).unwrap();
        let query = AggregateQuery {
            vehicle_ids: Vec::new(),
            start: None,
            end: None,
            window_seconds: 300,
            metrics: Vec::new(),
        };
        let first = store.aggregates(&query).unwrap();
        store.compute_rollups(now, true).unwrap();
        let second = store.aggregates(&query).unwrap();
        prop_assert_eq!(&first.buckets, &second.buckets);

        let total: u64 = first.buckets.iter().filter_map(|b| b.sample_count).sum();
        prop_assert_eq!(total as usize, samples.len());
    }
}
