//! Bounded last-known-state cache keyed by vehicle id.
//!
//! Insertion order doubles as recency: a write promotes its key, and when
//! the cache is over capacity the least-recently-written entry is evicted.
//! Reads never promote. A periodic sweeper expires entries whose `last_seen`
//! has fallen behind the configured time-to-live and reports each removal
//! through a caller-supplied callback.

use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::model::{EnrichedVehicle, VehicleId};

/// Shared handle to the cache. Writers are the ingest pipeline and the
/// expiry sweep; everyone else takes read locks.
pub type SharedVehicleCache = Arc<RwLock<VehicleCache>>;

/// Callback invoked with each entry removed by the expiry sweep.
pub type ExpiryCallback = Arc<dyn Fn(&str, &EnrichedVehicle) + Send + Sync>;

/// Bounded insertion-ordered map from vehicle id to latest enriched state.
pub struct VehicleCache {
    entries: LruCache<VehicleId, EnrichedVehicle>,
}

impl VehicleCache {
    /// Creates a cache bounded to `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is nonzero");
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Looks up a vehicle without touching recency.
    pub fn get(&self, id: &str) -> Option<&EnrichedVehicle> {
        self.entries.peek(id)
    }

    /// Inserts or replaces an entry, promoting it to most-recent. Evicts and
    /// logs the least-recently-written entry when over capacity.
    pub fn set(&mut self, id: VehicleId, entry: EnrichedVehicle) {
        if let Some((victim, _)) = self.entries.push(id.clone(), entry) {
            if victim != id {
                debug!(vehicle_id = %victim, "cache capacity eviction");
            }
        }
    }

    /// Removes an entry if present.
    pub fn remove(&mut self, id: &str) -> Option<EnrichedVehicle> {
        self.entries.pop(id)
    }

    /// Number of cached vehicles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no vehicles are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all entries, oldest write first.
    pub fn snapshot(&self) -> Vec<EnrichedVehicle> {
        self.entries.iter().rev().map(|(_, v)| v.clone()).collect()
    }

    /// Snapshot of `(id, entry)` pairs, oldest write first.
    pub fn entries(&self) -> Vec<(VehicleId, EnrichedVehicle)> {
        self.entries
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Removes and returns every entry whose `last_seen` is strictly before
    /// `cutoff`, oldest write first.
    pub fn take_expired(&mut self, cutoff: OffsetDateTime) -> Vec<(VehicleId, EnrichedVehicle)> {
        let stale: Vec<VehicleId> = self
            .entries
            .iter()
            .rev()
            .filter(|(_, v)| v.last_seen < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.entries.pop(&id).map(|entry| (id, entry)))
            .collect()
    }
}

/// Handle to the periodic expiry sweep; dropping it does not stop the task.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Cancels the periodic sweep.
    pub fn stop(&self) {
        self.task.abort();
    }
}

/// Spawns the periodic expiry sweep for `cache`.
///
/// The sweep interval is the time-to-live clamped into [1s, 15s]. A zero
/// time-to-live disables expiry entirely and returns `None`. Each removed
/// entry is reported through `on_expire`; a panicking callback is logged and
/// does not stop the sweep.
pub fn spawn_sweeper(
    cache: SharedVehicleCache,
    ttl: Duration,
    on_expire: ExpiryCallback,
) -> Option<SweeperHandle> {
    if ttl.is_zero() {
        return None;
    }
    let interval = ttl.clamp(Duration::from_secs(1), Duration::from_secs(15));
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh entry is
        // never inspected before one full interval has elapsed.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cutoff = OffsetDateTime::now_utc() - ttl;
            let expired = cache.write().take_expired(cutoff);
            for (id, entry) in &expired {
                debug!(vehicle_id = %id, "cache ttl expiry");
                if catch_unwind(AssertUnwindSafe(|| on_expire(id, entry))).is_err() {
                    warn!(vehicle_id = %id, "expiry callback panicked");
                }
            }
        }
    });
    Some(SweeperHandle { task })
}
