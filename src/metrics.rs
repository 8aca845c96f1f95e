//! Process-wide operational counters shared by ingest and the query surfaces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::ratewindow::RateWindow;

/// Counters and the arrival-rate window, owned once per process.
///
/// Every ingest outcome increments exactly one of the two counters; the
/// query surfaces only ever read. Atomics keep the counters coherent under
/// parallel execution without a lock; only the rate window needs one.
#[derive(Debug)]
pub struct ServiceStats {
    total_messages: AtomicU64,
    invalid_messages: AtomicU64,
    rate: Mutex<RateWindow>,
}

impl ServiceStats {
    /// Creates counters with a message-rate window of `window_ms`.
    pub fn new(window_ms: u64) -> Self {
        Self {
            total_messages: AtomicU64::new(0),
            invalid_messages: AtomicU64::new(0),
            rate: Mutex::new(RateWindow::new(window_ms)),
        }
    }

    /// Counts one accepted message and its arrival instant.
    pub fn record_valid(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.rate.lock().record(Instant::now());
    }

    /// Counts one rejected message.
    pub fn record_invalid(&self) {
        self.invalid_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Accepted message count since startup.
    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    /// Rejected message count since startup.
    pub fn invalid_messages(&self) -> u64 {
        self.invalid_messages.load(Ordering::Relaxed)
    }

    /// Accepted messages per second over the trailing window.
    pub fn message_rate(&self) -> f64 {
        self.rate.lock().rate(Instant::now())
    }

    /// The rate window length in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.rate.lock().window_seconds()
    }
}

/// Snapshot of the operational counters served by `/stats` and the RPC
/// snapshot call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Accepted messages since startup.
    pub total_messages: u64,
    /// Rejected messages since startup.
    pub invalid_messages: u64,
    /// Vehicles currently held in the cache.
    pub vehicles_tracked: usize,
    /// Live fan-out subscribers currently attached.
    pub connected_clients: usize,
    /// Accepted messages per second over the trailing window.
    pub message_rate_per_second: f64,
    /// Length of the rate window in seconds.
    pub window_seconds: u64,
}
