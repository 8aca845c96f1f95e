//! Sliding-window arrival counter for the messages-per-second gauge.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Counts arrivals over a fixed trailing window.
///
/// Arrival instants are kept in order; both [`record`](Self::record) and
/// [`rate`](Self::rate) trim entries older than the window first, so the
/// buffer never grows beyond one window of traffic.
#[derive(Debug)]
pub struct RateWindow {
    window: Duration,
    arrivals: VecDeque<Instant>,
}

impl RateWindow {
    /// Creates a window spanning `window_ms` milliseconds.
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: Duration::from_millis(window_ms.max(1)),
            arrivals: VecDeque::new(),
        }
    }

    /// Records one arrival at `now`.
    pub fn record(&mut self, now: Instant) {
        self.trim(now);
        self.arrivals.push_back(now);
    }

    /// Arrivals per second over the window as of `now`.
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.trim(now);
        if self.arrivals.is_empty() {
            return 0.0;
        }
        self.arrivals.len() as f64 / self.window.as_secs_f64()
    }

    /// The configured window, in whole seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window.as_secs()
    }

    fn trim(&mut self, now: Instant) {
        let cutoff = now.checked_sub(self.window);
        let Some(cutoff) = cutoff else {
            return;
        };
        while self.arrivals.front().is_some_and(|&t| t < cutoff) {
            self.arrivals.pop_front();
        }
    }
}
