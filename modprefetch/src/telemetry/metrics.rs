//! Lock-free engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the cache, loader, scheduler and monitor.
///
/// All updates are `Relaxed`; readers take a [`MetricsSnapshot`].
#[derive(Debug, Default)]
pub struct PreloadMetrics {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    joined_in_flight: AtomicU64,
    loads_started: AtomicU64,
    loads_succeeded: AtomicU64,
    loads_failed: AtomicU64,
    retries: AtomicU64,
    slow_loads: AtomicU64,
    skipped: AtomicU64,
    evictions: AtomicU64,
}

impl PreloadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A request attached to an already running load.
    pub fn joined_in_flight(&self) {
        self.joined_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_started(&self) {
        self.loads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_succeeded(&self) {
        self.loads_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_failed(&self) {
        self.loads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn slow_load(&self) {
        self.slow_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evicted(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            joined_in_flight: self.joined_in_flight.load(Ordering::Relaxed),
            loads_started: self.loads_started.load(Ordering::Relaxed),
            loads_succeeded: self.loads_succeeded.load(Ordering::Relaxed),
            loads_failed: self.loads_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            slow_loads: self.slow_loads.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`PreloadMetrics`] at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub joined_in_flight: u64,
    pub loads_started: u64,
    pub loads_succeeded: u64,
    pub loads_failed: u64,
    pub retries: u64,
    pub slow_loads: u64,
    pub skipped: u64,
    pub evictions: u64,
}

impl MetricsSnapshot {
    /// Fraction of requests answered from a `Loaded` entry.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.requests as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = PreloadMetrics::new();
        metrics.request();
        metrics.request();
        metrics.cache_hit();
        metrics.load_started();
        metrics.evicted(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.loads_started, 1);
        assert_eq!(snap.evictions, 3);
        assert_eq!(snap.cache_hit_rate(), 0.5);
    }

    #[test]
    fn test_hit_rate_without_requests() {
        assert_eq!(MetricsSnapshot::default().cache_hit_rate(), 0.0);
    }
}
