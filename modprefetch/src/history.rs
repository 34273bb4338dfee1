//! Bounded navigation history.
//!
//! Holds the most recent visits in visit order. The oldest entry is dropped
//! once the tracker is full.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

use crate::registry::LoadableKey;

/// Default number of visits retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Configuration for the history tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Maximum number of visits retained.
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// One navigation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub key: LoadableKey,
    pub at: Instant,
}

impl Visit {
    pub fn new(key: impl Into<LoadableKey>, at: Instant) -> Self {
        Self {
            key: key.into(),
            at,
        }
    }
}

/// Time-ordered, bounded sequence of recent visits.
#[derive(Debug)]
pub struct NavigationHistoryTracker {
    visits: Mutex<VecDeque<Visit>>,
    capacity: usize,
}

impl Default for NavigationHistoryTracker {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl NavigationHistoryTracker {
    pub fn new(config: HistoryConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            visits: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a visit to `key` at the current instant.
    pub fn record(&self, key: &LoadableKey) {
        self.record_at(key, Instant::now());
    }

    /// Append a visit with an explicit timestamp.
    ///
    /// Callers are expected to pass non-decreasing timestamps; the tracker
    /// keeps insertion order either way.
    pub fn record_at(&self, key: &LoadableKey, at: Instant) {
        let mut visits = self.visits.lock();
        while visits.len() >= self.capacity {
            visits.pop_front();
        }
        visits.push_back(Visit {
            key: key.clone(),
            at,
        });
    }

    /// Copy of the history, oldest first.
    pub fn snapshot(&self) -> Vec<Visit> {
        self.visits.lock().iter().cloned().collect()
    }

    /// The most recent visit, if any.
    pub fn current(&self) -> Option<Visit> {
        self.visits.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.visits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.visits.lock().clear();
    }
}
