//! Side-channel log of best-effort outcomes.
//!
//! Speculative loads have no caller waiting on them, so their failures would
//! otherwise vanish. They land here instead, together with slow-load and
//! eviction notices, for diagnostics panels and tests to inspect.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::environment::OperatingMode;
use crate::error::SkipReason;
use crate::registry::LoadableKey;

/// Default number of observations retained.
pub const DEFAULT_OBSERVATION_CAPACITY: usize = 256;

/// What was observed.
#[derive(Clone, Debug, PartialEq)]
pub enum ObservationKind {
    /// A load took longer than the slow-load threshold.
    SlowLoad { key: LoadableKey, elapsed: Duration },
    /// A speculative load failed after exhausting retries.
    PrefetchFailed { key: LoadableKey, error: String },
    /// A scheduled request was not issued.
    PolicySkipped { key: LoadableKey, reason: SkipReason },
    /// The memory monitor reset an entry to `NotLoaded`.
    Evicted { key: LoadableKey, heap_ratio: f64 },
    /// The environment classification changed.
    ModeChanged {
        from: OperatingMode,
        to: OperatingMode,
    },
}

/// One timestamped observation.
#[derive(Clone, Debug)]
pub struct Observation {
    pub at: Instant,
    pub kind: ObservationKind,
}

/// Bounded ring buffer of observations; oldest entries are dropped first.
#[derive(Debug)]
pub struct ObservationLog {
    entries: Mutex<VecDeque<Observation>>,
    capacity: usize,
}

impl Default for ObservationLog {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVATION_CAPACITY)
    }
}

impl ObservationLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an observation. Never blocks on anything but the buffer lock.
    pub fn record(&self, kind: ObservationKind) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(Observation {
            at: Instant::now(),
            kind,
        });
    }

    /// Copy of all retained observations, oldest first.
    pub fn snapshot(&self) -> Vec<Observation> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Retained observations matching `pred`.
    pub fn filter(&self, pred: impl Fn(&ObservationKind) -> bool) -> Vec<ObservationKind> {
        self.entries
            .lock()
            .iter()
            .filter(|o| pred(&o.kind))
            .map(|o| o.kind.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
