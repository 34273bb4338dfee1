//! Heap-pressure driven cache eviction.
//!
//! On a fixed interval the monitor samples heap usage through the
//! [`CapabilityProbe`]. When the usage ratio exceeds the threshold it evicts
//! a fraction of the `Loaded` entries that have not been requested within
//! the session window. Entries in `Loading` are never touched.
//!
//! # Example
//!
//! ```ignore
//! let monitor = Arc::new(MemoryPressureMonitor::new(config, probe, cache, observations));
//! let shutdown = CancellationToken::new();
//! tokio::spawn(Arc::clone(&monitor).run(shutdown.clone()));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ModuleCache;
use crate::environment::CapabilityProbe;
use crate::registry::LoadableKey;
use crate::telemetry::{ObservationKind, ObservationLog};

// =============================================================================
// Memory Monitor Constants
// =============================================================================

/// Default sampling interval (30 seconds).
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Default heap usage ratio above which eviction runs.
pub const DEFAULT_PRESSURE_THRESHOLD: f64 = 0.8;

/// Default fraction of idle entries evicted per check.
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.3;

/// Default session window (5 minutes). Entries requested within it are kept.
pub const DEFAULT_SESSION_WINDOW_SECS: u64 = 300;

/// Configuration for the memory pressure monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMonitorConfig {
    /// How often heap usage is sampled.
    pub interval: Duration,
    /// Usage ratio (0.0-1.0) that triggers eviction when exceeded.
    pub threshold: f64,
    /// Fraction of idle `Loaded` entries evicted when triggered.
    pub eviction_fraction: f64,
    /// Entries requested within this window are not idle.
    pub session_window: Duration,
}

impl Default for MemoryMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
            threshold: DEFAULT_PRESSURE_THRESHOLD,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
            session_window: Duration::from_secs(DEFAULT_SESSION_WINDOW_SECS),
        }
    }
}

impl MemoryMonitorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_session_window(mut self, window: Duration) -> Self {
        self.session_window = window;
        self
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq)]
pub enum PressureCheck {
    /// The probe exposes no heap usage.
    Unavailable,
    /// Usage at or below the threshold.
    Normal { ratio: f64 },
    /// Usage above the threshold; `evicted` may be empty if nothing was idle.
    Evicted {
        ratio: f64,
        evicted: Vec<LoadableKey>,
    },
}

impl PressureCheck {
    pub fn evicted(&self) -> &[LoadableKey] {
        match self {
            Self::Evicted { evicted, .. } => evicted,
            _ => &[],
        }
    }
}

/// Periodic heap sampler that evicts idle cache entries under pressure.
pub struct MemoryPressureMonitor {
    config: MemoryMonitorConfig,
    probe: Arc<dyn CapabilityProbe>,
    cache: Arc<ModuleCache>,
    observations: Arc<ObservationLog>,
}

impl std::fmt::Debug for MemoryPressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPressureMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryPressureMonitor {
    pub fn new(
        config: MemoryMonitorConfig,
        probe: Arc<dyn CapabilityProbe>,
        cache: Arc<ModuleCache>,
        observations: Arc<ObservationLog>,
    ) -> Self {
        Self {
            config,
            probe,
            cache,
            observations,
        }
    }

    pub fn config(&self) -> &MemoryMonitorConfig {
        &self.config
    }

    /// Sample heap usage once and evict if over the threshold.
    pub fn check_once(&self) -> PressureCheck {
        let Some(usage) = self.probe.heap_usage() else {
            return PressureCheck::Unavailable;
        };
        let ratio = usage.ratio();
        if ratio <= self.config.threshold {
            debug!(ratio, threshold = self.config.threshold, "Heap usage normal");
            return PressureCheck::Normal { ratio };
        }

        let now = Instant::now();
        let cutoff = now.checked_sub(self.config.session_window).unwrap_or(now);
        let evicted = self.cache.evict_idle(self.config.eviction_fraction, cutoff);

        if evicted.is_empty() {
            debug!(ratio, "Heap pressure but no idle entries to evict");
        } else {
            warn!(
                ratio,
                threshold = self.config.threshold,
                evicted = evicted.len(),
                "Heap pressure, evicted idle modules"
            );
        }
        for key in &evicted {
            self.observations.record(ObservationKind::Evicted {
                key: key.clone(),
                heap_ratio: ratio,
            });
        }
        PressureCheck::Evicted { ratio, evicted }
    }

    /// Check on every interval tick until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first sample
        // happens one interval after start.
        ticker.tick().await;

        info!(
            interval_secs = self.config.interval.as_secs(),
            threshold = self.config.threshold,
            "Memory pressure monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Memory pressure monitor shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    self.check_once();
                }
            }
        }
    }
}
