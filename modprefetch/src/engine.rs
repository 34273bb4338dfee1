//! Process-wide engine context.
//!
//! [`PreloadEngine`] owns one instance of every component and wires them
//! together. Create it once at startup and share it; [`reset`](PreloadEngine::reset)
//! is the explicit teardown.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use modprefetch::{LoadError, LoadableRegistry, PreloadConfig, PreloadEngine, PreloadPolicy};
//! use modprefetch::environment::HostProbe;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = LoadableRegistry::builder()
//!     .register("home", || async { Ok::<_, LoadError>(Bytes::from_static(b"home")) }, PreloadPolicy::high())
//!     .build()?;
//! let engine = PreloadEngine::new(registry, PreloadConfig::default(), Arc::new(HostProbe::detect()))?;
//!
//! let shutdown = CancellationToken::new();
//! let handle = engine.start(shutdown.clone());
//!
//! let module = engine.ensure_loaded(&"home".into()).await?;
//! assert_eq!(&module.payload[..], b"home");
//!
//! shutdown.cancel();
//! handle.join().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{LoadState, ModuleCache};
use crate::config::PreloadConfig;
use crate::environment::{CapabilityProbe, EnvironmentSnapshot, OperatingMode};
use crate::error::{EngineError, Result};
use crate::history::NavigationHistoryTracker;
use crate::memory_monitor::MemoryPressureMonitor;
use crate::predict::PredictiveEngine;
use crate::registry::{LoadableKey, LoadableRegistry, ModuleRef};
use crate::retry::{LoadContext, RetryingLoader};
use crate::scheduler::PriorityScheduler;
use crate::strategy::{HostEvent, StrategyCoordinator};
use crate::telemetry::{MetricsSnapshot, ObservationLog, PreloadMetrics};

/// Capacity of the host event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Read-only introspection for a diagnostics panel.
#[derive(Debug, Clone, Serialize)]
pub struct PreloadStatus {
    pub cached_keys: Vec<LoadableKey>,
    pub in_flight_keys: Vec<LoadableKey>,
    pub failed_keys: Vec<LoadableKey>,
    pub cache_hit_rate: f64,
    pub mode: OperatingMode,
    pub environment: EnvironmentSnapshot,
    pub metrics: MetricsSnapshot,
}

/// Background tasks started by [`PreloadEngine::start`].
#[derive(Debug)]
pub struct EngineHandle {
    events: mpsc::Sender<HostEvent>,
    monitor: JoinHandle<()>,
    coordinator: JoinHandle<()>,
}

impl EngineHandle {
    /// Sender for host events.
    pub fn events(&self) -> mpsc::Sender<HostEvent> {
        self.events.clone()
    }

    /// Forward one event. Returns `false` if the coordinator has stopped.
    pub async fn send(&self, event: HostEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Wait for both background tasks to finish.
    pub async fn join(self) {
        let Self {
            events,
            monitor,
            coordinator,
        } = self;
        drop(events);
        if let Err(e) = monitor.await {
            warn!(error = %e, "Memory monitor task failed");
        }
        if let Err(e) = coordinator.await {
            warn!(error = %e, "Coordinator task failed");
        }
    }
}

/// The predictive loading engine.
pub struct PreloadEngine {
    config: PreloadConfig,
    probe: Arc<dyn CapabilityProbe>,
    metrics: Arc<PreloadMetrics>,
    observations: Arc<ObservationLog>,
    cache: Arc<ModuleCache>,
    scheduler: PriorityScheduler,
    history: Arc<NavigationHistoryTracker>,
    coordinator: Arc<StrategyCoordinator>,
    monitor: Arc<MemoryPressureMonitor>,
}

impl std::fmt::Debug for PreloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadEngine")
            .field("cache", &self.cache)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl PreloadEngine {
    /// Wire every component.
    ///
    /// # Errors
    ///
    /// A config value the background tasks cannot run with, or a strategy
    /// table that references a key missing from `registry`.
    pub fn new(
        registry: LoadableRegistry,
        config: PreloadConfig,
        probe: Arc<dyn CapabilityProbe>,
    ) -> std::result::Result<Self, EngineError> {
        config.validate()?;
        config.strategy.validate(&registry)?;

        let registry = Arc::new(registry);
        let metrics = Arc::new(PreloadMetrics::new());
        let observations = Arc::new(ObservationLog::new(config.telemetry.observation_capacity));

        let loader = Arc::new(RetryingLoader::new(
            config.retry.clone(),
            Arc::clone(&probe),
            Arc::clone(&metrics),
            Arc::clone(&observations),
        ));
        let cache = Arc::new(ModuleCache::new(
            Arc::clone(&registry),
            loader,
            Arc::clone(&metrics),
        ));
        let scheduler = PriorityScheduler::new(
            Arc::clone(&cache),
            Arc::clone(&probe),
            Arc::clone(&metrics),
            Arc::clone(&observations),
        );
        let history = Arc::new(NavigationHistoryTracker::new(config.history.clone()));
        let coordinator = Arc::new(StrategyCoordinator::new(
            config.strategy.clone(),
            scheduler.clone(),
            Arc::clone(&history),
            PredictiveEngine::new(config.predictor.clone()),
            Arc::clone(&probe),
            Arc::clone(&observations),
        ));
        let monitor = Arc::new(MemoryPressureMonitor::new(
            config.memory.clone(),
            Arc::clone(&probe),
            Arc::clone(&cache),
            Arc::clone(&observations),
        ));

        info!(
            modules = registry.len(),
            mode = %coordinator.mode(),
            "Preload engine created"
        );

        Ok(Self {
            config,
            probe,
            metrics,
            observations,
            cache,
            scheduler,
            history,
            coordinator,
            monitor,
        })
    }

    /// Load `key` for immediate use.
    ///
    /// Always goes through the cache, whatever has been prefetched; never
    /// gated by policy.
    ///
    /// # Errors
    ///
    /// `UnknownKey`, or `LoadFailed` once retries are exhausted.
    pub async fn ensure_loaded(&self, key: &LoadableKey) -> Result<ModuleRef> {
        self.cache.request(key, LoadContext::on_demand()).await
    }

    /// Synchronous read of an already loaded module.
    pub fn get(&self, key: &LoadableKey) -> Option<ModuleRef> {
        self.cache.peek(key)
    }

    pub fn state(&self, key: &LoadableKey) -> LoadState {
        self.cache.state(key)
    }

    pub fn preload_status(&self) -> PreloadStatus {
        let environment = self.probe.snapshot();
        let metrics = self.metrics.snapshot();
        PreloadStatus {
            cached_keys: self.cache.cached_keys(),
            in_flight_keys: self.cache.in_flight_keys(),
            failed_keys: self.cache.failed_keys(),
            cache_hit_rate: metrics.cache_hit_rate(),
            mode: environment.mode(),
            environment,
            metrics,
        }
    }

    /// Start the memory monitor and the coordinator event loop.
    ///
    /// Both stop when `shutdown` is cancelled; the coordinator also stops
    /// when every event sender is dropped.
    pub fn start(&self, shutdown: CancellationToken) -> EngineHandle {
        let (events, rx) = mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let monitor = tokio::spawn(Arc::clone(&self.monitor).run(shutdown.clone()));
        let coordinator = tokio::spawn(Arc::clone(&self.coordinator).run(rx, shutdown));
        info!("Preload engine started");
        EngineHandle {
            events,
            monitor,
            coordinator,
        }
    }

    /// Reset every cache entry to `NotLoaded`.
    ///
    /// In-flight loads finish and repopulate their entries.
    pub fn reset(&self) {
        self.cache.reset();
        info!("Preload engine reset");
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &Arc<StrategyCoordinator> {
        &self.coordinator
    }

    pub fn history(&self) -> &Arc<NavigationHistoryTracker> {
        &self.history
    }

    pub fn monitor(&self) -> &Arc<MemoryPressureMonitor> {
        &self.monitor
    }

    pub fn observations(&self) -> &Arc<ObservationLog> {
        &self.observations
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::StaticProbe;
    use crate::error::{ConfigError, LoadError, RegistryError};
    use crate::memory_monitor::MemoryMonitorConfig;
    use crate::registry::PreloadPolicy;
    use crate::strategy::StrategyConfig;
    use bytes::Bytes;
    use std::time::Duration;

    fn registry() -> LoadableRegistry {
        LoadableRegistry::builder()
            .register(
                "home",
                || async { Ok::<_, LoadError>(Bytes::from_static(b"home")) },
                PreloadPolicy::high(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_rejects_unknown_strategy_keys() {
        let config = PreloadConfig::default()
            .with_strategy(StrategyConfig::default().with_bootstrap(["ghost"]));
        let err = PreloadEngine::new(registry(), config, Arc::new(StaticProbe::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Registry(RegistryError::UnknownListedKey { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let configs = [
            PreloadConfig::default().with_strategy(
                StrategyConfig::default().with_time_of_day_interval(Duration::ZERO),
            ),
            PreloadConfig::default()
                .with_memory(MemoryMonitorConfig::default().with_interval(Duration::ZERO)),
        ];
        for config in configs {
            let err = PreloadEngine::new(registry(), config, Arc::new(StaticProbe::default()))
                .unwrap_err();
            assert!(matches!(
                err,
                EngineError::Config(ConfigError::InvalidValue { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_status_reflects_cache() {
        let engine = PreloadEngine::new(
            registry(),
            PreloadConfig::default(),
            Arc::new(StaticProbe::default()),
        )
        .unwrap();

        engine.ensure_loaded(&"home".into()).await.unwrap();
        engine.ensure_loaded(&"home".into()).await.unwrap();

        let status = engine.preload_status();
        assert_eq!(status.cached_keys, vec![LoadableKey::from("home")]);
        assert!(status.in_flight_keys.is_empty());
        assert_eq!(status.cache_hit_rate, 0.5);
        assert_eq!(status.mode, OperatingMode::Medium);
    }

    #[tokio::test]
    async fn test_reset_clears_entries() {
        let engine = PreloadEngine::new(
            registry(),
            PreloadConfig::default(),
            Arc::new(StaticProbe::default()),
        )
        .unwrap();

        engine.ensure_loaded(&"home".into()).await.unwrap();
        engine.reset();

        assert!(engine.get(&"home".into()).is_none());
        assert!(engine.preload_status().cached_keys.is_empty());
    }
}
