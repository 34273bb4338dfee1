//! Priority scheduling of speculative loads.
//!
//! The scheduler sits between the strategy triggers and the [`ModuleCache`].
//! It applies a key's [`PreloadPolicy`] before anything reaches the cache:
//!
//! 1. Environment gate: page hidden, host offline, predicate false, or the
//!    network-aware gate for low-priority work on a constrained connection
//! 2. Optional delay, after which the gate is evaluated again
//! 3. The request itself, through the cache's dedup path
//!
//! A skipped request resolves to `Ok(None)`. Skipping is not a failure.
//!
//! # Batches
//!
//! ```text
//! [low:A, high:B, medium:C]
//!         │ stable sort by priority
//!         ▼
//! [high:B] ──► sequential chain (each awaited)
//! [medium:C, low:A] ──► issued concurrently, in order, after the chain
//! ```
//!
//! Batch errors are best-effort: they land in the [`ObservationLog`] and
//! the returned [`BatchReport`], never in a caller's error path.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{LoadHandle, ModuleCache};
use crate::environment::CapabilityProbe;
use crate::error::{PreloadError, Result, SkipReason};
use crate::registry::{LoadableKey, ModuleRef, PreloadPolicy, Priority};
use crate::retry::LoadContext;
use crate::telemetry::{ObservationKind, ObservationLog, PreloadMetrics};

/// Outcome of a scheduled batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Keys that ended `Loaded`, including cache hits.
    pub loaded: Vec<LoadableKey>,
    /// Keys not issued because of gating or cancellation.
    pub skipped: Vec<LoadableKey>,
    /// Keys whose load failed after retries.
    pub failed: Vec<LoadableKey>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.loaded.len() + self.skipped.len() + self.failed.len()
    }

    fn settle(&mut self, key: LoadableKey, outcome: &Result<Option<ModuleRef>>) {
        match outcome {
            Ok(Some(_)) => self.loaded.push(key),
            Ok(None) => self.skipped.push(key),
            Err(_) => self.failed.push(key),
        }
    }
}

/// Sequences load requests by priority class.
#[derive(Clone)]
pub struct PriorityScheduler {
    cache: Arc<ModuleCache>,
    probe: Arc<dyn CapabilityProbe>,
    metrics: Arc<PreloadMetrics>,
    observations: Arc<ObservationLog>,
}

impl std::fmt::Debug for PriorityScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityScheduler")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl PriorityScheduler {
    pub fn new(
        cache: Arc<ModuleCache>,
        probe: Arc<dyn CapabilityProbe>,
        metrics: Arc<PreloadMetrics>,
        observations: Arc<ObservationLog>,
    ) -> Self {
        Self {
            cache,
            probe,
            metrics,
            observations,
        }
    }

    /// The registered policy for `key`, if any.
    pub fn policy_for(&self, key: &LoadableKey) -> Option<PreloadPolicy> {
        self.cache.registry().policy(key).cloned()
    }

    /// Why a request under `policy` would be skipped right now, if it would.
    pub fn gate(&self, policy: &PreloadPolicy) -> Option<SkipReason> {
        let env = self.probe.snapshot();
        if !env.visible {
            return Some(SkipReason::PageHidden);
        }
        if !env.online {
            return Some(SkipReason::Offline);
        }
        if !policy.predicate_allows(&env) {
            return Some(SkipReason::Predicate);
        }
        LoadContext::from_policy(policy).fail_fast_reason(&env)
    }

    /// Schedule one key under `policy`.
    ///
    /// Returns `Ok(None)` when the request is skipped by policy.
    ///
    /// # Errors
    ///
    /// `UnknownKey` or `LoadFailed` from the cache.
    pub async fn schedule(
        &self,
        key: &LoadableKey,
        policy: &PreloadPolicy,
    ) -> Result<Option<ModuleRef>> {
        self.schedule_cancellable(key, policy, &CancellationToken::new())
            .await
    }

    /// Like [`schedule`](Self::schedule), but `cancel` withdraws the request
    /// if it fires before the request is issued to the cache.
    ///
    /// Cancelling after issue has no effect on the load.
    pub async fn schedule_cancellable(
        &self,
        key: &LoadableKey,
        policy: &PreloadPolicy,
        cancel: &CancellationToken,
    ) -> Result<Option<ModuleRef>> {
        if let Some(delay) = policy.delay {
            if let Some(reason) = self.gate(policy) {
                self.record_skip(key, reason);
                return Ok(None);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.record_skip(key, SkipReason::Cancelled);
                    return Ok(None);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        } else if cancel.is_cancelled() {
            self.record_skip(key, SkipReason::Cancelled);
            return Ok(None);
        }

        let Some(handle) = self.issue(key, policy) else {
            return Ok(None);
        };
        self.await_issued(key, handle).await
    }

    /// Gate and hand the request to the cache without awaiting it.
    ///
    /// The cache starts the loader before this returns, so consecutive calls
    /// invoke loaders in call order.
    fn issue(&self, key: &LoadableKey, policy: &PreloadPolicy) -> Option<LoadHandle> {
        if let Some(reason) = self.gate(policy) {
            self.record_skip(key, reason);
            return None;
        }
        debug!(key = %key, priority = %policy.priority, "Issuing scheduled load");
        Some(self.cache.request(key, LoadContext::from_policy(policy)))
    }

    async fn await_issued(&self, key: &LoadableKey, handle: LoadHandle) -> Result<Option<ModuleRef>> {
        match handle.await {
            Ok(module) => Ok(Some(module)),
            Err(PreloadError::PolicySkipped { reason, .. }) => {
                self.observations.record(ObservationKind::PolicySkipped {
                    key: key.clone(),
                    reason,
                });
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Schedule a key and swallow the outcome.
    ///
    /// Failures are recorded in the observation log instead of returned.
    pub async fn schedule_best_effort(
        &self,
        key: &LoadableKey,
        policy: &PreloadPolicy,
        cancel: &CancellationToken,
    ) -> Option<ModuleRef> {
        let outcome = self.schedule_cancellable(key, policy, cancel).await;
        self.observe_best_effort(key, &outcome);
        outcome.ok().flatten()
    }

    /// [`schedule_best_effort`](Self::schedule_best_effort) on a spawned task.
    pub fn prefetch(&self, key: LoadableKey, policy: PreloadPolicy) -> JoinHandle<Option<ModuleRef>> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler
                .schedule_best_effort(&key, &policy, &CancellationToken::new())
                .await
        })
    }

    /// Schedule a batch of keys.
    ///
    /// Items are stably sorted by priority class. High-priority items run as
    /// a sequential chain; the rest are then issued concurrently in sorted
    /// order. The returned handle resolves once every item has settled.
    pub fn schedule_batch(&self, items: Vec<(LoadableKey, PreloadPolicy)>) -> JoinHandle<BatchReport> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run_batch(items).await })
    }

    async fn run_batch(&self, mut items: Vec<(LoadableKey, PreloadPolicy)>) -> BatchReport {
        // `sort_by` is stable: caller order survives within a class.
        items.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority));
        let split = items
            .iter()
            .position(|(_, policy)| policy.priority != Priority::High)
            .unwrap_or(items.len());
        let background = items.split_off(split);
        let mut report = BatchReport::default();

        for (key, policy) in items {
            let outcome = self.schedule(&key, &policy).await;
            self.observe_best_effort(&key, &outcome);
            report.settle(key, &outcome);
        }

        // Undelayed items are issued here, in sorted order, before anything
        // is awaited. Delayed items wait inside the set.
        let mut pending = FuturesUnordered::new();
        for (key, policy) in background {
            let issued = policy.delay.is_none().then(|| self.issue(&key, &policy));
            let scheduler = self.clone();
            pending.push(async move {
                let outcome = match issued {
                    Some(Some(handle)) => scheduler.await_issued(&key, handle).await,
                    Some(None) => Ok(None),
                    None => scheduler.schedule(&key, &policy).await,
                };
                (key, outcome)
            });
        }

        while let Some((key, outcome)) = pending.next().await {
            self.observe_best_effort(&key, &outcome);
            report.settle(key, &outcome);
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Batch settled"
        );
        report
    }

    fn record_skip(&self, key: &LoadableKey, reason: SkipReason) {
        debug!(key = %key, reason = %reason, "Scheduled load skipped");
        self.metrics.skipped();
        self.observations.record(ObservationKind::PolicySkipped {
            key: key.clone(),
            reason,
        });
    }

    fn observe_best_effort(&self, key: &LoadableKey, outcome: &Result<Option<ModuleRef>>) {
        if let Err(err) = outcome {
            warn!(key = %key, error = %err, "Prefetch failed");
            self.observations.record(ObservationKind::PrefetchFailed {
                key: key.clone(),
                error: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{NetworkClass, StaticProbe};
    use crate::error::LoadError;
    use crate::registry::{LoadableRegistry, Loader};
    use crate::retry::{RetryPolicy, RetryingLoader};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        scheduler: PriorityScheduler,
        probe: Arc<StaticProbe>,
        observations: Arc<ObservationLog>,
        cache: Arc<ModuleCache>,
    }

    fn fixture(registry: LoadableRegistry) -> Fixture {
        let probe = Arc::new(StaticProbe::default());
        let metrics = Arc::new(PreloadMetrics::new());
        let observations = Arc::new(ObservationLog::default());
        let loader = Arc::new(RetryingLoader::new(
            RetryPolicy::with_max_retries(1),
            probe.clone(),
            Arc::clone(&metrics),
            Arc::clone(&observations),
        ));
        let cache = Arc::new(ModuleCache::new(
            Arc::new(registry),
            loader,
            Arc::clone(&metrics),
        ));
        let scheduler = PriorityScheduler::new(
            Arc::clone(&cache),
            probe.clone(),
            metrics,
            Arc::clone(&observations),
        );
        Fixture {
            scheduler,
            probe,
            observations,
            cache,
        }
    }

    fn recording(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> impl Loader {
        move || {
            log.lock().push(name);
            async { Ok::<_, LoadError>(Bytes::from_static(b"m")) }
        }
    }

    fn counting(calls: Arc<AtomicUsize>) -> impl Loader {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, LoadError>(Bytes::from_static(b"m")) }
        }
    }

    #[tokio::test]
    async fn test_batch_issues_by_priority() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = LoadableRegistry::builder()
            .register("A", recording("A", order.clone()), PreloadPolicy::low())
            .register("B", recording("B", order.clone()), PreloadPolicy::high())
            .register("C", recording("C", order.clone()), PreloadPolicy::medium())
            .build()
            .unwrap();
        let fx = fixture(registry);

        let batch = vec![
            ("A".into(), PreloadPolicy::low()),
            ("B".into(), PreloadPolicy::high()),
            ("C".into(), PreloadPolicy::medium()),
        ];
        let report = fx.scheduler.schedule_batch(batch).await.unwrap();

        assert_eq!(*order.lock(), vec!["B", "C", "A"]);
        assert_eq!(report.loaded.len(), 3);
        assert!(report.failed.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_order_holds_on_multi_thread_runtime() {
        for _ in 0..50 {
            let order = Arc::new(Mutex::new(Vec::new()));
            let registry = LoadableRegistry::builder()
                .register("A", recording("A", order.clone()), PreloadPolicy::low())
                .register("B", recording("B", order.clone()), PreloadPolicy::high())
                .register("C", recording("C", order.clone()), PreloadPolicy::medium())
                .register("D", recording("D", order.clone()), PreloadPolicy::low())
                .build()
                .unwrap();
            let fx = fixture(registry);

            let batch = vec![
                ("A".into(), PreloadPolicy::low()),
                ("B".into(), PreloadPolicy::high()),
                ("C".into(), PreloadPolicy::medium()),
                ("D".into(), PreloadPolicy::low()),
            ];
            let report = fx.scheduler.schedule_batch(batch).await.unwrap();

            assert_eq!(*order.lock(), vec!["B", "C", "A", "D"]);
            assert_eq!(report.loaded.len(), 4);
        }
    }

    #[tokio::test]
    async fn test_high_chain_is_sequential_and_stable() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = LoadableRegistry::builder()
            .register("h1", recording("h1", order.clone()), PreloadPolicy::high())
            .register("h2", recording("h2", order.clone()), PreloadPolicy::high())
            .register("l1", recording("l1", order.clone()), PreloadPolicy::low())
            .build()
            .unwrap();
        let fx = fixture(registry);

        let batch = vec![
            ("l1".into(), PreloadPolicy::low()),
            ("h1".into(), PreloadPolicy::high()),
            ("h2".into(), PreloadPolicy::high()),
        ];
        fx.scheduler.schedule_batch(batch).await.unwrap();

        assert_eq!(*order.lock(), vec!["h1", "h2", "l1"]);
    }

    #[tokio::test]
    async fn test_network_gate_never_calls_loader() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = PreloadPolicy::low().network_aware();
        let registry = LoadableRegistry::builder()
            .register("bg", counting(calls.clone()), policy.clone())
            .build()
            .unwrap();
        let fx = fixture(registry);
        fx.probe.update(|s| {
            s.network = NetworkClass::Slow2G;
            s.save_data = true;
        });

        let result = fx.scheduler.schedule(&"bg".into(), &policy).await.unwrap();

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            fx.cache.state(&"bg".into()),
            crate::cache::LoadState::NotLoaded
        ));
        assert_eq!(
            fx.observations.filter(|k| matches!(
                k,
                ObservationKind::PolicySkipped {
                    reason: SkipReason::DataSaver,
                    ..
                }
            ))
            .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_predicate_gate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = PreloadPolicy::medium().with_predicate(|env| env.cores >= 16);
        let registry = LoadableRegistry::builder()
            .register("heavy", counting(calls.clone()), policy.clone())
            .build()
            .unwrap();
        let fx = fixture(registry);

        assert!(fx.scheduler.schedule(&"heavy".into(), &policy).await.unwrap().is_none());
        fx.probe.update(|s| s.cores = 16);
        assert!(fx.scheduler.schedule(&"heavy".into(), &policy).await.unwrap().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hidden_and_offline_skip() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = LoadableRegistry::builder()
            .register("k", counting(calls.clone()), PreloadPolicy::high())
            .build()
            .unwrap();
        let fx = fixture(registry);

        fx.probe.update(|s| s.visible = false);
        assert_eq!(fx.scheduler.gate(&PreloadPolicy::high()), Some(SkipReason::PageHidden));
        fx.probe.update(|s| {
            s.visible = true;
            s.online = false;
        });
        assert_eq!(fx.scheduler.gate(&PreloadPolicy::high()), Some(SkipReason::Offline));
        assert!(fx
            .scheduler
            .schedule(&"k".into(), &PreloadPolicy::high())
            .await
            .unwrap()
            .is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_rechecks_gate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = PreloadPolicy::low().with_delay(Duration::from_secs(2));
        let registry = LoadableRegistry::builder()
            .register("late", counting(calls.clone()), policy.clone())
            .build()
            .unwrap();
        let fx = fixture(registry);

        let scheduler = fx.scheduler.clone();
        let task_policy = policy.clone();
        let handle =
            tokio::spawn(async move { scheduler.schedule(&"late".into(), &task_policy).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        fx.probe.update(|s| s.online = false);

        assert!(handle.await.unwrap().unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_issue() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = PreloadPolicy::medium().with_delay(Duration::from_millis(500));
        let registry = LoadableRegistry::builder()
            .register("k", counting(calls.clone()), policy.clone())
            .build()
            .unwrap();
        let fx = fixture(registry);
        let cancel = CancellationToken::new();

        let scheduler = fx.scheduler.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler
                .schedule_cancellable(&"k".into(), &policy, &token)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        assert!(handle.await.unwrap().unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_failures_are_observed() {
        let registry = LoadableRegistry::builder()
            .register(
                "broken",
                || async { Err::<Bytes, _>(LoadError::transient("503")) },
                PreloadPolicy::low(),
            )
            .build()
            .unwrap();
        let fx = fixture(registry);

        let report = fx
            .scheduler
            .schedule_batch(vec![("broken".into(), PreloadPolicy::low())])
            .await
            .unwrap();

        assert_eq!(report.failed, vec![LoadableKey::from("broken")]);
        assert_eq!(
            fx.observations
                .filter(|k| matches!(k, ObservationKind::PrefetchFailed { .. }))
                .len(),
            1
        );
        assert!(fx.cache.state(&"broken".into()).is_failed());
    }
}
