//! Loader wrapper with bounded retry, per-attempt timeout and the
//! network-aware fail-fast gate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::policy::RetryPolicy;
use crate::environment::{CapabilityProbe, EnvironmentSnapshot};
use crate::error::{LoadError, PreloadError, SkipReason};
use crate::registry::{LoadableKey, Loader, Module, ModuleRef, PreloadPolicy, Priority};
use crate::telemetry::{ObservationKind, ObservationLog, PreloadMetrics};

/// Who is asking for a load and how strictly to gate it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadContext {
    pub priority: Priority,
    pub network_aware: bool,
}

impl LoadContext {
    /// A consumer needs the unit now; never gated.
    pub fn on_demand() -> Self {
        Self {
            priority: Priority::High,
            network_aware: false,
        }
    }

    /// Context for a scheduled request under `policy`.
    pub fn from_policy(policy: &PreloadPolicy) -> Self {
        Self {
            priority: policy.priority,
            network_aware: policy.network_aware,
        }
    }

    /// Whether the fail-fast gate applies to this context at all.
    pub fn can_fail_fast(&self) -> bool {
        self.network_aware && self.priority == Priority::Low
    }

    /// Reason to skip this load without attempting it, if any.
    ///
    /// Only low-priority, network-aware requests are refused, and only when
    /// data saver is on or the connection is 2g/slow-2g.
    pub fn fail_fast_reason(&self, env: &EnvironmentSnapshot) -> Option<SkipReason> {
        if !self.can_fail_fast() {
            return None;
        }
        if env.save_data {
            Some(SkipReason::DataSaver)
        } else if env.is_slow_network() {
            Some(SkipReason::SlowNetwork)
        } else {
            None
        }
    }
}

/// Runs a loader until it succeeds or the retry budget is spent.
pub struct RetryingLoader {
    policy: RetryPolicy,
    probe: Arc<dyn CapabilityProbe>,
    metrics: Arc<PreloadMetrics>,
    observations: Arc<ObservationLog>,
}

impl std::fmt::Debug for RetryingLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingLoader")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingLoader {
    pub fn new(
        policy: RetryPolicy,
        probe: Arc<dyn CapabilityProbe>,
        metrics: Arc<PreloadMetrics>,
        observations: Arc<ObservationLog>,
    ) -> Self {
        Self {
            policy,
            probe,
            metrics,
            observations,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Load `key`, retrying with backoff.
    ///
    /// `on_attempt` is called with the 0-based attempt number before each
    /// attempt starts, so the cache can expose progress.
    ///
    /// # Errors
    ///
    /// - `PolicySkipped` if the fail-fast gate refuses the load (no attempt made)
    /// - `LoadFailed` once `max_retries + 1` attempts have failed
    pub async fn load<F>(
        &self,
        key: &LoadableKey,
        loader: Arc<dyn Loader>,
        ctx: LoadContext,
        on_attempt: F,
    ) -> Result<ModuleRef, PreloadError>
    where
        F: Fn(u32) + Send,
    {
        let env = self.probe.snapshot();
        if let Some(reason) = ctx.fail_fast_reason(&env) {
            debug!(key = %key, reason = %reason, "Load refused before first attempt");
            self.metrics.skipped();
            return Err(PreloadError::PolicySkipped {
                key: key.clone(),
                reason,
            });
        }

        self.metrics.load_started();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            on_attempt(attempt);
            let attempt_started = Instant::now();
            let result = self.attempt(loader.as_ref()).await;
            self.observe_duration(key, attempt_started.elapsed());

            let error = match result {
                Ok(payload) => {
                    self.metrics.load_succeeded();
                    let load_duration = started.elapsed();
                    debug!(
                        key = %key,
                        attempts = attempt + 1,
                        elapsed_ms = load_duration.as_millis() as u64,
                        "Module loaded"
                    );
                    return Ok(Arc::new(Module {
                        key: key.clone(),
                        payload,
                        attempts: attempt + 1,
                        load_duration,
                    }));
                }
                Err(error) => error,
            };

            let network = self.probe.snapshot().network;
            match self.policy.delay_for_attempt(attempt, network) {
                Some(delay) if error.is_retryable() => {
                    debug!(
                        key = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        network = %network,
                        error = %error,
                        "Load attempt failed, backing off"
                    );
                    self.metrics.retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => {
                    self.metrics.load_failed();
                    warn!(
                        key = %key,
                        attempts = attempt + 1,
                        error = %error,
                        "Load failed, retries exhausted"
                    );
                    return Err(PreloadError::LoadFailed {
                        key: key.clone(),
                        attempts: attempt + 1,
                        source: error,
                    });
                }
            }
        }
    }

    /// One attempt bounded by the attempt timeout.
    async fn attempt(&self, loader: &dyn Loader) -> Result<bytes::Bytes, LoadError> {
        let timeout = self.policy.attempt_timeout;
        match tokio::time::timeout(timeout, loader.load()).await {
            Ok(result) => result,
            Err(_) => Err(LoadError::Timeout {
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn observe_duration(&self, key: &LoadableKey, elapsed: Duration) {
        if elapsed <= self.policy.slow_load_threshold {
            return;
        }
        warn!(
            key = %key,
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = self.policy.slow_load_threshold.as_millis() as u64,
            "Slow module load"
        );
        self.metrics.slow_load();
        self.observations.record(ObservationKind::SlowLoad {
            key: key.clone(),
            elapsed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{NetworkClass, StaticProbe};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn retrying(policy: RetryPolicy, probe: Arc<StaticProbe>) -> (RetryingLoader, Arc<PreloadMetrics>, Arc<ObservationLog>) {
        let metrics = Arc::new(PreloadMetrics::new());
        let observations = Arc::new(ObservationLog::default());
        let loader = RetryingLoader::new(
            policy,
            probe,
            Arc::clone(&metrics),
            Arc::clone(&observations),
        );
        (loader, metrics, observations)
    }

    /// Loader failing `failures` times before succeeding.
    fn flaky(failures: usize, calls: Arc<AtomicUsize>) -> Arc<dyn Loader> {
        Arc::new(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < failures {
                    Err(LoadError::transient("connection reset"))
                } else {
                    Ok(Bytes::from_static(b"ok"))
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let (loader, metrics, _) = retrying(RetryPolicy::default(), Arc::new(StaticProbe::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let module = loader
            .load(&"c".into(), flaky(2, Arc::clone(&calls)), LoadContext::on_demand(), |_| {})
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(module.attempts, 3);
        assert_eq!(&module.payload[..], b"ok");
        assert_eq!(metrics.snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound() {
        let (loader, metrics, _) =
            retrying(RetryPolicy::with_max_retries(3), Arc::new(StaticProbe::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let err = loader
            .load(&"x".into(), flaky(usize::MAX, Arc::clone(&calls)), LoadContext::on_demand(), |_| {})
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            PreloadError::LoadFailed { attempts, source, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(source, LoadError::transient("connection reset"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(metrics.snapshot().loads_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_uses_network_base() {
        let probe = Arc::new(StaticProbe::default());
        probe.update(|s| s.network = NetworkClass::TwoG);
        let (loader, _, _) = retrying(RetryPolicy::with_max_retries(2), probe);
        let calls = Arc::new(AtomicUsize::new(0));

        let start = tokio::time::Instant::now();
        let _ = loader
            .load(&"x".into(), flaky(usize::MAX, calls), LoadContext::on_demand(), |_| {})
            .await;

        // 2000ms + 3000ms of backoff on 2g
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5000), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(5100), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let policy = RetryPolicy::no_retry().with_attempt_timeout(Duration::from_secs(1));
        let (loader, _, _) = retrying(policy, Arc::new(StaticProbe::default()));
        let hanging: Arc<dyn Loader> = Arc::new(|| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, LoadError>(Bytes::new())
        });

        let err = loader
            .load(&"slow".into(), hanging, LoadContext::on_demand(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PreloadError::LoadFailed {
                source: LoadError::Timeout { after_ms: 1000 },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_load_observed() {
        let (loader, metrics, observations) =
            retrying(RetryPolicy::default(), Arc::new(StaticProbe::default()));
        let sluggish: Arc<dyn Loader> = Arc::new(|| async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            Ok::<_, LoadError>(Bytes::from_static(b"late"))
        });

        loader
            .load(&"big".into(), sluggish, LoadContext::on_demand(), |_| {})
            .await
            .unwrap();

        assert_eq!(metrics.snapshot().slow_loads, 1);
        assert_eq!(
            observations
                .filter(|k| matches!(k, ObservationKind::SlowLoad { .. }))
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_fail_fast_on_constrained_network() {
        let probe = Arc::new(StaticProbe::default());
        probe.update(|s| {
            s.network = NetworkClass::Slow2G;
            s.save_data = true;
        });
        let (loader, metrics, _) = retrying(RetryPolicy::default(), probe);
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = LoadContext::from_policy(&PreloadPolicy::low().network_aware());

        let err = loader
            .load(&"bg".into(), flaky(0, Arc::clone(&calls)), ctx, |_| {})
            .await
            .unwrap_err();

        assert!(err.is_skip());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.snapshot().skipped, 1);
        assert_eq!(metrics.snapshot().loads_started, 0);
    }

    #[test]
    fn test_fail_fast_only_for_low_network_aware() {
        let env = EnvironmentSnapshot {
            network: NetworkClass::TwoG,
            ..EnvironmentSnapshot::default()
        };
        let low_aware = LoadContext::from_policy(&PreloadPolicy::low().network_aware());
        let medium_aware = LoadContext::from_policy(&PreloadPolicy::medium().network_aware());
        let low_plain = LoadContext::from_policy(&PreloadPolicy::low());

        assert_eq!(low_aware.fail_fast_reason(&env), Some(SkipReason::SlowNetwork));
        assert_eq!(medium_aware.fail_fast_reason(&env), None);
        assert_eq!(low_plain.fail_fast_reason(&env), None);
        assert_eq!(LoadContext::on_demand().fail_fast_reason(&env), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_attempt_reports_progress() {
        let (loader, _, _) = retrying(RetryPolicy::default(), Arc::new(StaticProbe::default()));
        let last = Arc::new(AtomicU32::new(u32::MAX));
        let seen = Arc::clone(&last);

        loader
            .load(
                &"p".into(),
                flaky(2, Arc::new(AtomicUsize::new(0))),
                LoadContext::on_demand(),
                move |a| seen.store(a, Ordering::SeqCst),
            )
            .await
            .unwrap();

        assert_eq!(last.load(Ordering::SeqCst), 2);
    }
}
