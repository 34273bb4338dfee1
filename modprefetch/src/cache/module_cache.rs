//! Deduplicating module cache.
//!
//! Every load goes through [`ModuleCache::request`]. The check of the current
//! state and the claim of the `Loading` slot happen under one lock acquisition
//! with no `.await` in between, so two requests for the same key can never both
//! start a load. The claiming request polls the load once before returning,
//! which invokes the loader (or refuses it at the fail-fast gate) in request
//! order. The rest of the load is spawned onto the runtime and runs to
//! completion even if every requester drops its handle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::{self, BoxFuture, FutureExt, Ready};
use parking_lot::Mutex;
use tracing::debug;

use super::state::{LoadState, SharedLoad, Slot};
use crate::error::PreloadError;
use crate::registry::{LoadableKey, LoadableRegistry, Loader, ModuleRef};
use crate::retry::{LoadContext, RetryingLoader};
use crate::telemetry::PreloadMetrics;

/// Handle returned by [`ModuleCache::request`].
///
/// Resolves immediately for cached entries; otherwise it is a clone of the
/// key's single in-flight load.
#[must_use = "a LoadHandle does nothing unless awaited; the load itself runs regardless"]
pub enum LoadHandle {
    Ready(Ready<Result<ModuleRef, PreloadError>>),
    Pending(SharedLoad),
    /// Joined a gated load; re-requests under the joiner's own context if
    /// that load was refused.
    Rejoin(BoxFuture<'static, Result<ModuleRef, PreloadError>>),
}

impl LoadHandle {
    fn ready(result: Result<ModuleRef, PreloadError>) -> Self {
        Self::Ready(future::ready(result))
    }

    /// Whether the request was answered without waiting on a load.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl Future for LoadHandle {
    type Output = Result<ModuleRef, PreloadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut() {
            LoadHandle::Ready(ready) => Pin::new(ready).poll(cx),
            LoadHandle::Pending(shared) => Pin::new(shared).poll(cx),
            LoadHandle::Rejoin(rejoin) => rejoin.as_mut().poll(cx),
        }
    }
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<LoadableKey, Slot>,
    next_generation: u64,
}

/// Per-key state machine over the registry's loaders.
///
/// One instance per process, created at startup and passed to every
/// component that needs it. [`reset`](Self::reset) is the explicit teardown.
/// Clones share the same entries.
#[derive(Clone)]
pub struct ModuleCache {
    registry: Arc<LoadableRegistry>,
    loader: Arc<RetryingLoader>,
    metrics: Arc<PreloadMetrics>,
    state: Arc<Mutex<CacheState>>,
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("entries", &self.state.lock().slots.len())
            .finish_non_exhaustive()
    }
}

impl ModuleCache {
    pub fn new(
        registry: Arc<LoadableRegistry>,
        loader: Arc<RetryingLoader>,
        metrics: Arc<PreloadMetrics>,
    ) -> Self {
        Self {
            registry,
            loader,
            metrics,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn registry(&self) -> &Arc<LoadableRegistry> {
        &self.registry
    }

    /// Request `key`.
    ///
    /// - `Loaded`: resolves immediately with the cached value, no I/O
    /// - `Loading`: returns the same pending operation
    /// - `NotLoaded`/`Failed`: claims `Loading { attempt: 0 }` and starts the retry loop
    ///
    /// The first attempt starts before this returns. Must be called from
    /// within a Tokio runtime.
    pub fn request(&self, key: &LoadableKey, ctx: LoadContext) -> LoadHandle {
        self.metrics.request();
        let now = Instant::now();

        let mut state = self.state.lock();
        match state.slots.get_mut(key) {
            Some(Slot::Loaded {
                value,
                last_requested_at,
                ..
            }) => {
                *last_requested_at = now;
                self.metrics.cache_hit();
                return LoadHandle::ready(Ok(Arc::clone(value)));
            }
            Some(Slot::Loading {
                future,
                ctx: claimed,
                ..
            }) => {
                self.metrics.joined_in_flight();
                debug!(key = %key, "Joined in-flight load");
                let joined = future.clone();
                if !claimed.can_fail_fast() || ctx.can_fail_fast() {
                    return LoadHandle::Pending(joined);
                }
                let cache = self.clone();
                let key = key.clone();
                return LoadHandle::Rejoin(
                    async move {
                        match joined.await {
                            Err(err) if err.is_skip() => cache.request(&key, ctx).await,
                            other => other,
                        }
                    }
                    .boxed(),
                );
            }
            Some(Slot::Failed { .. }) | None => {}
        }

        let Some(source) = self.registry.loader(key) else {
            return LoadHandle::ready(Err(PreloadError::UnknownKey(key.clone())));
        };

        state.next_generation += 1;
        let generation = state.next_generation;
        let attempt = Arc::new(AtomicU32::new(0));
        let future = self
            .load_task(key.clone(), source, ctx, generation, Arc::clone(&attempt))
            .boxed()
            .shared();

        state.slots.insert(
            key.clone(),
            Slot::Loading {
                started_at: now,
                attempt,
                generation,
                ctx,
                future: future.clone(),
            },
        );
        drop(state);

        debug!(key = %key, priority = %ctx.priority, generation, "Load claimed");
        // First poll happens here, so the loader is invoked in request order
        // and the fail-fast gate sees the environment at claim time.
        match future.clone().now_or_never() {
            Some(result) => LoadHandle::ready(result),
            None => {
                tokio::spawn(future.clone());
                LoadHandle::Pending(future)
            }
        }
    }

    /// Future that runs the retry loop and writes the outcome back.
    fn load_task(
        &self,
        key: LoadableKey,
        source: Arc<dyn Loader>,
        ctx: LoadContext,
        generation: u64,
        attempt: Arc<AtomicU32>,
    ) -> impl Future<Output = Result<ModuleRef, PreloadError>> + Send + 'static {
        let loader = Arc::clone(&self.loader);
        let state = Arc::clone(&self.state);

        async move {
            let progress = Arc::clone(&attempt);
            let result = loader
                .load(&key, source, ctx, move |n| progress.store(n, Ordering::Relaxed))
                .await;

            let mut state = state.lock();
            // A reset while in flight leaves no slot; the result goes into a
            // fresh one. A newer load for the key owns the slot otherwise.
            let owns_slot = match state.slots.get(&key) {
                None => true,
                Some(Slot::Loading { generation: g, .. }) => *g == generation,
                Some(_) => false,
            };
            if owns_slot {
                let now = Instant::now();
                match &result {
                    Ok(value) => {
                        state.slots.insert(
                            key.clone(),
                            Slot::Loaded {
                                value: Arc::clone(value),
                                loaded_at: now,
                                last_requested_at: now,
                            },
                        );
                    }
                    Err(err) if err.is_skip() => {
                        state.slots.remove(&key);
                    }
                    Err(err) => {
                        let attempts = match err {
                            PreloadError::LoadFailed { attempts, .. } => *attempts,
                            _ => attempt.load(Ordering::Relaxed) + 1,
                        };
                        state.slots.insert(
                            key.clone(),
                            Slot::Failed {
                                error: err.clone(),
                                attempt: attempts,
                                last_attempt_at: now,
                            },
                        );
                    }
                }
            }
            result
        }
    }

    /// Current state of `key`.
    pub fn state(&self, key: &LoadableKey) -> LoadState {
        self.state
            .lock()
            .slots
            .get(key)
            .map_or(LoadState::NotLoaded, Slot::view)
    }

    /// Synchronous read of a loaded value. Does not count as a request.
    pub fn peek(&self, key: &LoadableKey) -> Option<ModuleRef> {
        match self.state.lock().slots.get(key) {
            Some(Slot::Loaded { value, .. }) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Keys currently `Loaded`, sorted.
    pub fn cached_keys(&self) -> Vec<LoadableKey> {
        self.keys_where(|s| matches!(s, Slot::Loaded { .. }))
    }

    /// Keys currently `Loading`, sorted.
    pub fn in_flight_keys(&self) -> Vec<LoadableKey> {
        self.keys_where(|s| matches!(s, Slot::Loading { .. }))
    }

    /// Keys currently `Failed`, sorted.
    pub fn failed_keys(&self) -> Vec<LoadableKey> {
        self.keys_where(|s| matches!(s, Slot::Failed { .. }))
    }

    fn keys_where(&self, pred: impl Fn(&Slot) -> bool) -> Vec<LoadableKey> {
        let mut keys: Vec<LoadableKey> = self
            .state
            .lock()
            .slots
            .iter()
            .filter(|(_, slot)| pred(slot))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Reset a `Loaded` or `Failed` entry to `NotLoaded`.
    ///
    /// Returns `false` (and does nothing) for `Loading` or absent entries.
    pub fn invalidate(&self, key: &LoadableKey) -> bool {
        let mut state = self.state.lock();
        match state.slots.get(key) {
            Some(Slot::Loaded { .. }) | Some(Slot::Failed { .. }) => {
                state.slots.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Evict a fraction of idle `Loaded` entries.
    ///
    /// Candidates are `Loaded` entries last requested before `idle_cutoff`;
    /// `ceil(candidates * fraction)` of them are reset to `NotLoaded`, least
    /// recently requested first. `Loading` entries are never touched.
    pub fn evict_idle(&self, fraction: f64, idle_cutoff: Instant) -> Vec<LoadableKey> {
        let mut state = self.state.lock();

        let mut candidates: Vec<(Instant, LoadableKey)> = state
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Loaded {
                    last_requested_at, ..
                } if *last_requested_at < idle_cutoff => Some((*last_requested_at, key.clone())),
                _ => None,
            })
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        candidates.sort();
        let count = ((candidates.len() as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;
        let evicted: Vec<LoadableKey> = candidates
            .into_iter()
            .take(count)
            .map(|(_, key)| key)
            .collect();
        for key in &evicted {
            state.slots.remove(key);
        }
        self.metrics.evicted(evicted.len() as u64);
        evicted
    }

    /// Reset every entry to `NotLoaded`.
    ///
    /// In-flight loads are not aborted; they finish and populate fresh slots.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let cleared = state.slots.len();
        state.slots.clear();
        debug!(cleared, "Module cache reset");
    }

    /// Number of entries not in `NotLoaded`.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
