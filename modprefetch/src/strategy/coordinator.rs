//! Trigger-to-schedule orchestration.
//!
//! # Architecture
//!
//! ```text
//! HostEvent ──► StrategyCoordinator ──┬── Navigate ──► history + related + predictions
//!  (mpsc)                             ├── Hover ─────► debounce ──► medium
//!                                     ├── Idle ──────► bootstrap (once)
//!                                     ├── env change ► reclassify ──► extended bootstrap
//!                                     └── hourly ────► time-of-day bucket
//!                                               │
//!                                               ▼ trimmed to the mode limit
//!                                       PriorityScheduler
//! ```
//!
//! Every speculative batch is deduplicated, stably sorted by priority and cut
//! to the current operating mode's fan-out limit before it reaches the
//! scheduler, so constrained devices never see more than two prefetches per
//! trigger.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Timelike;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::config::StrategyConfig;
use super::events::HostEvent;
use crate::environment::{CapabilityProbe, OperatingMode};
use crate::history::NavigationHistoryTracker;
use crate::predict::PredictiveEngine;
use crate::registry::{LoadableKey, ModuleRef, PreloadPolicy, Priority};
use crate::scheduler::{BatchReport, PriorityScheduler};
use crate::telemetry::{ObservationKind, ObservationLog};

type Batch = Vec<(LoadableKey, PreloadPolicy)>;

/// Mutable trigger bookkeeping.
#[derive(Debug)]
struct CoordinatorState {
    /// Pending hover debounces by key.
    hovers: HashMap<LoadableKey, (u64, CancellationToken)>,
    next_hover_id: u64,
    idle_fired: bool,
    mode: OperatingMode,
    bucket: Option<usize>,
}

/// Decides which keys to request, and when.
pub struct StrategyCoordinator {
    config: StrategyConfig,
    scheduler: PriorityScheduler,
    history: Arc<NavigationHistoryTracker>,
    predictor: PredictiveEngine,
    probe: Arc<dyn CapabilityProbe>,
    observations: Arc<ObservationLog>,
    state: Arc<Mutex<CoordinatorState>>,
}

impl std::fmt::Debug for StrategyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCoordinator")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl StrategyCoordinator {
    pub fn new(
        config: StrategyConfig,
        scheduler: PriorityScheduler,
        history: Arc<NavigationHistoryTracker>,
        predictor: PredictiveEngine,
        probe: Arc<dyn CapabilityProbe>,
        observations: Arc<ObservationLog>,
    ) -> Self {
        let mode = probe.snapshot().mode();
        Self {
            config,
            scheduler,
            history,
            predictor,
            probe,
            observations,
            state: Arc::new(Mutex::new(CoordinatorState {
                hovers: HashMap::new(),
                next_hover_id: 0,
                idle_fired: false,
                mode,
                bucket: None,
            })),
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Operating mode as of the last classification.
    pub fn mode(&self) -> OperatingMode {
        self.state.lock().mode
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Route-change trigger.
    ///
    /// Records the visit, then schedules the configured related keys with
    /// their registered policies and the predicted next keys at low priority.
    pub fn on_route_change(&self, key: &LoadableKey) -> JoinHandle<BatchReport> {
        self.history.record(key);

        let mut items: Batch = self
            .config
            .related_to(key)
            .iter()
            .filter_map(|related| self.policy(related, None))
            .collect();

        let predictions = self.predictor.predict(&self.history.snapshot());
        items.extend(
            predictions
                .iter()
                .filter_map(|predicted| self.policy(predicted, Some(Priority::Low))),
        );

        let items = self.plan(items, Some(key));
        info!(
            key = %key,
            scheduled = items.len(),
            predicted = predictions.len(),
            "Route change"
        );
        self.scheduler.schedule_batch(items)
    }

    /// Hover trigger.
    ///
    /// Schedules `key` at medium priority once the debounce elapses without a
    /// matching [`on_hover_leave`](Self::on_hover_leave). A repeated hover on
    /// the same key restarts the debounce. Returns `None` for unregistered keys.
    pub fn on_hover(&self, key: &LoadableKey) -> Option<JoinHandle<Option<ModuleRef>>> {
        let mut policy = self.policy(key, Some(Priority::Medium))?.1;
        policy.delay = None;

        let token = CancellationToken::new();
        let id = {
            let mut state = self.state.lock();
            state.next_hover_id += 1;
            let id = state.next_hover_id;
            if let Some((_, previous)) = state.hovers.insert(key.clone(), (id, token.clone())) {
                previous.cancel();
            }
            id
        };

        let debounce = self.config.hover_debounce;
        let scheduler = self.scheduler.clone();
        let state = Arc::clone(&self.state);
        let key = key.clone();
        debug!(key = %key, debounce_ms = debounce.as_millis() as u64, "Hover debounce started");

        Some(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(key = %key, "Hover cancelled before debounce");
                    return None;
                }
                _ = tokio::time::sleep(debounce) => {}
            }
            {
                let mut state = state.lock();
                if matches!(state.hovers.get(&key), Some((current, _)) if *current == id) {
                    state.hovers.remove(&key);
                }
            }
            scheduler.schedule_best_effort(&key, &policy, &token).await
        }))
    }

    /// Hover-leave trigger. Returns whether a pending hover was cancelled.
    pub fn on_hover_leave(&self, key: &LoadableKey) -> bool {
        match self.state.lock().hovers.remove(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Idle trigger. Schedules the bootstrap set the first time only.
    pub fn on_idle(&self) -> Option<JoinHandle<BatchReport>> {
        {
            let mut state = self.state.lock();
            if state.idle_fired {
                return None;
            }
            state.idle_fired = true;
        }

        let items: Batch = self
            .config
            .bootstrap
            .iter()
            .filter_map(|key| {
                let (key, policy) = self.policy(key, None)?;
                let priority = policy.priority.min(Priority::Medium);
                Some((key, policy.with_priority(priority)))
            })
            .collect();
        let items = self.plan(items, None);
        info!(scheduled = items.len(), "Idle bootstrap");
        Some(self.scheduler.schedule_batch(items))
    }

    /// Time-of-day trigger for `hour` (0-23).
    ///
    /// Schedules the matching bucket's keys at low priority when the bucket
    /// differs from the one last scheduled.
    pub fn on_time_of_day(&self, hour: u32) -> Option<JoinHandle<BatchReport>> {
        let index = self.config.bucket_for_hour(hour);
        {
            let mut state = self.state.lock();
            if state.bucket == index {
                return None;
            }
            state.bucket = index;
        }
        let bucket = &self.config.time_buckets[index?];

        let items: Batch = bucket
            .keys
            .iter()
            .filter_map(|key| self.policy(key, Some(Priority::Low)))
            .collect();
        let items = self.plan(items, None);
        info!(hour, bucket = %bucket.name, scheduled = items.len(), "Time-of-day bucket entered");
        Some(self.scheduler.schedule_batch(items))
    }

    /// Environment-change trigger.
    ///
    /// Reclassifies the environment. When the mode improves, the extended
    /// bootstrap set is scheduled at low priority under the new limit.
    pub fn on_environment_change(&self) -> Option<JoinHandle<BatchReport>> {
        let mode = self.probe.snapshot().mode();
        let previous = std::mem::replace(&mut self.state.lock().mode, mode);
        if previous == mode {
            return None;
        }

        info!(from = %previous, to = %mode, "Operating mode changed");
        self.observations
            .record(ObservationKind::ModeChanged { from: previous, to: mode });
        if mode < previous {
            return None;
        }

        let items: Batch = self
            .config
            .extended_bootstrap
            .iter()
            .filter_map(|key| self.policy(key, Some(Priority::Low)))
            .collect();
        let items = self.plan(items, None);
        Some(self.scheduler.schedule_batch(items))
    }

    /// Dispatch one host event. Spawned work is detached.
    pub fn handle_event(&self, event: HostEvent) {
        debug!(event = event.name(), "Host event");
        match event {
            HostEvent::Navigate(key) => {
                self.on_route_change(&key);
            }
            HostEvent::Hover(key) => {
                self.on_hover(&key);
            }
            HostEvent::HoverLeave(key) => {
                self.on_hover_leave(&key);
            }
            HostEvent::Idle => {
                self.on_idle();
            }
            HostEvent::Tick => {
                self.on_time_of_day(current_hour());
            }
            HostEvent::VisibilityChanged(_)
            | HostEvent::OnlineChanged(_)
            | HostEvent::NetworkChanged(_) => {
                self.on_environment_change();
            }
        }
    }

    /// Consume host events until the channel closes or `shutdown` fires.
    ///
    /// Also runs the time-of-day trigger on its own interval, starting
    /// immediately.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<HostEvent>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.time_of_day_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Strategy coordinator started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Strategy coordinator shutting down");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("Host event channel closed");
                        break;
                    }
                },

                _ = ticker.tick() => {
                    self.on_time_of_day(current_hour());
                }
            }
        }

        self.cancel_pending_hovers();
    }

    fn cancel_pending_hovers(&self) {
        for (_, (_, token)) in self.state.lock().hovers.drain() {
            token.cancel();
        }
    }

    // =========================================================================
    // Planning
    // =========================================================================

    /// Registered policy for `key`, optionally with its priority replaced.
    fn policy(&self, key: &LoadableKey, priority: Option<Priority>) -> Option<(LoadableKey, PreloadPolicy)> {
        let policy = self.scheduler.policy_for(key)?;
        let policy = match priority {
            Some(priority) => policy.with_priority(priority),
            None => policy,
        };
        Some((key.clone(), policy))
    }

    /// Deduplicate, drop `exclude`, sort by priority and cut to the mode limit.
    fn plan(&self, items: Batch, exclude: Option<&LoadableKey>) -> Batch {
        let mut seen = HashSet::new();
        let mut items: Batch = items
            .into_iter()
            .filter(|(key, _)| Some(key) != exclude && seen.insert(key.clone()))
            .collect();
        items.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority));

        let mode = self.probe.snapshot().mode();
        if let Some(limit) = mode.prefetch_limit() {
            if items.len() > limit {
                debug!(mode = %mode, limit, dropped = items.len() - limit, "Batch trimmed");
                items.truncate(limit);
            }
        }
        items
    }
}

fn current_hour() -> u32 {
    chrono::Local::now().hour()
}
