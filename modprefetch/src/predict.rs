//! Next-key prediction from navigation history.
//!
//! # Algorithm
//!
//! Every consecutive pair `(history[i], history[i + 1])` is a transition.
//! For the current key, each recorded successor is weighted by
//!
//! ```text
//! weight = frequency * (1 + exp(-Δt / decay_window))
//! ```
//!
//! where `Δt` is the time since that transition was last observed. The
//! recency term lies in `(1, 2]`, so frequency dominates and recency breaks
//! near-ties. The result is a heuristic bias for prefetching, not a claim
//! about what the user will do next.
//!
//! The table is rebuilt from the history on every call and never persisted.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::history::Visit;
use crate::registry::LoadableKey;

/// Default recency decay window (24 hours).
pub const DEFAULT_DECAY_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Default number of candidates returned.
pub const DEFAULT_MAX_CANDIDATES: usize = 3;

/// Minimum history length before any prediction is made.
pub const MIN_HISTORY_LEN: usize = 2;

/// Predictor tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorConfig {
    /// Time constant of the recency term. Tunable, not load-bearing.
    pub decay_window: Duration,
    /// Maximum candidates per prediction.
    pub max_candidates: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            decay_window: Duration::from_secs(DEFAULT_DECAY_WINDOW_SECS),
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

/// Statistics for one `from -> to` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionStats {
    pub count: u32,
    pub last_seen: Instant,
}

/// `from -> {to -> stats}`, derived from a history slice.
#[derive(Debug, Default)]
pub struct TransitionFrequencyTable {
    transitions: HashMap<LoadableKey, HashMap<LoadableKey, TransitionStats>>,
}

impl TransitionFrequencyTable {
    /// Build the table from consecutive visit pairs.
    pub fn from_history(history: &[Visit]) -> Self {
        let mut transitions: HashMap<LoadableKey, HashMap<LoadableKey, TransitionStats>> =
            HashMap::new();
        for pair in history.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            transitions
                .entry(from.key.clone())
                .or_default()
                .entry(to.key.clone())
                .and_modify(|stats| {
                    stats.count += 1;
                    stats.last_seen = stats.last_seen.max(to.at);
                })
                .or_insert(TransitionStats {
                    count: 1,
                    last_seen: to.at,
                });
        }
        Self { transitions }
    }

    /// Recorded successors of `from`.
    pub fn successors(
        &self,
        from: &LoadableKey,
    ) -> impl Iterator<Item = (&LoadableKey, &TransitionStats)> + '_ {
        self.transitions.get(from).into_iter().flat_map(|m| m.iter())
    }

    pub fn stats(&self, from: &LoadableKey, to: &LoadableKey) -> Option<TransitionStats> {
        self.transitions.get(from)?.get(to).copied()
    }

    /// Number of distinct `from` keys.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// Frequency and recency weight of a transition.
pub fn transition_weight(stats: &TransitionStats, now: Instant, decay_window: Duration) -> f64 {
    let age = now.saturating_duration_since(stats.last_seen).as_secs_f64();
    let window = decay_window.as_secs_f64().max(f64::EPSILON);
    f64::from(stats.count) * (1.0 + (-age / window).exp())
}

/// Ranks likely next keys from navigation history.
#[derive(Debug, Clone, Default)]
pub struct PredictiveEngine {
    config: PredictorConfig,
}

impl PredictiveEngine {
    pub fn new(config: PredictorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Candidates following the last visit in `history`, most likely first.
    pub fn predict(&self, history: &[Visit]) -> Vec<LoadableKey> {
        self.predict_at(history, Instant::now())
    }

    /// [`predict`](Self::predict) with an explicit evaluation instant.
    pub fn predict_at(&self, history: &[Visit], now: Instant) -> Vec<LoadableKey> {
        match history.last() {
            Some(current) => self.predict_from(history, &current.key, now),
            None => Vec::new(),
        }
    }

    /// Candidates following `current`, using every transition in `history`.
    ///
    /// Returns at most `max_candidates` distinct keys, never `current`
    /// itself. Fewer than two visits yield no candidates.
    pub fn predict_from(
        &self,
        history: &[Visit],
        current: &LoadableKey,
        now: Instant,
    ) -> Vec<LoadableKey> {
        if history.len() < MIN_HISTORY_LEN {
            return Vec::new();
        }

        let table = TransitionFrequencyTable::from_history(history);
        let mut ranked: Vec<(&LoadableKey, &TransitionStats, f64)> = table
            .successors(current)
            .filter(|(to, _)| *to != current)
            .map(|(to, stats)| (to, stats, transition_weight(stats, now, self.config.decay_window)))
            .collect();

        // Weight, then most recently observed, then key for determinism.
        ranked.sort_by(|(ka, sa, wa), (kb, sb, wb)| {
            wb.partial_cmp(wa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| sb.last_seen.cmp(&sa.last_seen))
                .then_with(|| ka.cmp(kb))
        });

        ranked
            .into_iter()
            .take(self.config.max_candidates)
            .map(|(key, _, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn history(keys: &[&str], start: Instant, step: Duration) -> Vec<Visit> {
        keys.iter()
            .enumerate()
            .map(|(i, key)| Visit::new(*key, start + step * i as u32))
            .collect()
    }

    #[test]
    fn test_frequency_ranks_first() {
        let start = Instant::now();
        let visits = history(&["X", "Y", "X", "Y", "X", "Z"], start, Duration::from_secs(60));
        let now = start + Duration::from_secs(600);

        let engine = PredictiveEngine::default();
        let ranked = engine.predict_from(&visits, &"X".into(), now);

        assert_eq!(ranked, vec![LoadableKey::from("Y"), LoadableKey::from("Z")]);
    }

    #[test]
    fn test_predict_uses_last_visit() {
        let start = Instant::now();
        let visits = history(&["X", "Y", "X", "Y", "X", "Z", "X"], start, Duration::from_secs(60));
        let now = start + Duration::from_secs(600);

        let ranked = PredictiveEngine::default().predict_at(&visits, now);

        assert_eq!(ranked, vec![LoadableKey::from("Y"), LoadableKey::from("Z")]);
    }

    #[test]
    fn test_needs_two_visits() {
        let engine = PredictiveEngine::default();
        let now = Instant::now();
        assert!(engine.predict_at(&[], now).is_empty());
        assert!(engine.predict_at(&[Visit::new("X", now)], now).is_empty());
    }

    #[test]
    fn test_unknown_current_has_no_candidates() {
        let start = Instant::now();
        let visits = history(&["A", "B", "C"], start, Duration::from_secs(1));
        // C has never been followed by anything.
        assert!(PredictiveEngine::default().predict_at(&visits, start).is_empty());
    }

    #[test]
    fn test_recency_breaks_equal_frequency() {
        let start = Instant::now();
        // X->B observed 10 hours after X->A
        let visits = vec![
            Visit::new("X", start),
            Visit::new("A", start + Duration::from_secs(1)),
            Visit::new("X", start + Duration::from_secs(36_000)),
            Visit::new("B", start + Duration::from_secs(36_001)),
        ];
        let now = start + Duration::from_secs(36_002);

        let ranked = PredictiveEngine::default().predict_from(&visits, &"X".into(), now);
        assert_eq!(ranked, vec![LoadableKey::from("B"), LoadableKey::from("A")]);
    }

    #[test]
    fn test_self_transition_excluded() {
        let start = Instant::now();
        let visits = history(&["X", "X", "X", "Y"], start, Duration::from_secs(1));
        let ranked = PredictiveEngine::default().predict_from(&visits, &"X".into(), start);
        assert_eq!(ranked, vec![LoadableKey::from("Y")]);
    }

    #[test]
    fn test_weight_formula() {
        let now = Instant::now();
        let fresh = TransitionStats {
            count: 2,
            last_seen: now,
        };
        let day = Duration::from_secs(DEFAULT_DECAY_WINDOW_SECS);
        assert!((transition_weight(&fresh, now, day) - 4.0).abs() < 1e-9);

        let old = TransitionStats {
            count: 1,
            last_seen: now,
        };
        let weight = transition_weight(&old, now + day, day);
        assert!((weight - (1.0 + (-1.0f64).exp())).abs() < 1e-9);
    }

    #[test]
    fn test_table_counts_pairs() {
        let start = Instant::now();
        let visits = history(&["X", "Y", "X", "Y"], start, Duration::from_secs(1));
        let table = TransitionFrequencyTable::from_history(&visits);

        assert_eq!(table.stats(&"X".into(), &"Y".into()).unwrap().count, 2);
        assert_eq!(table.stats(&"Y".into(), &"X".into()).unwrap().count, 1);
        assert_eq!(table.len(), 2);
    }

    proptest! {
        /// Predictions are bounded, distinct, never the current key, and drawn from history.
        #[test]
        fn prop_prediction_invariants(keys in proptest::collection::vec("[a-f]", 0..30)) {
            let start = Instant::now();
            let visits: Vec<Visit> = keys
                .iter()
                .enumerate()
                .map(|(i, k)| Visit::new(k.as_str(), start + Duration::from_secs(i as u64)))
                .collect();
            let now = start + Duration::from_secs(keys.len() as u64);

            let ranked = PredictiveEngine::default().predict_at(&visits, now);

            prop_assert!(ranked.len() <= DEFAULT_MAX_CANDIDATES);
            let mut distinct = ranked.clone();
            distinct.sort();
            distinct.dedup();
            prop_assert_eq!(distinct.len(), ranked.len());
            if let Some(current) = visits.last() {
                prop_assert!(!ranked.contains(&current.key));
            }
            for key in &ranked {
                prop_assert!(keys.iter().any(|k| k.as_str() == key.as_str()));
            }
        }
    }
}
