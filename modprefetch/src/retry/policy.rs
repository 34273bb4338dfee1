//! Retry and backoff policy for load attempts.
//!
//! The delay before retry `n` (0-based: the attempt that just failed) is
//! `base * multiplier^n`, capped at `max_delay`. The base depends on the
//! network class observed when the failure happened: slow connections back
//! off from a larger base.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use modprefetch::environment::NetworkClass;
//! use modprefetch::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.delay_for_attempt(0, NetworkClass::FourG), Some(Duration::from_millis(1000)));
//! assert_eq!(policy.delay_for_attempt(1, NetworkClass::FourG), Some(Duration::from_millis(1500)));
//! assert_eq!(policy.delay_for_attempt(0, NetworkClass::Slow2G), Some(Duration::from_millis(2000)));
//! assert_eq!(policy.delay_for_attempt(3, NetworkClass::FourG), None);
//! ```

use std::time::Duration;

use crate::environment::NetworkClass;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base on 3g/4g (1s).
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default backoff base on 2g/slow-2g (2s).
pub const DEFAULT_SLOW_NETWORK_BASE_DELAY_MS: u64 = 2000;

/// Default multiplier applied per attempt.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.5;

/// Default cap on a single backoff delay (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default ceiling for one load attempt (15 seconds).
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 15;

/// Default duration above which a load is reported as slow (2 seconds).
pub const DEFAULT_SLOW_LOAD_THRESHOLD_MS: u64 = 2000;

/// Bounded retry with network-aware exponential backoff. No jitter.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a load runs at most `max_retries + 1` times.
    pub max_retries: u32,

    /// Backoff base on 3g/4g.
    pub base_delay: Duration,

    /// Backoff base on 2g/slow-2g.
    pub slow_network_base_delay: Duration,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Cap on any single delay.
    pub max_delay: Duration,

    /// Ceiling for one attempt; exceeding it counts as a failure.
    pub attempt_timeout: Duration,

    /// Attempts slower than this emit a slow-load observation.
    pub slow_load_threshold: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            slow_network_base_delay: Duration::from_millis(DEFAULT_SLOW_NETWORK_BASE_DELAY_MS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            slow_load_threshold: Duration::from_millis(DEFAULT_SLOW_LOAD_THRESHOLD_MS),
        }
    }
}

impl RetryPolicy {
    /// Default policy with a different retry budget.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    /// Set the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set both backoff bases.
    pub fn with_base_delays(mut self, base: Duration, slow_network_base: Duration) -> Self {
        self.base_delay = base;
        self.slow_network_base_delay = slow_network_base;
        self
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff base for a network class.
    pub fn base_for(&self, network: NetworkClass) -> Duration {
        if network.is_slow() {
            self.slow_network_base_delay
        } else {
            self.base_delay
        }
    }

    /// Delay to wait after attempt `attempt` (0-based) failed.
    ///
    /// Returns `None` once the retry budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32, network: NetworkClass) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = self.multiplier.powi(attempt as i32);
        let delay_ms = self.base_for(network).as_millis() as f64 * factor;
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.multiplier, DEFAULT_BACKOFF_MULTIPLIER);
    }

    #[test]
    fn test_exponential_growth() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(0, NetworkClass::ThreeG),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(
            policy.delay_for_attempt(1, NetworkClass::ThreeG),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            policy.delay_for_attempt(2, NetworkClass::ThreeG),
            Some(Duration::from_millis(2250))
        );
        assert_eq!(policy.delay_for_attempt(3, NetworkClass::ThreeG), None);
    }

    #[test]
    fn test_slow_network_base() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(0, NetworkClass::TwoG),
            Some(Duration::from_millis(2000))
        );
        assert_eq!(
            policy.delay_for_attempt(1, NetworkClass::Slow2G),
            Some(Duration::from_millis(3000))
        );
    }

    #[test]
    fn test_respects_max_delay() {
        let policy = RetryPolicy {
            max_retries: 20,
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.delay_for_attempt(15, NetworkClass::FourG),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_for_attempt(0, NetworkClass::FourG), None);
    }

    #[test]
    fn test_builders() {
        let policy = RetryPolicy::with_max_retries(5)
            .with_attempt_timeout(Duration::from_secs(2))
            .with_base_delays(Duration::from_millis(10), Duration::from_millis(20));
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(2));
        assert_eq!(policy.base_for(NetworkClass::FourG), Duration::from_millis(10));
        assert_eq!(policy.base_for(NetworkClass::TwoG), Duration::from_millis(20));
    }
}
