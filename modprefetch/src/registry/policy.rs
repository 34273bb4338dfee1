//! Per-key preload policy and priority classes.
//!
//! # Policy Types
//!
//! - [`Priority`]: scheduling class (high before medium before low)
//! - [`PreloadPolicy`]: priority plus optional delay, environment predicate and
//!   the network-aware flag
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use modprefetch::registry::{PreloadPolicy, Priority};
//!
//! // Background prefetch that yields for two seconds and respects data saver
//! let policy = PreloadPolicy::low()
//!     .with_delay(Duration::from_secs(2))
//!     .network_aware();
//!
//! assert_eq!(policy.priority, Priority::Low);
//! assert!(policy.network_aware);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::environment::EnvironmentSnapshot;

/// Scheduling class of a load request.
///
/// Ordering is `Low < Medium < High`, so sorting descending yields the
/// issue order of a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum Priority {
    /// Speculative background work; the first to be gated on constrained networks.
    Low,
    /// Likely-soon work such as hover intent.
    Medium,
    /// Needed now or very nearly now; issued as a strict sequence.
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Low
    }
}

impl Priority {
    /// Parse a priority name as written in configuration files.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment gate evaluated before a scheduled request is issued.
pub type Predicate = Arc<dyn Fn(&EnvironmentSnapshot) -> bool + Send + Sync>;

/// How and when a key may be loaded speculatively.
///
/// Supplied at registration time and immutable afterwards; the scheduler looks
/// it up by key. Consumer-driven loads (`ensure_loaded`) ignore everything but
/// the retry budget.
#[derive(Clone, Default)]
pub struct PreloadPolicy {
    /// Scheduling class.
    pub priority: Priority,

    /// Wait this long before issuing the request.
    ///
    /// Lets low and medium prefetches yield to urgent work without
    /// preemption. The gate is re-evaluated after the delay.
    pub delay: Option<Duration>,

    /// Optional environment gate; `false` skips the request.
    pub predicate: Option<Predicate>,

    /// Skip low-priority loads on data-saver or 2g/slow-2g connections.
    pub network_aware: bool,
}

impl fmt::Debug for PreloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadPolicy")
            .field("priority", &self.priority)
            .field("delay", &self.delay)
            .field("has_predicate", &self.predicate.is_some())
            .field("network_aware", &self.network_aware)
            .finish()
    }
}

impl PreloadPolicy {
    /// Policy with the given priority and no gating.
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// High priority, ungated.
    pub fn high() -> Self {
        Self::new(Priority::High)
    }

    /// Medium priority, ungated.
    pub fn medium() -> Self {
        Self::new(Priority::Medium)
    }

    /// Low priority, ungated.
    pub fn low() -> Self {
        Self::new(Priority::Low)
    }

    /// Replace the priority, keeping every other setting.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Delay issuing the request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Gate the request on an environment predicate.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&EnvironmentSnapshot) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Enable the network-aware gate.
    pub fn network_aware(mut self) -> Self {
        self.network_aware = true;
        self
    }

    /// Evaluate the predicate, treating "no predicate" as pass.
    pub fn predicate_allows(&self, env: &EnvironmentSnapshot) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::NetworkClass;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::default(), Priority::Low);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(Priority::parse("HIGH"), Some(Priority::High));
        assert_eq!(Priority::parse(" medium "), Some(Priority::Medium));
        assert_eq!(Priority::parse("urgent"), None);
        assert_eq!(format!("{}", Priority::Low), "low");
    }

    #[test]
    fn test_policy_builders() {
        let policy = PreloadPolicy::medium()
            .with_delay(Duration::from_millis(500))
            .network_aware();
        assert_eq!(policy.priority, Priority::Medium);
        assert_eq!(policy.delay, Some(Duration::from_millis(500)));
        assert!(policy.network_aware);
        assert!(policy.predicate.is_none());
    }

    #[test]
    fn test_predicate_defaults_to_allow() {
        let env = EnvironmentSnapshot::default();
        assert!(PreloadPolicy::low().predicate_allows(&env));
    }

    #[test]
    fn test_predicate_sees_environment() {
        let policy =
            PreloadPolicy::low().with_predicate(|env| env.network == NetworkClass::FourG);

        let fast = EnvironmentSnapshot::default();
        let slow = EnvironmentSnapshot {
            network: NetworkClass::ThreeG,
            ..EnvironmentSnapshot::default()
        };
        assert!(policy.predicate_allows(&fast));
        assert!(!policy.predicate_allows(&slow));
    }

    #[test]
    fn test_policy_debug_hides_closure() {
        let policy = PreloadPolicy::high().with_predicate(|_| true);
        let debug = format!("{:?}", policy);
        assert!(debug.contains("has_predicate: true"));
    }
}
