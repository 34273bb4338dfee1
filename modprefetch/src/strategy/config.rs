//! Strategy trigger configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::RegistryError;
use crate::registry::{LoadableKey, LoadableRegistry};

/// Default hover debounce (200 milliseconds).
pub const DEFAULT_HOVER_DEBOUNCE_MS: u64 = 200;

/// Default time-of-day recompute interval (1 hour).
pub const DEFAULT_TIME_OF_DAY_INTERVAL_SECS: u64 = 3600;

/// A range of hours with its own prefetch set.
///
/// Covers `[start_hour, end_hour)`; a bucket with `start_hour > end_hour`
/// wraps past midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBucket {
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub keys: Vec<LoadableKey>,
}

impl TimeBucket {
    pub fn new(
        name: impl Into<String>,
        start_hour: u32,
        end_hour: u32,
        keys: impl IntoIterator<Item = impl Into<LoadableKey>>,
    ) -> Self {
        Self {
            name: name.into(),
            start_hour: start_hour % 24,
            end_hour: end_hour % 24,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `hour` (0-23) falls in this bucket.
    pub fn contains(&self, hour: u32) -> bool {
        let hour = hour % 24;
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Which keys each trigger schedules, and its timing.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    /// Quiet time after a hover before its key is scheduled.
    pub hover_debounce: Duration,

    /// How often the time-of-day bucket is recomputed.
    pub time_of_day_interval: Duration,

    /// Keys scheduled when a key is entered.
    pub related: HashMap<LoadableKey, Vec<LoadableKey>>,

    /// Keys scheduled on the first idle opportunity.
    pub bootstrap: Vec<LoadableKey>,

    /// Keys scheduled when the operating mode improves.
    pub extended_bootstrap: Vec<LoadableKey>,

    /// Hour-of-day buckets; the first matching bucket wins.
    pub time_buckets: Vec<TimeBucket>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            hover_debounce: Duration::from_millis(DEFAULT_HOVER_DEBOUNCE_MS),
            time_of_day_interval: Duration::from_secs(DEFAULT_TIME_OF_DAY_INTERVAL_SECS),
            related: HashMap::new(),
            bootstrap: Vec::new(),
            extended_bootstrap: Vec::new(),
            time_buckets: Vec::new(),
        }
    }
}

impl StrategyConfig {
    pub fn with_hover_debounce(mut self, debounce: Duration) -> Self {
        self.hover_debounce = debounce;
        self
    }

    pub fn with_time_of_day_interval(mut self, interval: Duration) -> Self {
        self.time_of_day_interval = interval;
        self
    }

    /// Set the related keys for `key`, replacing any previous list.
    pub fn with_related(
        mut self,
        key: impl Into<LoadableKey>,
        related: impl IntoIterator<Item = impl Into<LoadableKey>>,
    ) -> Self {
        self.related
            .insert(key.into(), related.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_bootstrap(mut self, keys: impl IntoIterator<Item = impl Into<LoadableKey>>) -> Self {
        self.bootstrap = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extended_bootstrap(
        mut self,
        keys: impl IntoIterator<Item = impl Into<LoadableKey>>,
    ) -> Self {
        self.extended_bootstrap = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_time_bucket(mut self, bucket: TimeBucket) -> Self {
        self.time_buckets.push(bucket);
        self
    }

    /// Related keys for `key`; empty if none are configured.
    pub fn related_to(&self, key: &LoadableKey) -> &[LoadableKey] {
        self.related.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Index of the bucket covering `hour`, if any.
    pub fn bucket_for_hour(&self, hour: u32) -> Option<usize> {
        self.time_buckets.iter().position(|b| b.contains(hour))
    }

    /// Check every configured key against `registry`.
    ///
    /// # Errors
    ///
    /// The first unknown key found, related tables first.
    pub fn validate(&self, registry: &LoadableRegistry) -> Result<(), RegistryError> {
        let mut related: Vec<_> = self.related.iter().collect();
        related.sort_by(|a, b| a.0.cmp(b.0));
        for (from, targets) in related {
            for to in std::iter::once(from).chain(targets) {
                if !registry.contains(to) {
                    return Err(RegistryError::UnknownRelatedKey {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        let lists = [
            ("bootstrap".to_string(), &self.bootstrap),
            ("extended_bootstrap".to_string(), &self.extended_bootstrap),
        ]
        .into_iter()
        .chain(
            self.time_buckets
                .iter()
                .map(|b| (format!("time bucket '{}'", b.name), &b.keys)),
        );
        for (list, keys) in lists {
            if let Some(key) = keys.iter().find(|k| !registry.contains(k)) {
                return Err(RegistryError::UnknownListedKey {
                    list,
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::registry::PreloadPolicy;
    use bytes::Bytes;

    fn registry(keys: &[&str]) -> LoadableRegistry {
        keys.iter()
            .fold(LoadableRegistry::builder(), |b, key| {
                b.register(
                    *key,
                    || async { Ok::<_, LoadError>(Bytes::new()) },
                    PreloadPolicy::low(),
                )
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_bucket_contains() {
        let business = TimeBucket::new("business", 9, 17, ["billing"]);
        assert!(business.contains(9));
        assert!(business.contains(16));
        assert!(!business.contains(17));

        let night = TimeBucket::new("night", 22, 6, ["triage"]);
        assert!(night.contains(23));
        assert!(night.contains(0));
        assert!(night.contains(5));
        assert!(!night.contains(12));
    }

    #[test]
    fn test_first_matching_bucket_wins() {
        let config = StrategyConfig::default()
            .with_time_bucket(TimeBucket::new("business", 9, 17, ["billing"]))
            .with_time_bucket(TimeBucket::new("day", 6, 20, ["home"]));
        assert_eq!(config.bucket_for_hour(10), Some(0));
        assert_eq!(config.bucket_for_hour(18), Some(1));
        assert_eq!(config.bucket_for_hour(3), None);
    }

    #[test]
    fn test_validate_accepts_known_keys() {
        let config = StrategyConfig::default()
            .with_related("home", ["patients"])
            .with_bootstrap(["home"])
            .with_time_bucket(TimeBucket::new("evening", 18, 23, ["patients"]));
        assert!(config.validate(&registry(&["home", "patients"])).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_related() {
        let config = StrategyConfig::default().with_related("home", ["ghost"]);
        assert_eq!(
            config.validate(&registry(&["home"])),
            Err(RegistryError::UnknownRelatedKey {
                from: "home".into(),
                to: "ghost".into()
            })
        );
    }

    #[test]
    fn test_validate_rejects_unknown_bucket_key() {
        let config =
            StrategyConfig::default().with_time_bucket(TimeBucket::new("night", 22, 6, ["ghost"]));
        match config.validate(&registry(&["home"])) {
            Err(RegistryError::UnknownListedKey { list, key }) => {
                assert!(list.contains("night"));
                assert_eq!(key, LoadableKey::from("ghost"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_related_to_defaults_empty() {
        assert!(StrategyConfig::default().related_to(&"x".into()).is_empty());
    }
}
