//! Engine configuration and its INI file form.
//!
//! [`PreloadConfig`] aggregates every component's settings. It can be built
//! in code with the `with_*` setters or loaded from an INI file; missing
//! sections and keys keep their defaults.
//!
//! # File Format
//!
//! ```ini
//! [retry]
//! max_retries = 3
//! base_delay_ms = 1000
//! slow_network_base_delay_ms = 2000
//!
//! [memory]
//! threshold = 0.8
//!
//! [strategy]
//! hover_debounce_ms = 200
//! bootstrap = home, patients
//!
//! [related]
//! home = patients, billing
//!
//! [time_bucket.business]
//! start_hour = 9
//! end_hour = 17
//! keys = billing, reports
//!
//! [logging]
//! filter = modprefetch=debug
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use crate::error::ConfigError;
use crate::history::HistoryConfig;
use crate::logging::LoggingConfig;
use crate::memory_monitor::MemoryMonitorConfig;
use crate::predict::PredictorConfig;
use crate::registry::LoadableKey;
use crate::retry::RetryPolicy;
use crate::strategy::{StrategyConfig, TimeBucket};
use crate::telemetry::DEFAULT_OBSERVATION_CAPACITY;

/// Directory name under the platform config directory.
pub const CONFIG_DIR_NAME: &str = "modprefetch";

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "config.ini";

const TIME_BUCKET_PREFIX: &str = "time_bucket.";

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Observations retained in the side-channel log.
    pub observation_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            observation_capacity: DEFAULT_OBSERVATION_CAPACITY,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadConfig {
    pub retry: RetryPolicy,
    pub history: HistoryConfig,
    pub predictor: PredictorConfig,
    pub memory: MemoryMonitorConfig,
    pub strategy: StrategyConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

impl PreloadConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    pub fn with_predictor(mut self, predictor: PredictorConfig) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_memory(mut self, memory: MemoryMonitorConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// `<config dir>/modprefetch/config.ini`.
    ///
    /// # Errors
    ///
    /// `NoConfigDir` if the platform has no configuration directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default path, or defaults if the file does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from an INI file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = Section::of(ini, "retry") {
            let retry = &mut config.retry;
            section.set("max_retries", &mut retry.max_retries)?;
            section.set_millis("base_delay_ms", &mut retry.base_delay)?;
            section.set_millis(
                "slow_network_base_delay_ms",
                &mut retry.slow_network_base_delay,
            )?;
            section.set("multiplier", &mut retry.multiplier)?;
            section.check("multiplier", retry.multiplier >= 1.0)?;
            section.set_secs("max_delay_secs", &mut retry.max_delay)?;
            section.set_secs("attempt_timeout_secs", &mut retry.attempt_timeout)?;
            section.set_millis("slow_load_threshold_ms", &mut retry.slow_load_threshold)?;
        }

        if let Some(section) = Section::of(ini, "history") {
            section.set("capacity", &mut config.history.capacity)?;
            section.check("capacity", config.history.capacity > 0)?;
        }

        if let Some(section) = Section::of(ini, "predictor") {
            section.set_secs("decay_window_secs", &mut config.predictor.decay_window)?;
            section.set("max_candidates", &mut config.predictor.max_candidates)?;
        }

        if let Some(section) = Section::of(ini, "memory") {
            let memory = &mut config.memory;
            section.set_secs("interval_secs", &mut memory.interval)?;
            section.check("interval_secs", !memory.interval.is_zero())?;
            section.set("threshold", &mut memory.threshold)?;
            section.check("threshold", (0.0..=1.0).contains(&memory.threshold))?;
            section.set("eviction_fraction", &mut memory.eviction_fraction)?;
            section.check(
                "eviction_fraction",
                (0.0..=1.0).contains(&memory.eviction_fraction),
            )?;
            section.set_secs("session_window_secs", &mut memory.session_window)?;
        }

        if let Some(section) = Section::of(ini, "strategy") {
            let strategy = &mut config.strategy;
            section.set_millis("hover_debounce_ms", &mut strategy.hover_debounce)?;
            section.set_secs(
                "time_of_day_interval_secs",
                &mut strategy.time_of_day_interval,
            )?;
            section.check(
                "time_of_day_interval_secs",
                !strategy.time_of_day_interval.is_zero(),
            )?;
            if let Some(keys) = section.get("bootstrap") {
                strategy.bootstrap = parse_key_list(keys);
            }
            if let Some(keys) = section.get("extended_bootstrap") {
                strategy.extended_bootstrap = parse_key_list(keys);
            }
        }

        if let Some(section) = ini.section(Some("related")) {
            for (from, targets) in section.iter() {
                config
                    .strategy
                    .related
                    .insert(LoadableKey::new(from), parse_key_list(targets));
            }
        }

        for (name, props) in ini.iter() {
            let Some(bucket) = name.and_then(|n| n.strip_prefix(TIME_BUCKET_PREFIX)) else {
                continue;
            };
            let section = Section {
                name: name.unwrap_or_default(),
                props,
            };
            let mut start_hour = 0u32;
            let mut end_hour = 0u32;
            section.set("start_hour", &mut start_hour)?;
            section.set("end_hour", &mut end_hour)?;
            section.check("start_hour", start_hour < 24)?;
            section.check("end_hour", end_hour < 24)?;
            let keys = section.get("keys").map(parse_key_list).unwrap_or_default();
            config
                .strategy
                .time_buckets
                .push(TimeBucket::new(bucket, start_hour, end_hour, keys));
        }

        if let Some(section) = Section::of(ini, "telemetry") {
            section.set(
                "observation_capacity",
                &mut config.telemetry.observation_capacity,
            )?;
        }

        if let Some(section) = Section::of(ini, "logging") {
            if let Some(filter) = section.get("filter") {
                config.logging.filter = filter.to_string();
            }
            if let Some(file) = section.get("file").filter(|f| !f.is_empty()) {
                config.logging.file = Some(PathBuf::from(file));
            }
            section.set("ansi", &mut config.logging.ansi)?;
        }

        Ok(config)
    }

    /// Check values that built-in defaults and builders cannot rule out.
    ///
    /// Parsing already enforces these; this covers configs assembled in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let require = |ok: bool, section: &str, key: &str, value: String| {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    section: section.to_string(),
                    key: key.to_string(),
                    value,
                })
            }
        };
        let memory = &self.memory;
        require(
            !memory.interval.is_zero(),
            "memory",
            "interval_secs",
            memory.interval.as_secs().to_string(),
        )?;
        require(
            (0.0..=1.0).contains(&memory.threshold),
            "memory",
            "threshold",
            memory.threshold.to_string(),
        )?;
        require(
            (0.0..=1.0).contains(&memory.eviction_fraction),
            "memory",
            "eviction_fraction",
            memory.eviction_fraction.to_string(),
        )?;
        require(
            !self.strategy.time_of_day_interval.is_zero(),
            "strategy",
            "time_of_day_interval_secs",
            self.strategy.time_of_day_interval.as_secs().to_string(),
        )?;
        require(
            self.history.capacity > 0,
            "history",
            "capacity",
            self.history.capacity.to_string(),
        )?;
        require(
            self.retry.multiplier >= 1.0,
            "retry",
            "multiplier",
            self.retry.multiplier.to_string(),
        )
    }

    /// Render as INI.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        let retry = &self.retry;
        ini.with_section(Some("retry"))
            .set("max_retries", retry.max_retries.to_string())
            .set("base_delay_ms", millis(retry.base_delay))
            .set(
                "slow_network_base_delay_ms",
                millis(retry.slow_network_base_delay),
            )
            .set("multiplier", retry.multiplier.to_string())
            .set("max_delay_secs", retry.max_delay.as_secs().to_string())
            .set(
                "attempt_timeout_secs",
                retry.attempt_timeout.as_secs().to_string(),
            )
            .set("slow_load_threshold_ms", millis(retry.slow_load_threshold));
        ini.with_section(Some("history"))
            .set("capacity", self.history.capacity.to_string());
        ini.with_section(Some("predictor"))
            .set(
                "decay_window_secs",
                self.predictor.decay_window.as_secs().to_string(),
            )
            .set("max_candidates", self.predictor.max_candidates.to_string());
        ini.with_section(Some("memory"))
            .set("interval_secs", self.memory.interval.as_secs().to_string())
            .set("threshold", self.memory.threshold.to_string())
            .set(
                "eviction_fraction",
                self.memory.eviction_fraction.to_string(),
            )
            .set(
                "session_window_secs",
                self.memory.session_window.as_secs().to_string(),
            );

        let strategy = &self.strategy;
        ini.with_section(Some("strategy"))
            .set("hover_debounce_ms", millis(strategy.hover_debounce))
            .set(
                "time_of_day_interval_secs",
                strategy.time_of_day_interval.as_secs().to_string(),
            )
            .set("bootstrap", join_keys(&strategy.bootstrap))
            .set("extended_bootstrap", join_keys(&strategy.extended_bootstrap));

        let mut related: Vec<_> = strategy.related.iter().collect();
        related.sort_by(|a, b| a.0.cmp(b.0));
        for (from, targets) in related {
            ini.with_section(Some("related"))
                .set(from.as_str(), join_keys(targets));
        }
        for bucket in &strategy.time_buckets {
            ini.with_section(Some(format!("{}{}", TIME_BUCKET_PREFIX, bucket.name)))
                .set("start_hour", bucket.start_hour.to_string())
                .set("end_hour", bucket.end_hour.to_string())
                .set("keys", join_keys(&bucket.keys));
        }

        ini.with_section(Some("telemetry")).set(
            "observation_capacity",
            self.telemetry.observation_capacity.to_string(),
        );
        ini.with_section(Some("logging"))
            .set("filter", self.logging.filter.as_str())
            .set("ansi", self.logging.ansi.to_string());
        if let Some(file) = &self.logging.file {
            ini.with_section(Some("logging"))
                .set("file", file.display().to_string());
        }
        ini
    }

    /// Render as INI text.
    pub fn to_ini_string(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.to_ini().write_to(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.to_ini().write_to_file(path).map_err(write_err)
    }
}

/// One INI section with typed accessors.
struct Section<'a> {
    name: &'a str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn of(ini: &'a Ini, name: &'a str) -> Option<Self> {
        ini.section(Some(name)).map(|props| Self { name, props })
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.props.get(key).map(str::trim)
    }

    fn invalid(&self, key: &str, value: &str) -> ConfigError {
        ConfigError::InvalidValue {
            section: self.name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Parse `key` into `target` if present.
    fn set<T: FromStr>(&self, key: &str, target: &mut T) -> Result<(), ConfigError> {
        if let Some(raw) = self.get(key) {
            *target = raw.parse().map_err(|_| self.invalid(key, raw))?;
        }
        Ok(())
    }

    fn set_millis(&self, key: &str, target: &mut Duration) -> Result<(), ConfigError> {
        let mut ms = target.as_millis() as u64;
        self.set(key, &mut ms)?;
        *target = Duration::from_millis(ms);
        Ok(())
    }

    fn set_secs(&self, key: &str, target: &mut Duration) -> Result<(), ConfigError> {
        let mut secs = target.as_secs();
        self.set(key, &mut secs)?;
        *target = Duration::from_secs(secs);
        Ok(())
    }

    /// Reject the current value of `key` unless `ok`.
    fn check(&self, key: &str, ok: bool) -> Result<(), ConfigError> {
        if ok {
            return Ok(());
        }
        Err(self.invalid(key, self.get(key).unwrap_or_default()))
    }
}

fn parse_key_list(raw: &str) -> Vec<LoadableKey> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(LoadableKey::new)
        .collect()
}

fn join_keys(keys: &[LoadableKey]) -> String {
    keys.iter()
        .map(LoadableKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn millis(d: Duration) -> String {
    (d.as_millis() as u64).to_string()
}
