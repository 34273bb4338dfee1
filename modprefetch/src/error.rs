//! Error types for the preload engine.
//!
//! Loaders report [`LoadError`]; the engine surfaces [`PreloadError`] once its
//! retry budget is spent. Both are `Clone` because a single shared load result
//! is handed to every caller that joined the same in-flight operation.

use thiserror::Error;

use crate::registry::LoadableKey;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, PreloadError>;

/// Failure reported by a single loader invocation.
///
/// All variants are retried up to the same bound: the engine has no way to
/// tell a malformed unit from a flaky network without inspecting the payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Network-level failure (connection reset, 5xx, offline).
    #[error("transient load failure: {0}")]
    Transient(String),

    /// The unit was fetched but could not be evaluated (parse failure, bad chunk).
    #[error("permanent load failure: {0}")]
    Permanent(String),

    /// The attempt exceeded the per-attempt ceiling.
    #[error("load attempt timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl LoadError {
    /// Create a transient error from any displayable cause.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Create a permanent error from any displayable cause.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// Whether the retry loop may attempt the load again.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreloadError {
    /// The key has no entry in the registry.
    #[error("unknown loadable key: {0}")]
    UnknownKey(LoadableKey),

    /// Every attempt failed; `source` is the last loader error.
    #[error("loading {key} failed after {attempts} attempt(s): {source}")]
    LoadFailed {
        key: LoadableKey,
        attempts: u32,
        #[source]
        source: LoadError,
    },

    /// The environment gate refused the load before any attempt was made.
    ///
    /// Not a failure: the scheduler maps this to "nothing issued".
    #[error("load of {key} skipped by policy: {reason}")]
    PolicySkipped { key: LoadableKey, reason: SkipReason },
}

impl PreloadError {
    /// The key this error refers to.
    pub fn key(&self) -> &LoadableKey {
        match self {
            Self::UnknownKey(key) => key,
            Self::LoadFailed { key, .. } => key,
            Self::PolicySkipped { key, .. } => key,
        }
    }

    /// Whether this is a policy skip rather than a real failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::PolicySkipped { .. })
    }
}

/// Why a request was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum SkipReason {
    /// The policy predicate returned false.
    Predicate,
    /// Data saver is on and the request is low priority.
    DataSaver,
    /// The connection is 2g/slow-2g and the request is low priority.
    SlowNetwork,
    /// The page is hidden; speculative work waits.
    PageHidden,
    /// The host reports no connectivity.
    Offline,
    /// A scheduled-but-unissued request was cancelled.
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::Predicate => "predicate rejected",
            SkipReason::DataSaver => "data saver enabled",
            SkipReason::SlowNetwork => "slow network",
            SkipReason::PageHidden => "page hidden",
            SkipReason::Offline => "offline",
            SkipReason::Cancelled => "cancelled before issue",
        };
        f.write_str(s)
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the configuration file.
    #[error("failed to write config {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid INI.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value could not be converted to the expected type.
    #[error("invalid value '{value}' for {section}.{key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    /// No platform configuration directory could be determined.
    #[error("could not determine configuration directory")]
    NoConfigDir,
}

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Errors raised while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The same key was registered twice.
    #[error("duplicate loadable key: {0}")]
    DuplicateKey(LoadableKey),

    /// A related-keys table references a key that was never registered.
    #[error("{from} lists unknown related key {to}")]
    UnknownRelatedKey { from: LoadableKey, to: LoadableKey },

    /// A bootstrap or time-of-day list references a key that was never registered.
    #[error("{list} references unknown key {key}")]
    UnknownListedKey { list: String, key: LoadableKey },
}

/// Errors raised while wiring a [`PreloadEngine`](crate::PreloadEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
