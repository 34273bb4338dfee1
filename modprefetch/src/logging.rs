//! Tracing subscriber setup.
//!
//! Installs a console layer and, when a log file is configured, a
//! non-blocking file layer. `RUST_LOG` overrides the configured filter.
//! With the `profiling` feature a Chrome trace layer can be added as well.

use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::LoggingError;

/// Default filter directive.
pub const DEFAULT_LOG_FILTER: &str = "modprefetch=info";

/// Default log file name when only a directory is given.
pub const DEFAULT_LOG_FILE_NAME: &str = "modprefetch.log";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,

    /// Also write logs to this file.
    pub file: Option<PathBuf>,

    /// ANSI colours on the console layer.
    pub ansi: bool,

    /// Chrome trace output (requires the `profiling` feature).
    pub chrome_trace: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            file: None,
            ansi: true,
            chrome_trace: None,
        }
    }
}

impl LoggingConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Keeps background writers alive. Dropping it flushes pending output.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
    #[cfg(feature = "profiling")]
    _chrome: Option<tracing_chrome::FlushGuard>,
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// - `CreateDir` if the log file's directory cannot be created
/// - `Install` if a global subscriber is already set
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let console = fmt::layer()
        .with_target(true)
        .with_ansi(config.ansi)
        .with_timer(LocalTime::new(Rfc3339));

    let (file_layer, file_guard) = match &config.file {
        Some(path) => {
            let (dir, name) = split_log_path(path);
            std::fs::create_dir_all(&dir).map_err(|source| LoggingError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, name));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(LocalTime::new(Rfc3339))
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer);

    #[cfg(feature = "profiling")]
    let (registry, chrome_guard) = {
        let (layer, guard) = match &config.chrome_trace {
            Some(path) => {
                let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
                    .file(path)
                    .include_args(true)
                    .build();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };
        (registry.with(layer), guard)
    };

    registry
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))?;

    Ok(LoggingGuard {
        _file: file_guard,
        #[cfg(feature = "profiling")]
        _chrome: chrome_guard,
    })
}

/// Split a log path into directory and file name.
fn split_log_path(path: &Path) -> (PathBuf, PathBuf) {
    if path.is_dir() {
        return (path.to_path_buf(), PathBuf::from(DEFAULT_LOG_FILE_NAME));
    }
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE_NAME));
    (dir, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter, DEFAULT_LOG_FILTER);
        assert!(config.file.is_none());
        assert!(config.ansi);
    }

    #[test]
    fn test_split_log_path() {
        assert_eq!(
            split_log_path(Path::new("/var/log/app/engine.log")),
            (PathBuf::from("/var/log/app"), PathBuf::from("engine.log"))
        );
        assert_eq!(
            split_log_path(Path::new("engine.log")),
            (PathBuf::from("."), PathBuf::from("engine.log"))
        );
    }

    #[test]
    fn test_split_existing_dir_uses_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let (parent, name) = split_log_path(dir.path());
        assert_eq!(parent, dir.path());
        assert_eq!(name, PathBuf::from(DEFAULT_LOG_FILE_NAME));
    }

    #[test]
    fn test_init_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.log");
        let config = LoggingConfig::default().with_file(&path);

        let guard = init_logging(&config).unwrap();
        tracing::info!("logging initialised");
        drop(guard);

        assert!(path.exists());
        // A second global subscriber is rejected.
        assert!(matches!(
            init_logging(&LoggingConfig::default()),
            Err(LoggingError::Install(_))
        ));
    }
}
