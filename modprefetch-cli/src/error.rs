//! CLI error type.

use std::fmt;

use modprefetch::error::{ConfigError, EngineError, LoggingError, RegistryError};

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be read or written.
    Config(ConfigError),

    /// Logging could not be initialised.
    Logging(LoggingError),

    /// The synthetic module set is inconsistent with the configuration.
    Registry(RegistryError),

    /// Invalid command-line arguments.
    InvalidArgument(String),

    /// Failed to create the Tokio runtime.
    RuntimeCreation(String),

    /// Failed to serialize output.
    Output(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Logging(e) => write!(f, "Failed to initialise logging: {}", e),
            CliError::Registry(e) => write!(f, "Invalid module set: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::RuntimeCreation(msg) => {
                write!(f, "Failed to create Tokio runtime: {}", msg)
            }
            CliError::Output(msg) => write!(f, "Failed to write output: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Registry(e) => Some(e),
            CliError::InvalidArgument(_) | CliError::RuntimeCreation(_) | CliError::Output(_) => {
                None
            }
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<RegistryError> for CliError {
    fn from(e: RegistryError) -> Self {
        CliError::Registry(e)
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Config(e) => CliError::Config(e),
            EngineError::Registry(e) => CliError::Registry(e),
        }
    }
}
