//! Configuration CLI commands.
//!
//! Provides `config show`, `config path` and `config init`.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use modprefetch::PreloadConfig;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as INI
    Show,

    /// Show the configuration file path
    Path,

    /// Write the default configuration to the configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
///
/// `path` is the `--config` override, if any.
pub fn run(command: ConfigCommands, path: Option<&Path>, config: &PreloadConfig) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            print!("{}", config.to_ini_string());
            Ok(())
        }
        ConfigCommands::Path => {
            let path = resolve_path(path)?;
            let state = if path.exists() { "" } else { " (not created)" };
            println!("{}{}", path.display(), state);
            Ok(())
        }
        ConfigCommands::Init { force } => {
            let path = resolve_path(path)?;
            init(&path, force)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

/// The `--config` override, or the platform default location.
pub fn resolve_path(path: Option<&Path>) -> Result<PathBuf, CliError> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(PreloadConfig::default_path()?),
    }
}

/// Load the effective configuration.
///
/// An explicit path must exist; the default path falls back to defaults.
pub fn load(path: Option<&Path>) -> Result<PreloadConfig, CliError> {
    match path {
        Some(path) => Ok(PreloadConfig::load(path)?),
        None => Ok(PreloadConfig::load_default()?),
    }
}

fn init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::InvalidArgument(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    PreloadConfig::default().save(path)?;
    Ok(())
}
