//! modprefetch CLI - diagnostics front-end for the preload engine
//!
//! `simulate` replays a navigation script against a synthetic module set;
//! `config` inspects and initialises the configuration file.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use modprefetch::logging::init_logging;

use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "modprefetch", version, about = "Predictive module loading diagnostics")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `modprefetch=debug` (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a navigation script and print the preload status
    Simulate(SimulateArgs),

    /// Inspect or initialise the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = commands::config::load(cli.config.as_deref())?;
    if let Some(filter) = cli.log_level {
        config.logging.filter = filter;
    }

    match cli.command {
        Commands::Config { command } => {
            commands::config::run(command, cli.config.as_deref(), &config)
        }
        Commands::Simulate(args) => {
            let _guard = init_logging(&config.logging)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| CliError::RuntimeCreation(e.to_string()))?;
            runtime.block_on(commands::simulate::run(args, config))
        }
    }
}
