//! Navigation replay against a synthetic module set.
//!
//! Every key named by the script, `--modules`, or the strategy tables gets
//! a loader that sleeps for `--load-ms` and returns the key's bytes. Keys
//! listed in `--fail` always fail. The script is replayed as host events
//! and the final preload status is printed as JSON.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Args;
use modprefetch::environment::StaticProbe;
use modprefetch::{
    EnvironmentSnapshot, HostEvent, LoadError, LoadableKey, LoadableRegistry, NetworkClass,
    PreloadConfig, PreloadEngine, PreloadPolicy, PreloadStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;

/// Arguments for `simulate`.
#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Comma-separated route keys to navigate through, in order
    #[arg(long, value_delimiter = ',', required = true)]
    pub script: Vec<String>,

    /// Additional module keys to register
    #[arg(long, value_delimiter = ',')]
    pub modules: Vec<String>,

    /// Module keys whose loader always fails
    #[arg(long, value_delimiter = ',')]
    pub fail: Vec<String>,

    /// Simulated load time per module in milliseconds
    #[arg(long, default_value_t = 25)]
    pub load_ms: u64,

    /// Pause between navigations in milliseconds
    #[arg(long, default_value_t = 250)]
    pub step_ms: u64,

    /// Effective network class (slow-2g, 2g, 3g, 4g)
    #[arg(long, default_value = "4g")]
    pub network: String,

    /// Simulate the data-saver preference
    #[arg(long)]
    pub save_data: bool,

    /// Send an idle event after the script
    #[arg(long)]
    pub idle: bool,
}

/// Run the simulation and print the resulting status.
pub async fn run(args: SimulateArgs, config: PreloadConfig) -> Result<(), CliError> {
    let status = simulate(&args, config).await?;
    let json =
        serde_json::to_string_pretty(&status).map_err(|e| CliError::Output(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

/// Replay the script and return the final status.
pub async fn simulate(
    args: &SimulateArgs,
    config: PreloadConfig,
) -> Result<PreloadStatus, CliError> {
    let network = NetworkClass::parse(&args.network)
        .ok_or_else(|| CliError::InvalidArgument(format!("unknown network '{}'", args.network)))?;
    let probe = Arc::new(StaticProbe::new(EnvironmentSnapshot {
        network,
        save_data: args.save_data,
        ..EnvironmentSnapshot::default()
    }));

    let registry = synthetic_registry(args, &config)?;
    let engine = PreloadEngine::new(registry, config, probe)?;

    let shutdown = CancellationToken::new();
    let handle = engine.start(shutdown.clone());
    let step = Duration::from_millis(args.step_ms);

    for route in &args.script {
        let key = LoadableKey::from(route.as_str());
        info!(route = %key, "Navigating");
        if !handle.send(HostEvent::Navigate(key.clone())).await {
            warn!("Coordinator stopped before the script finished");
            break;
        }
        if let Err(e) = engine.ensure_loaded(&key).await {
            warn!(route = %key, error = %e, "Route failed to load");
        }
        tokio::time::sleep(step).await;
    }

    if args.idle {
        handle.send(HostEvent::Idle).await;
        tokio::time::sleep(step).await;
    }

    shutdown.cancel();
    handle.join().await;

    Ok(engine.preload_status())
}

/// Every key the run can touch, sorted.
fn module_keys(args: &SimulateArgs, config: &PreloadConfig) -> BTreeSet<LoadableKey> {
    let strategy = &config.strategy;
    let named = args
        .script
        .iter()
        .chain(&args.modules)
        .chain(&args.fail)
        .map(|s| LoadableKey::from(s.as_str()));
    let configured = strategy
        .related
        .iter()
        .flat_map(|(from, to)| std::iter::once(from).chain(to))
        .chain(&strategy.bootstrap)
        .chain(&strategy.extended_bootstrap)
        .chain(strategy.time_buckets.iter().flat_map(|b| &b.keys))
        .cloned();
    named.chain(configured).collect()
}

fn synthetic_registry(
    args: &SimulateArgs,
    config: &PreloadConfig,
) -> Result<LoadableRegistry, CliError> {
    let failing: BTreeSet<LoadableKey> = args
        .fail
        .iter()
        .map(|s| LoadableKey::from(s.as_str()))
        .collect();
    let delay = Duration::from_millis(args.load_ms);

    let mut builder = LoadableRegistry::builder();
    for key in module_keys(args, config) {
        let fails = failing.contains(&key);
        let body = Bytes::from(key.as_str().to_owned());
        let loader = move || {
            let body = body.clone();
            async move {
                tokio::time::sleep(delay).await;
                if fails {
                    Err(LoadError::permanent("simulated failure"))
                } else {
                    Ok(body)
                }
            }
        };
        builder = builder.register(key, loader, PreloadPolicy::medium().network_aware());
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modprefetch::retry::RetryPolicy;
    use modprefetch::strategy::StrategyConfig;

    fn args(script: &[&str]) -> SimulateArgs {
        SimulateArgs {
            script: script.iter().map(|s| s.to_string()).collect(),
            modules: Vec::new(),
            fail: Vec::new(),
            load_ms: 5,
            step_ms: 50,
            network: "4g".to_string(),
            save_data: false,
            idle: false,
        }
    }

    #[test]
    fn test_module_keys_include_strategy_tables() {
        let config = PreloadConfig::default().with_strategy(
            StrategyConfig::default()
                .with_related("home", ["patients"])
                .with_bootstrap(["billing"]),
        );
        let keys: Vec<String> = module_keys(&args(&["home", "home"]), &config)
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["billing", "home", "patients"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_prefetches_related_and_bootstrap() {
        let config = PreloadConfig::default().with_strategy(
            StrategyConfig::default()
                .with_related("home", ["patients"])
                .with_bootstrap(["billing"]),
        );
        let mut args = args(&["home"]);
        args.idle = true;

        let status = simulate(&args, config).await.unwrap();

        let cached: Vec<&str> = status.cached_keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(cached, vec!["billing", "home", "patients"]);
        assert!(status.failed_keys.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_reports_failures() {
        let config = PreloadConfig::default().with_retry(RetryPolicy::with_max_retries(0));
        let mut args = args(&["home", "broken"]);
        args.fail = vec!["broken".to_string()];

        let status = simulate(&args, config).await.unwrap();

        assert_eq!(status.failed_keys, vec![LoadableKey::from("broken")]);
        assert_eq!(status.cached_keys, vec![LoadableKey::from("home")]);
    }

    #[tokio::test]
    async fn test_simulate_rejects_unknown_network() {
        let mut args = args(&["home"]);
        args.network = "warp".to_string();
        let err = simulate(&args, PreloadConfig::default()).await.unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }
}
