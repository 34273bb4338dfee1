//! Prefetch strategy: which triggers schedule which keys.
//!
//! - [`StrategyConfig`] holds the static key tables (related keys, bootstrap
//!   sets, time-of-day buckets) and trigger timing
//! - [`HostEvent`] is what the host application pushes in
//! - [`StrategyCoordinator`] turns events into scheduler batches

mod config;
mod coordinator;
mod events;

pub use config::{
    StrategyConfig, TimeBucket, DEFAULT_HOVER_DEBOUNCE_MS, DEFAULT_TIME_OF_DAY_INTERVAL_SECS,
};
pub use coordinator::StrategyCoordinator;
pub use events::HostEvent;
