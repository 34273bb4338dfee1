//! Bounded retry with network-aware exponential backoff.
//!
//! [`RetryPolicy`] holds the numbers; [`RetryingLoader`] runs a registry
//! loader against them, applying the per-attempt timeout and the fail-fast
//! gate for low-priority loads on constrained connections.

mod loader;
mod policy;

pub use loader::{LoadContext, RetryingLoader};
pub use policy::{
    RetryPolicy, DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY_MS,
    DEFAULT_MAX_DELAY_SECS, DEFAULT_MAX_RETRIES, DEFAULT_SLOW_LOAD_THRESHOLD_MS,
    DEFAULT_SLOW_NETWORK_BASE_DELAY_MS,
};
