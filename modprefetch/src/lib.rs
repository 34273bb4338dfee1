//! modprefetch - predictive loading of deferred application modules
//!
//! The engine decides when to load opaque, key-addressed code units, keeps
//! at most one load per key in flight, retries failures with network-aware
//! backoff, and prefetches likely next modules from navigation history,
//! hover intent, idle time and device capability.
//!
//! # Architecture
//!
//! ```text
//! HostEvent ──► StrategyCoordinator ──► PriorityScheduler ──► ModuleCache ──► RetryingLoader ──► Loader
//!                 │        │                   │                  ▲
//!                 │        └─ PredictiveEngine │                  │ evict idle
//!                 └─ NavigationHistoryTracker  └─ CapabilityProbe  MemoryPressureMonitor
//!
//! ensure_loaded(key) ─────────────────────────────────────► ModuleCache
//! ```
//!
//! [`PreloadEngine`] wires one instance of each component.

pub mod cache;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod history;
pub mod logging;
pub mod memory_monitor;
pub mod predict;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod strategy;
pub mod telemetry;

pub use cache::{LoadHandle, LoadState, ModuleCache};
pub use config::PreloadConfig;
pub use engine::{EngineHandle, PreloadEngine, PreloadStatus};
pub use environment::{CapabilityProbe, EnvironmentSnapshot, NetworkClass, OperatingMode};
pub use error::{EngineError, LoadError, PreloadError, Result, SkipReason};
pub use registry::{LoadableKey, LoadableRegistry, Loader, Module, ModuleRef, PreloadPolicy, Priority};
pub use strategy::HostEvent;
