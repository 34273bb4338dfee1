//! Module cache with in-flight deduplication.
//!
//! # Architecture
//!
//! ```text
//! request(key) ──► lock ──┬── Loaded   ──► Ready(value)         cache hit
//!                         ├── Loading  ──► Pending(shared)      joined
//!                         └── NotLoaded/Failed
//!                               │ claim Loading, spawn
//!                               ▼
//!                         RetryingLoader::load
//!                               │
//!                               ▼
//!                         lock ──► Loaded / Failed / NotLoaded (skip)
//! ```
//!
//! There is exactly one pending operation per key at any time; every
//! concurrent requester awaits a clone of it.

mod module_cache;
mod state;

pub use module_cache::{LoadHandle, ModuleCache};
pub use state::{LoadState, SharedLoad};
