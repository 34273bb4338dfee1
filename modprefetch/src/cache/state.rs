//! Per-key load state.
//!
//! # State Machine
//!
//! ```text
//! NotLoaded ──request──► Loading ──success──► Loaded ──evict/reset──► NotLoaded
//!                          │   ▲
//!                  exhausted   └──request── Failed
//!                          ▼
//!                        Failed
//! ```
//!
//! A policy skip inside `Loading` returns the entry to `NotLoaded`.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, Shared};

use crate::error::PreloadError;
use crate::registry::ModuleRef;
use crate::retry::LoadContext;

/// The one pending operation every concurrent requester of a key awaits.
pub type SharedLoad = Shared<BoxFuture<'static, Result<ModuleRef, PreloadError>>>;

/// Read-only view of a cache entry.
#[derive(Clone, Debug)]
pub enum LoadState {
    NotLoaded,
    Loading {
        started_at: Instant,
        /// 0-based number of the attempt currently running or backing off.
        attempt: u32,
    },
    Loaded {
        value: ModuleRef,
        loaded_at: Instant,
    },
    Failed {
        error: PreloadError,
        /// Attempts made before giving up.
        attempt: u32,
        last_attempt_at: Instant,
    },
}

impl LoadState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NotLoaded => "not_loaded",
            Self::Loading { .. } => "loading",
            Self::Loaded { .. } => "loaded",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Internal cache slot. `NotLoaded` is represented by absence from the map.
pub(super) enum Slot {
    Loading {
        started_at: Instant,
        attempt: Arc<AtomicU32>,
        /// Distinguishes this load from a later one for the same key.
        generation: u64,
        /// Context of the request that claimed the slot.
        ctx: LoadContext,
        future: SharedLoad,
    },
    Loaded {
        value: ModuleRef,
        loaded_at: Instant,
        last_requested_at: Instant,
    },
    Failed {
        error: PreloadError,
        attempt: u32,
        last_attempt_at: Instant,
    },
}

impl Slot {
    pub(super) fn view(&self) -> LoadState {
        match self {
            Slot::Loading {
                started_at,
                attempt,
                ..
            } => LoadState::Loading {
                started_at: *started_at,
                attempt: attempt.load(Ordering::Relaxed),
            },
            Slot::Loaded {
                value, loaded_at, ..
            } => LoadState::Loaded {
                value: Arc::clone(value),
                loaded_at: *loaded_at,
            },
            Slot::Failed {
                error,
                attempt,
                last_attempt_at,
            } => LoadState::Failed {
                error: error.clone(),
                attempt: *attempt,
                last_attempt_at: *last_attempt_at,
            },
        }
    }
}
