//! Engine telemetry for observability and diagnostics.
//!
//! # Architecture
//!
//! ```text
//! Cache / Loader / Scheduler ──► PreloadMetrics ──► MetricsSnapshot ──► PreloadStatus
//!                                (atomic counters)  (point-in-time copy)
//!
//! Best-effort failures ───────► ObservationLog  ──► diagnostics panel / tests
//!                                (bounded ring)
//! ```

mod metrics;
mod observations;

pub use metrics::{MetricsSnapshot, PreloadMetrics};
pub use observations::{
    Observation, ObservationKind, ObservationLog, DEFAULT_OBSERVATION_CAPACITY,
};
