//! Environment capability probing.
//!
//! Every other component depends only on the [`EnvironmentSnapshot`] value
//! type; where the signals come from is hidden behind [`CapabilityProbe`].

mod probe;
mod snapshot;

pub use probe::{CapabilityProbe, HostProbe, HostSignals, StaticProbe};
pub use snapshot::{EnvironmentSnapshot, HeapUsage, NetworkClass, OperatingMode};
