//! Capability probes.
//!
//! Components never read ambient signals directly; they ask a
//! [`CapabilityProbe`] for an [`EnvironmentSnapshot`]. Two adapters exist:
//!
//! - [`HostProbe`]: the host pushes network/visibility/online signals; device
//!   memory, core count and memory pressure come from the OS
//! - [`StaticProbe`]: a fixed, settable snapshot for deterministic tests and
//!   simulations

use parking_lot::RwLock;

use super::snapshot::{EnvironmentSnapshot, HeapUsage, NetworkClass};

/// Reads ambient environment signals.
///
/// # Implementors
///
/// - `HostProbe` - host-fed signals plus OS memory readings
/// - `StaticProbe` - fixed snapshot for tests
pub trait CapabilityProbe: Send + Sync {
    /// Cheap, side-effect-free read of the current environment.
    fn snapshot(&self) -> EnvironmentSnapshot;

    /// Fresh heap usage sample for the memory monitor.
    ///
    /// Defaults to whatever the snapshot carries.
    fn heap_usage(&self) -> Option<HeapUsage> {
        self.snapshot().heap
    }
}

// =============================================================================
// Static probe
// =============================================================================

/// Probe returning a settable snapshot.
#[derive(Debug, Default)]
pub struct StaticProbe {
    snapshot: RwLock<EnvironmentSnapshot>,
}

impl StaticProbe {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Replace the snapshot.
    pub fn set(&self, snapshot: EnvironmentSnapshot) {
        *self.snapshot.write() = snapshot;
    }

    /// Mutate the snapshot in place.
    pub fn update(&self, f: impl FnOnce(&mut EnvironmentSnapshot)) {
        f(&mut self.snapshot.write());
    }
}

impl CapabilityProbe for StaticProbe {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.snapshot.read().clone()
    }
}

// =============================================================================
// Host probe
// =============================================================================

/// Signals only the host can observe (connection API, visibility, online state).
#[derive(Clone, Debug, PartialEq)]
pub struct HostSignals {
    pub network: NetworkClass,
    pub save_data: bool,
    pub downlink_mbps: Option<f64>,
    pub visible: bool,
    pub online: bool,
}

impl Default for HostSignals {
    fn default() -> Self {
        Self {
            network: NetworkClass::FourG,
            save_data: false,
            downlink_mbps: None,
            visible: true,
            online: true,
        }
    }
}

/// Probe fed by host events and OS readings.
///
/// Device memory and core count are read once at construction. Memory
/// pressure is sampled on [`heap_usage`](CapabilityProbe::heap_usage) and the
/// latest sample is reported in subsequent snapshots.
#[derive(Debug)]
pub struct HostProbe {
    signals: RwLock<HostSignals>,
    device_memory_gb: Option<f64>,
    cores: usize,
    last_heap: RwLock<Option<HeapUsage>>,
}

impl HostProbe {
    /// Create a probe, detecting device memory and cores.
    pub fn detect() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        let device_memory_gb = read_meminfo()
            .map(|m| m.total_bytes as f64 / (1024.0 * 1024.0 * 1024.0));

        tracing::debug!(
            cores,
            device_memory_gb = ?device_memory_gb,
            "Host capability probe initialised"
        );

        Self::with_hardware(device_memory_gb, cores)
    }

    /// Create a probe with explicit hardware figures.
    pub fn with_hardware(device_memory_gb: Option<f64>, cores: usize) -> Self {
        Self {
            signals: RwLock::new(HostSignals::default()),
            device_memory_gb,
            cores,
            last_heap: RwLock::new(None),
        }
    }

    /// Host reports a network change.
    pub fn set_network(&self, network: NetworkClass, downlink_mbps: Option<f64>) {
        let mut signals = self.signals.write();
        signals.network = network;
        signals.downlink_mbps = downlink_mbps;
    }

    /// Host reports a data-saver change.
    pub fn set_save_data(&self, save_data: bool) {
        self.signals.write().save_data = save_data;
    }

    /// Host reports a visibility change.
    pub fn set_visible(&self, visible: bool) {
        self.signals.write().visible = visible;
    }

    /// Host reports an online/offline transition.
    pub fn set_online(&self, online: bool) {
        self.signals.write().online = online;
    }

    /// Current host signals.
    pub fn signals(&self) -> HostSignals {
        self.signals.read().clone()
    }
}

impl CapabilityProbe for HostProbe {
    fn snapshot(&self) -> EnvironmentSnapshot {
        let signals = self.signals.read().clone();
        EnvironmentSnapshot {
            network: signals.network,
            save_data: signals.save_data,
            downlink_mbps: signals.downlink_mbps,
            device_memory_gb: self.device_memory_gb,
            cores: self.cores,
            visible: signals.visible,
            online: signals.online,
            heap: *self.last_heap.read(),
        }
    }

    fn heap_usage(&self) -> Option<HeapUsage> {
        let sample = read_meminfo()
            .map(|m| HeapUsage::new(m.total_bytes.saturating_sub(m.available_bytes), m.total_bytes));
        *self.last_heap.write() = sample;
        sample
    }
}

struct MemInfo {
    total_bytes: u64,
    available_bytes: u64,
}

/// Parse `/proc/meminfo`.
#[cfg(target_os = "linux")]
fn read_meminfo() -> Option<MemInfo> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&content)
}

#[cfg(not(target_os = "linux"))]
fn read_meminfo() -> Option<MemInfo> {
    None
}

fn parse_meminfo(content: &str) -> Option<MemInfo> {
    let mut total = None;
    let mut available = None;
    for line in content.lines() {
        // Format: "MemTotal:       16384000 kB"
        let mut parts = line.split_whitespace();
        let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(kb) = value.parse::<u64>() else {
            continue;
        };
        match name {
            "MemTotal:" => total = Some(kb * 1024),
            "MemAvailable:" => available = Some(kb * 1024),
            _ => {}
        }
    }
    Some(MemInfo {
        total_bytes: total?,
        available_bytes: available?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_static_probe_update() {
        let probe = StaticProbe::default();
        assert_eq!(probe.snapshot().network, NetworkClass::FourG);

        probe.update(|s| {
            s.network = NetworkClass::Slow2G;
            s.save_data = true;
        });
        let snap = probe.snapshot();
        assert_eq!(snap.network, NetworkClass::Slow2G);
        assert!(snap.save_data);
    }

    #[test]
    fn test_static_probe_heap_from_snapshot() {
        let probe = StaticProbe::new(EnvironmentSnapshot {
            heap: Some(HeapUsage::new(85, 100)),
            ..EnvironmentSnapshot::default()
        });
        assert_eq!(probe.heap_usage(), Some(HeapUsage::new(85, 100)));
    }

    #[test]
    fn test_host_probe_signals_flow_into_snapshot() {
        let probe = HostProbe::with_hardware(Some(16.0), 12);
        probe.set_network(NetworkClass::ThreeG, Some(1.5));
        probe.set_visible(false);
        probe.set_online(false);

        let snap = probe.snapshot();
        assert_eq!(snap.network, NetworkClass::ThreeG);
        assert_eq!(snap.downlink_mbps, Some(1.5));
        assert!(!snap.visible);
        assert!(!snap.online);
        assert_eq!(snap.cores, 12);
        assert_eq!(snap.device_memory_gb, Some(16.0));
    }

    #[test]
    fn test_trait_object_usage() {
        let probe: Arc<dyn CapabilityProbe> = Arc::new(StaticProbe::default());
        assert!(probe.snapshot().online);
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:       16384000 kB\nMemFree:         1000000 kB\nMemAvailable:    4096000 kB\n";
        let info = parse_meminfo(content).unwrap();
        assert_eq!(info.total_bytes, 16_384_000 * 1024);
        assert_eq!(info.available_bytes, 4_096_000 * 1024);
    }

    #[test]
    fn test_parse_meminfo_missing_fields() {
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_none());
        assert!(parse_meminfo("").is_none());
    }
}
