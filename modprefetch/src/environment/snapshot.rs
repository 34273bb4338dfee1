//! Point-in-time environment reading and its operating-mode classification.

use std::fmt;

/// Effective network class as reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum NetworkClass {
    FourG,
    ThreeG,
    TwoG,
    Slow2G,
}

impl NetworkClass {
    /// Parse the host's effective-type string (`4g`, `3g`, `2g`, `slow-2g`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "4g" => Some(Self::FourG),
            "3g" => Some(Self::ThreeG),
            "2g" => Some(Self::TwoG),
            "slow-2g" => Some(Self::Slow2G),
            _ => None,
        }
    }

    /// `2g` and `slow-2g` count as slow.
    pub fn is_slow(&self) -> bool {
        matches!(self, Self::TwoG | Self::Slow2G)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FourG => "4g",
            Self::ThreeG => "3g",
            Self::TwoG => "2g",
            Self::Slow2G => "slow-2g",
        }
    }
}

impl Default for NetworkClass {
    fn default() -> Self {
        Self::FourG
    }
}

impl fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heap (or process memory) usage against its limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct HeapUsage {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl HeapUsage {
    pub fn new(used_bytes: u64, limit_bytes: u64) -> Self {
        Self {
            used_bytes,
            limit_bytes,
        }
    }

    /// Used / limit, or 0.0 when the limit is unknown.
    pub fn ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.limit_bytes as f64
    }
}

/// Point-in-time read of network and device signals.
///
/// Never cached longer than one scheduling decision: callers ask the probe
/// for a fresh snapshot each time they gate a request.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct EnvironmentSnapshot {
    /// Effective network class.
    pub network: NetworkClass,
    /// Host data-saver flag.
    pub save_data: bool,
    /// Downlink estimate in Mbit/s, if the host reports one.
    pub downlink_mbps: Option<f64>,
    /// Device memory in GB, if known.
    pub device_memory_gb: Option<f64>,
    /// Logical core count.
    pub cores: usize,
    /// Whether the page/window is visible.
    pub visible: bool,
    /// Whether the host reports connectivity.
    pub online: bool,
    /// Latest heap usage sample, if the host exposes one.
    pub heap: Option<HeapUsage>,
}

impl Default for EnvironmentSnapshot {
    fn default() -> Self {
        Self {
            network: NetworkClass::FourG,
            save_data: false,
            downlink_mbps: None,
            device_memory_gb: Some(4.0),
            cores: 4,
            visible: true,
            online: true,
            heap: None,
        }
    }
}

impl EnvironmentSnapshot {
    /// Whether the connection is 2g or slower.
    pub fn is_slow_network(&self) -> bool {
        self.network.is_slow()
    }

    /// Whether a network-aware low-priority load should be skipped.
    pub fn is_constrained(&self) -> bool {
        self.save_data || self.is_slow_network()
    }

    /// Heap usage ratio, if sampled.
    pub fn heap_usage_ratio(&self) -> Option<f64> {
        self.heap.map(|h| h.ratio())
    }

    /// Classify into an operating mode.
    ///
    /// Conservative when memory ≤ 2GB, data saver is on, or the network is
    /// 2g/slow-2g. Aggressive when memory ≥ 8GB, cores ≥ 8 and the network is
    /// 4g. Medium otherwise.
    pub fn mode(&self) -> OperatingMode {
        let memory = self.device_memory_gb;
        if memory.is_some_and(|gb| gb <= 2.0) || self.save_data || self.is_slow_network() {
            return OperatingMode::Conservative;
        }
        if memory.is_some_and(|gb| gb >= 8.0)
            && self.cores >= 8
            && self.network == NetworkClass::FourG
        {
            return OperatingMode::Aggressive;
        }
        OperatingMode::Medium
    }
}

/// How hard the engine may prefetch.
///
/// Ordered by capability so `new > old` means the environment improved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum OperatingMode {
    Conservative,
    Medium,
    Aggressive,
}

impl OperatingMode {
    /// Maximum number of keys one speculative batch may request.
    ///
    /// `None` means no limit beyond the registry size.
    pub fn prefetch_limit(&self) -> Option<usize> {
        match self {
            Self::Conservative => Some(2),
            Self::Medium => Some(4),
            Self::Aggressive => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Medium => "medium",
            Self::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
