//! Trigger events pushed by the host application.

use crate::environment::NetworkClass;
use crate::registry::LoadableKey;

/// An event the host forwards to the [`StrategyCoordinator`](super::StrategyCoordinator).
///
/// Environment events carry the new value for logging only; the coordinator
/// always re-reads the capability probe, which the host updates before
/// sending the event.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// The user entered a key.
    Navigate(LoadableKey),
    /// The pointer rests on a link to a key.
    Hover(LoadableKey),
    /// The pointer left a link before or after the debounce fired.
    HoverLeave(LoadableKey),
    /// The host has an idle opportunity.
    Idle,
    /// Page visibility changed.
    VisibilityChanged(bool),
    /// Connectivity changed.
    OnlineChanged(bool),
    /// The effective network class changed.
    NetworkChanged(NetworkClass),
    /// Periodic tick from the host's timer.
    Tick,
}

impl HostEvent {
    /// Whether the event should re-run the environment classification.
    pub fn is_environment_change(&self) -> bool {
        matches!(
            self,
            Self::VisibilityChanged(_) | Self::OnlineChanged(_) | Self::NetworkChanged(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Navigate(_) => "navigate",
            Self::Hover(_) => "hover",
            Self::HoverLeave(_) => "hover_leave",
            Self::Idle => "idle",
            Self::VisibilityChanged(_) => "visibility_changed",
            Self::OnlineChanged(_) => "online_changed",
            Self::NetworkChanged(_) => "network_changed",
            Self::Tick => "tick",
        }
    }
}
