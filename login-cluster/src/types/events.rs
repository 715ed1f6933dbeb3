use serde::{Deserialize, Serialize};

use super::Member;

/// Lifecycle states reported by the local cluster runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Starting,
    Started,
    ShuttingDown,
    Shutdown,
    Merging,
    Merged,
    ClientConnected,
    ClientDisconnected,
}

impl LifecycleState {
    /// States after which the local node can no longer serve cluster operations
    pub fn is_down(&self) -> bool {
        matches!(
            self,
            Self::ShuttingDown | Self::Shutdown | Self::ClientDisconnected
        )
    }

    /// States that call for a reconnection attempt
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, Self::Shutdown | Self::ClientDisconnected)
    }
}

/// Typed membership and lifecycle feed pushed by the substrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEvent {
    MemberAdded(Member),
    MemberRemoved(Member),
    Lifecycle(LifecycleState),
}
