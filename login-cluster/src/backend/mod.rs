pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{ClusterEvent, ClusterResult, Member};

/// Local view of the clustered runtime: lifecycle, membership and liveness probes.
#[async_trait]
pub trait ClusterRuntime: Send + Sync {
    /// Whether the local runtime is up and serving
    fn is_running(&self) -> bool;

    /// The member this process runs as
    fn local_member(&self) -> Member;

    /// Current membership as seen by the local node (includes the local member)
    async fn members(&self) -> ClusterResult<Vec<Member>>;

    /// Liveness probe against one member
    async fn probe(&self, member: &Member) -> ClusterResult<()>;

    /// Restart a stopped runtime
    async fn restart(&self) -> ClusterResult<()>;

    /// Membership and lifecycle event feed
    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent>;
}

/// Cluster-replicated key/value map. `put_if_absent` is the serialization
/// point for cluster-wide uniqueness.
#[async_trait]
pub trait ReplicatedMap: Send + Sync {
    /// Insert `key` unless a live entry exists. Returns `true` when inserted.
    async fn put_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> ClusterResult<bool>;

    /// Remove `key`, returning whether a live entry was present
    async fn remove(&self, key: &str) -> ClusterResult<bool>;

    /// Remove `key` only while it still maps to `expected`. Returns whether a
    /// live entry was removed.
    async fn remove_if_value(&self, key: &str, expected: &str) -> ClusterResult<bool>;

    async fn contains_key(&self, key: &str) -> ClusterResult<bool>;

    /// Number of live entries
    async fn len(&self) -> ClusterResult<usize>;

    async fn clear(&self) -> ClusterResult<()>;

    /// Drop entries whose TTL elapsed, returning how many were removed
    async fn evict_expired(&self) -> ClusterResult<usize>;
}

/// Cluster-replicated bounded FIFO queue of encoded items.
#[async_trait]
pub trait ReplicatedQueue: Send + Sync {
    /// Append unless the queue is at capacity. Never blocks.
    async fn offer(&self, item: Vec<u8>) -> ClusterResult<bool>;

    async fn poll(&self) -> ClusterResult<Option<Vec<u8>>>;

    /// Wait up to `timeout` for an item
    async fn poll_timeout(&self, timeout: Duration) -> ClusterResult<Option<Vec<u8>>>;

    /// Wait until an item is available. Cancel-safe: dropping the future
    /// never loses an item.
    async fn take(&self) -> ClusterResult<Vec<u8>>;

    async fn len(&self) -> ClusterResult<usize>;

    async fn clear(&self) -> ClusterResult<()>;

    fn capacity(&self) -> usize;
}

/// Factory for named replicated structures, as handed out by a cluster node.
pub trait ClusterSubstrate: Send + Sync {
    fn map(&self, name: &str) -> Arc<dyn ReplicatedMap>;

    /// Get or create the named queue; `capacity` applies on creation only.
    fn queue(&self, name: &str, capacity: usize) -> Arc<dyn ReplicatedQueue>;
}
