use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::grid::{MemoryGrid, NodeLink};
use super::structures::{MemoryMap, MemoryQueue};
use crate::backend::{ClusterRuntime, ClusterSubstrate, ReplicatedMap, ReplicatedQueue};
use crate::{ClusterError, ClusterEvent, ClusterResult, LifecycleState, Member, MemberId};

/// One member of a [`MemoryGrid`], seen from its own process.
pub struct MemoryNode {
    grid: Arc<MemoryGrid>,
    link: Arc<NodeLink>,
    /// Members this node's probes fail against
    failing_probes: DashSet<MemberId>,
    fail_restart: AtomicBool,
}

impl MemoryNode {
    pub(crate) fn new(grid: Arc<MemoryGrid>, link: Arc<NodeLink>) -> Arc<Self> {
        Arc::new(Self {
            grid,
            link,
            failing_probes: DashSet::new(),
            fail_restart: AtomicBool::new(false),
        })
    }

    pub fn grid(&self) -> &Arc<MemoryGrid> {
        &self.grid
    }

    pub fn id(&self) -> &MemberId {
        &self.link.member.id
    }

    /// Orderly shutdown of the local runtime.
    pub fn shutdown(&self) {
        if !self.link.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(member = %self.link.member, "Shutting down node");
        self.link.emit(ClusterEvent::Lifecycle(LifecycleState::ShuttingDown));
        self.grid.depart(&self.link.member);
        self.link.emit(ClusterEvent::Lifecycle(LifecycleState::Shutdown));
    }

    /// Cut the node off from the network. It keeps running but only sees itself.
    pub fn disconnect(&self) {
        if !self.link.reachable.swap(false, Ordering::SeqCst) {
            return;
        }
        warn!(member = %self.link.member, "Node disconnected from cluster");
        self.grid.depart(&self.link.member);
        self.link.emit(ClusterEvent::Lifecycle(LifecycleState::ClientDisconnected));
    }

    /// Heal a previous [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        if self.link.reachable.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(member = %self.link.member, "Node reconnected to cluster");
        if self.link.running.load(Ordering::SeqCst) {
            self.grid.admit(&self.link.member);
        }
        self.link.emit(ClusterEvent::Lifecycle(LifecycleState::ClientConnected));
    }

    /// Make probes from this node against `member` fail (or succeed again).
    pub fn fail_probes_to(&self, member: &MemberId, failing: bool) {
        if failing {
            self.failing_probes.insert(member.clone());
        } else {
            self.failing_probes.remove(member);
        }
    }

    /// Make subsequent [`restart`](ClusterRuntime::restart) calls fail.
    pub fn fail_restarts(&self, failing: bool) {
        self.fail_restart.store(failing, Ordering::SeqCst);
    }

    /// Named map bound to this node
    pub fn memory_map(&self, name: &str) -> MemoryMap {
        MemoryMap {
            store: self.grid.map_store(name),
            link: self.link.clone(),
        }
    }
}

#[async_trait]
impl ClusterRuntime for MemoryNode {
    fn is_running(&self) -> bool {
        self.link.running.load(Ordering::SeqCst)
    }

    fn local_member(&self) -> Member {
        self.link.member.clone()
    }

    async fn members(&self) -> ClusterResult<Vec<Member>> {
        if !self.is_running() {
            return Err(ClusterError::NotRunning);
        }
        if !self.link.reachable.load(Ordering::SeqCst) {
            // Split off: only the local view survives
            return Ok(vec![self.link.member.clone()]);
        }

        let mut members: Vec<Member> = self
            .grid
            .membership
            .iter()
            .filter(|m| {
                self.grid
                    .link(&m.id)
                    .map(|link| link.is_serving())
                    .unwrap_or(false)
            })
            .map(|m| m.value().clone())
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(members)
    }

    async fn probe(&self, member: &Member) -> ClusterResult<()> {
        let fail = |reason: &str| ClusterError::ProbeFailed {
            member: member.id.to_string(),
            reason: reason.to_string(),
        };

        if !self.link.is_serving() {
            return Err(fail("local node is not serving"));
        }
        if self.failing_probes.contains(&member.id) {
            return Err(fail("probe timed out"));
        }
        match self.grid.link(&member.id) {
            Some(link) if link.is_serving() => Ok(()),
            Some(_) => Err(fail("member is not serving")),
            None => Err(ClusterError::MemberNotFound(member.id.to_string())),
        }
    }

    async fn restart(&self) -> ClusterResult<()> {
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(ClusterError::Internal("runtime refused to start".to_string()));
        }
        self.link.emit(ClusterEvent::Lifecycle(LifecycleState::Starting));
        self.link.running.store(true, Ordering::SeqCst);
        if self.link.reachable.load(Ordering::SeqCst) {
            self.grid.admit(&self.link.member);
        }
        info!(member = %self.link.member, "Node restarted");
        self.link.emit(ClusterEvent::Lifecycle(LifecycleState::Started));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.link.events.subscribe()
    }
}

impl ClusterSubstrate for MemoryNode {
    fn map(&self, name: &str) -> Arc<dyn ReplicatedMap> {
        Arc::new(self.memory_map(name))
    }

    fn queue(&self, name: &str, capacity: usize) -> Arc<dyn ReplicatedQueue> {
        Arc::new(MemoryQueue {
            store: self.grid.queue_store(name, capacity),
            link: self.link.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn nodes_share_maps_and_queues() {
        let grid = MemoryGrid::new("test");
        let a = grid.join();
        let b = grid.join();

        let map_a = a.map("dedup");
        let map_b = b.map("dedup");
        assert!(map_a.put_if_absent("k", "1".into(), None).await.unwrap());
        assert!(!map_b.put_if_absent("k", "2".into(), None).await.unwrap());

        let q_a = a.queue("tasks", 4);
        let q_b = b.queue("tasks", 4);
        assert!(q_a.offer(b"x".to_vec()).await.unwrap());
        assert_eq!(q_b.poll().await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn expired_entries_are_absent() {
        let grid = MemoryGrid::new("test");
        let node = grid.join();
        let map = node.map("dedup");

        assert!(map.put_if_absent("k", "1".into(), Some(Duration::from_millis(10))).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(map.len().await.unwrap(), 0);
        assert!(map.put_if_absent("k", "2".into(), None).await.unwrap());
        assert_eq!(map.evict_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn conditional_remove_spares_other_holders() {
        let grid = MemoryGrid::new("test");
        let node = grid.join();
        let map = node.map("dedup");

        assert!(map.put_if_absent("k", "task-b".into(), None).await.unwrap());
        assert!(!map.remove_if_value("k", "task-a").await.unwrap());
        assert!(map.contains_key("k").await.unwrap());

        assert!(map.remove_if_value("k", "task-b").await.unwrap());
        assert!(!map.contains_key("k").await.unwrap());
        assert!(!map.remove_if_value("missing", "task-b").await.unwrap());
    }

    #[tokio::test]
    async fn queue_capacity_is_enforced() {
        let grid = MemoryGrid::new("test");
        let node = grid.join();
        let queue = node.queue("tasks", 1);

        assert!(queue.offer(vec![1]).await.unwrap());
        assert!(!queue.offer(vec![2]).await.unwrap());
        assert_eq!(queue.capacity(), 1);
    }

    #[tokio::test]
    async fn disconnected_node_sees_only_itself_and_fails_operations() {
        let grid = MemoryGrid::new("test");
        let a = grid.join();
        let b = grid.join();

        a.disconnect();

        assert_eq!(a.members().await.unwrap(), vec![a.local_member()]);
        assert_eq!(b.members().await.unwrap(), vec![b.local_member()]);
        let err = a.map("dedup").len().await.unwrap_err();
        assert!(err.is_transient());

        a.reconnect();
        assert_eq!(b.members().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn shutdown_emits_lifecycle_events() {
        let grid = MemoryGrid::new("test");
        let a = grid.join();
        let b = grid.join();
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        a.shutdown();

        assert_eq!(a_events.recv().await.unwrap(), ClusterEvent::Lifecycle(LifecycleState::ShuttingDown));
        assert_eq!(a_events.recv().await.unwrap(), ClusterEvent::Lifecycle(LifecycleState::Shutdown));
        assert_eq!(b_events.recv().await.unwrap(), ClusterEvent::MemberRemoved(a.local_member()));
        assert!(matches!(a.members().await, Err(ClusterError::NotRunning)));
    }

    #[tokio::test]
    async fn probes_can_be_failed_per_member() {
        let grid = MemoryGrid::new("test");
        let a = grid.join();
        let b = grid.join();

        assert!(a.probe(&b.local_member()).await.is_ok());
        a.fail_probes_to(b.id(), true);
        assert!(a.probe(&b.local_member()).await.is_err());
        a.fail_probes_to(b.id(), false);
        assert!(a.probe(&b.local_member()).await.is_ok());
    }
}
