use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::node::MemoryNode;
use super::structures::{MapStore, QueueStore};
use crate::{ClusterEvent, Member, MemberId};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-member state the grid needs to see from other nodes.
pub(crate) struct NodeLink {
    pub(crate) member: Member,
    pub(crate) running: AtomicBool,
    /// `false` while the node is cut off from the network
    pub(crate) reachable: AtomicBool,
    pub(crate) events: broadcast::Sender<ClusterEvent>,
}

impl NodeLink {
    pub(crate) fn is_serving(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.reachable.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: ClusterEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Shared state of an in-process cluster.
pub struct MemoryGrid {
    name: String,
    /// Joined members; a member absent here has been evicted or has left
    pub(crate) membership: DashMap<MemberId, Member>,
    pub(crate) links: DashMap<MemberId, Arc<NodeLink>>,
    pub(crate) maps: DashMap<String, Arc<MapStore>>,
    pub(crate) queues: DashMap<String, Arc<QueueStore>>,
    next_port: AtomicU64,
}

impl MemoryGrid {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            membership: DashMap::new(),
            links: DashMap::new(),
            maps: DashMap::new(),
            queues: DashMap::new(),
            next_port: AtomicU64::new(5701),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a new node on the next free loopback port and join it.
    pub fn join(self: &Arc<Self>) -> Arc<MemoryNode> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        self.join_at(format!("127.0.0.1:{}", port))
    }

    /// Start a new node with an explicit address and join it.
    pub fn join_at(self: &Arc<Self>, address: impl Into<String>) -> Arc<MemoryNode> {
        let member = Member::new(MemberId::new(), address);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let link = Arc::new(NodeLink {
            member: member.clone(),
            running: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            events,
        });

        self.links.insert(member.id.clone(), link.clone());
        self.admit(&member);
        info!(cluster = %self.name, member = %member, "Member joined grid");

        MemoryNode::new(self.clone(), link)
    }

    /// Remove a member from the membership list and tell every node,
    /// including the evicted one.
    pub fn evict(&self, member_id: &MemberId) -> bool {
        let Some((_, member)) = self.membership.remove(member_id) else {
            return false;
        };
        info!(cluster = %self.name, member = %member, "Member evicted from grid");
        for link in self.links.iter() {
            link.emit(ClusterEvent::MemberRemoved(member.clone()));
        }
        true
    }

    /// Members currently in the membership list
    pub fn member_count(&self) -> usize {
        self.membership.len()
    }

    /// Add `member` to the membership list and announce it to the other nodes.
    pub(crate) fn admit(&self, member: &Member) {
        if self.membership.insert(member.id.clone(), member.clone()).is_some() {
            return;
        }
        for link in self.links.iter() {
            if link.member.id != member.id {
                link.emit(ClusterEvent::MemberAdded(member.clone()));
            }
        }
    }

    /// Remove `member` and announce it to the other nodes.
    pub(crate) fn depart(&self, member: &Member) {
        if self.membership.remove(&member.id).is_none() {
            return;
        }
        debug!(cluster = %self.name, member = %member, "Member left grid");
        for link in self.links.iter() {
            if link.member.id != member.id {
                link.emit(ClusterEvent::MemberRemoved(member.clone()));
            }
        }
    }

    pub(crate) fn link(&self, member_id: &MemberId) -> Option<Arc<NodeLink>> {
        self.links.get(member_id).map(|l| l.clone())
    }

    pub(crate) fn map_store(&self, name: &str) -> Arc<MapStore> {
        self.maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MapStore::new()))
            .clone()
    }

    pub(crate) fn queue_store(&self, name: &str, capacity: usize) -> Arc<QueueStore> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueStore::new(capacity)))
            .clone()
    }
}
