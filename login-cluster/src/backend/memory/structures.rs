use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::grid::NodeLink;
use crate::backend::{ReplicatedMap, ReplicatedQueue};
use crate::{ClusterError, ClusterResult};

fn guard(link: &NodeLink) -> ClusterResult<()> {
    if !link.running.load(Ordering::SeqCst) {
        return Err(ClusterError::NotRunning);
    }
    if !link.reachable.load(Ordering::SeqCst) {
        return Err(ClusterError::unreachable(format!(
            "member {} is partitioned from the cluster",
            link.member.id
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct MapEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MapEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Grid-wide storage behind one named map.
pub(crate) struct MapStore {
    entries: DashMap<String, MapEntry>,
}

impl MapStore {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn put_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        let fresh = MapEntry {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        };
        // The shard lock held by `entry` makes test-and-set atomic
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        }
    }

    fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(key)
            .map(|(_, entry)| !entry.is_expired(now))
            .unwrap_or(false)
    }

    fn remove_if_value(&self, key: &str, expected: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove_if(key, |_, entry| entry.value == expected)
            .map(|(_, entry)| !entry.is_expired(now))
            .unwrap_or(false)
    }

    fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

/// A node's handle on a named map.
pub struct MemoryMap {
    pub(crate) store: Arc<MapStore>,
    pub(crate) link: Arc<NodeLink>,
}

impl MemoryMap {
    /// Read the stored value of a live entry
    pub fn get(&self, key: &str) -> ClusterResult<Option<String>> {
        guard(&self.link)?;
        Ok(self.store.get(key))
    }
}

#[async_trait]
impl ReplicatedMap for MemoryMap {
    async fn put_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> ClusterResult<bool> {
        guard(&self.link)?;
        Ok(self.store.put_if_absent(key, value, ttl))
    }

    async fn remove(&self, key: &str) -> ClusterResult<bool> {
        guard(&self.link)?;
        Ok(self.store.remove(key))
    }

    async fn remove_if_value(&self, key: &str, expected: &str) -> ClusterResult<bool> {
        guard(&self.link)?;
        Ok(self.store.remove_if_value(key, expected))
    }

    async fn contains_key(&self, key: &str) -> ClusterResult<bool> {
        guard(&self.link)?;
        Ok(self.store.get(key).is_some())
    }

    async fn len(&self) -> ClusterResult<usize> {
        guard(&self.link)?;
        Ok(self.store.len())
    }

    async fn clear(&self) -> ClusterResult<()> {
        guard(&self.link)?;
        self.store.entries.clear();
        Ok(())
    }

    async fn evict_expired(&self) -> ClusterResult<usize> {
        guard(&self.link)?;
        Ok(self.store.evict_expired())
    }
}

/// Grid-wide storage behind one named queue.
pub(crate) struct QueueStore {
    items: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    available: Notify,
}

impl QueueStore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            available: Notify::new(),
        }
    }

    fn offer(&self, item: Vec<u8>) -> bool {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return false;
            }
            items.push_back(item);
        }
        self.available.notify_one();
        true
    }

    fn poll(&self) -> Option<Vec<u8>> {
        self.items.lock().pop_front()
    }

    async fn take(&self) -> Vec<u8> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.poll() {
                return item;
            }
            notified.await;
        }
    }
}

/// A node's handle on a named queue.
pub struct MemoryQueue {
    pub(crate) store: Arc<QueueStore>,
    pub(crate) link: Arc<NodeLink>,
}

#[async_trait]
impl ReplicatedQueue for MemoryQueue {
    async fn offer(&self, item: Vec<u8>) -> ClusterResult<bool> {
        guard(&self.link)?;
        Ok(self.store.offer(item))
    }

    async fn poll(&self) -> ClusterResult<Option<Vec<u8>>> {
        guard(&self.link)?;
        Ok(self.store.poll())
    }

    async fn poll_timeout(&self, timeout: Duration) -> ClusterResult<Option<Vec<u8>>> {
        guard(&self.link)?;
        Ok(tokio::time::timeout(timeout, self.store.take()).await.ok())
    }

    async fn take(&self) -> ClusterResult<Vec<u8>> {
        guard(&self.link)?;
        Ok(self.store.take().await)
    }

    async fn len(&self) -> ClusterResult<usize> {
        guard(&self.link)?;
        Ok(self.store.items.lock().len())
    }

    async fn clear(&self) -> ClusterResult<()> {
        guard(&self.link)?;
        self.store.items.lock().clear();
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.store.capacity
    }
}
