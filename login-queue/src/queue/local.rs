use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use super::TaskQueue;
use crate::config::{OrderingMode, QueueSettings};
use crate::{QueueResult, QueueStats, Task, TaskId};

struct Prioritized<T> {
    priority: i32,
    seq: u64,
    task: Task<T>,
}

impl<T> PartialEq for Prioritized<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Prioritized<T> {}

impl<T> PartialOrd for Prioritized<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Prioritized<T> {
    // BinaryHeap pops the greatest: lowest priority value, then earliest offer
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum Storage<T> {
    Fifo(VecDeque<Task<T>>),
    Priority { heap: BinaryHeap<Prioritized<T>>, next_seq: u64 },
}

impl<T> Storage<T> {
    fn new(ordering: OrderingMode) -> Self {
        match ordering {
            OrderingMode::Fifo => Self::Fifo(VecDeque::new()),
            OrderingMode::Priority => Self::Priority {
                heap: BinaryHeap::new(),
                next_seq: 0,
            },
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Fifo(items) => items.len(),
            Self::Priority { heap, .. } => heap.len(),
        }
    }

    fn push(&mut self, task: Task<T>) {
        match self {
            Self::Fifo(items) => items.push_back(task),
            Self::Priority { heap, next_seq } => {
                let seq = *next_seq;
                *next_seq += 1;
                heap.push(Prioritized {
                    priority: task.priority(),
                    seq,
                    task,
                });
            }
        }
    }

    fn pop(&mut self) -> Option<Task<T>> {
        match self {
            Self::Fifo(items) => items.pop_front(),
            Self::Priority { heap, .. } => heap.pop().map(|p| p.task),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::Fifo(items) => items.clear(),
            Self::Priority { heap, .. } => heap.clear(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    offered: AtomicU64,
    deduplicated: AtomicU64,
    rejected: AtomicU64,
    polled: AtomicU64,
}

/// In-process bounded queue fronted by a uniqueness index on the dedup key.
///
/// Duplicate detection is a single index lookup regardless of depth. Every
/// index mutation happens under the storage lock, so a key is indexed exactly
/// while its task is enqueued, even against a concurrent `clear`.
pub struct DeduplicatingQueue<T> {
    name: String,
    capacity: usize,
    dedup_enabled: bool,
    ordering: OrderingMode,
    /// dedup key -> id of the enqueued task holding it
    index: DashMap<String, TaskId>,
    storage: Mutex<Storage<T>>,
    available: Notify,
    counters: Counters,
}

impl<T: Send + Sync + 'static> DeduplicatingQueue<T> {
    /// FIFO queue with deduplication enabled
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self::build(name.into(), capacity, true, OrderingMode::Fifo)
    }

    pub fn with_settings(name: impl Into<String>, settings: &QueueSettings) -> Self {
        Self::build(name.into(), settings.max_size, settings.dedup_enabled, settings.ordering)
    }

    fn build(name: String, capacity: usize, dedup_enabled: bool, ordering: OrderingMode) -> Self {
        debug!(queue = %name, capacity, dedup_enabled, ?ordering, "Creating deduplicating queue");
        Self {
            name,
            capacity,
            dedup_enabled,
            ordering,
            index: DashMap::new(),
            storage: Mutex::new(Storage::new(ordering)),
            available: Notify::new(),
            counters: Counters::default(),
        }
    }

    pub fn with_ordering(self, ordering: OrderingMode) -> Self {
        Self::build(self.name, self.capacity, self.dedup_enabled, ordering)
    }

    pub fn with_dedup(self, enabled: bool) -> Self {
        Self::build(self.name, self.capacity, enabled, self.ordering)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ordering(&self) -> OrderingMode {
        self.ordering
    }

    pub fn dedup_enabled(&self) -> bool {
        self.dedup_enabled
    }

    /// Admit `task` unless its dedup key is already enqueued or the queue is full.
    #[instrument(skip(self, task), fields(queue = %self.name, task_id = %task.id()))]
    pub fn try_offer(&self, task: Task<T>) -> QueueResult<bool> {
        task.validate()?;
        self.counters.offered.fetch_add(1, Ordering::Relaxed);

        let mut storage = self.storage.lock();
        if self.dedup_enabled && self.index.contains_key(task.dedup_key()) {
            drop(storage);
            self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(dedup_key = %task.dedup_key(), "Duplicate task rejected");
            return Ok(false);
        }
        if storage.len() >= self.capacity {
            drop(storage);
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            if task.is_discardable() {
                debug!(capacity = self.capacity, "Queue full, discardable task dropped");
            } else {
                warn!(capacity = self.capacity, "Queue full, task rejected");
            }
            return Ok(false);
        }
        if self.dedup_enabled {
            self.index.insert(task.dedup_key().to_string(), task.id().clone());
        }
        storage.push(task);
        drop(storage);

        self.available.notify_one();
        Ok(true)
    }

    /// Non-blocking dequeue
    pub fn try_poll(&self) -> Option<Task<T>> {
        let mut storage = self.storage.lock();
        let task = storage.pop()?;
        if self.dedup_enabled {
            let id = task.id();
            self.index.remove_if(task.dedup_key(), |_, holder| holder == id);
        }
        drop(storage);
        self.counters.polled.fetch_add(1, Ordering::Relaxed);
        Some(task)
    }

    /// Wait until a task is available. Dropping the future loses nothing.
    pub async fn take_next(&self) -> Task<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so an offer between the check and the
            // await still wakes us
            notified.as_mut().enable();

            if let Some(task) = self.try_poll() {
                return task;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries currently held in the uniqueness index
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    pub fn contains_key(&self, dedup_key: &str) -> bool {
        self.index.contains_key(dedup_key)
    }

    pub fn clear_all(&self) {
        let mut storage = self.storage.lock();
        storage.clear();
        self.index.clear();
        drop(storage);
        info!(queue = %self.name, "Queue cleared");
    }

    pub fn snapshot(&self) -> QueueStats {
        QueueStats {
            offered: self.counters.offered.load(Ordering::Relaxed),
            deduplicated: self.counters.deduplicated.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            polled: self.counters.polled.load(Ordering::Relaxed),
            current_size: self.len(),
            index_size: self.index_len(),
        }
    }

    pub fn reset_counters(&self) {
        self.counters.offered.store(0, Ordering::Relaxed);
        self.counters.deduplicated.store(0, Ordering::Relaxed);
        self.counters.rejected.store(0, Ordering::Relaxed);
        self.counters.polled.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> TaskQueue<T> for DeduplicatingQueue<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn offer(&self, task: Task<T>) -> QueueResult<bool> {
        self.try_offer(task)
    }

    async fn take(&self) -> QueueResult<Option<Task<T>>> {
        Ok(Some(self.take_next().await))
    }

    async fn poll(&self) -> QueueResult<Option<Task<T>>> {
        Ok(self.try_poll())
    }

    async fn poll_timeout(&self, timeout: Duration) -> QueueResult<Option<Task<T>>> {
        Ok(tokio::time::timeout(timeout, self.take_next()).await.ok())
    }

    async fn size(&self) -> usize {
        self.len()
    }

    async fn clear(&self) -> QueueResult<()> {
        self.clear_all();
        Ok(())
    }

    async fn stats(&self) -> QueueStats {
        self.snapshot()
    }

    fn reset_stats(&self) {
        self.reset_counters();
    }
}
