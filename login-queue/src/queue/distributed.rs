use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use login_cluster::{ClusterError, ClusterSubstrate, ReplicatedMap, ReplicatedQueue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::TaskQueue;
use crate::config::{DedupFailurePolicy, DistributedQueueConfig};
use crate::{QueueError, QueueResult, QueueStats, Task};

#[derive(Debug, Default)]
struct Counters {
    offered: AtomicU64,
    deduplicated: AtomicU64,
    rejected: AtomicU64,
    polled: AtomicU64,
    transport_errors: AtomicU64,
}

/// Deduplicating queue whose storage and index live in the cluster.
///
/// The replicated map's `put_if_absent` is the serialization point: two
/// producers on different nodes offering the same dedup key resolve to one
/// admitted task. Transport failures never cross this boundary as errors;
/// `offer` turns them into `false` and dequeues into `None`. When the index
/// itself is unreachable the [`DedupFailurePolicy`] decides: fail-open admits
/// the task and may let a duplicate through during a partition, fail-closed
/// rejects it and may drop work.
///
/// Index entries hold the id of the task that reserved the key, and a
/// dequeue only releases an entry it holds. A task admitted without an
/// index entry can therefore never free a key reserved by a later task.
pub struct DistributedQueue<T> {
    name: String,
    map: Arc<dyn ReplicatedMap>,
    queue: Arc<dyn ReplicatedQueue>,
    config: DistributedQueueConfig,
    counters: Counters,
    _task: PhantomData<fn() -> T>,
}

impl<T> DistributedQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Bind to the named map and queue of a cluster node
    pub fn new(substrate: &dyn ClusterSubstrate, config: DistributedQueueConfig) -> Self {
        let map = substrate.map(&config.dedup_map_name);
        let queue = substrate.queue(&config.queue_name, config.capacity);
        Self::with_structures(map, queue, config)
    }

    pub fn with_structures(
        map: Arc<dyn ReplicatedMap>,
        queue: Arc<dyn ReplicatedQueue>,
        config: DistributedQueueConfig,
    ) -> Self {
        info!(
            queue = %config.queue_name,
            dedup_map = %config.dedup_map_name,
            capacity = queue.capacity(),
            failure_policy = %config.failure_policy,
            "Distributed queue bound"
        );
        Self {
            name: config.queue_name.clone(),
            map,
            queue,
            config,
            counters: Counters::default(),
            _task: PhantomData,
        }
    }

    pub fn config(&self) -> &DistributedQueueConfig {
        &self.config
    }

    /// Transport failures swallowed at the adapter boundary
    pub fn transport_errors(&self) -> u64 {
        self.counters.transport_errors.load(Ordering::Relaxed)
    }

    fn transport_failure(&self, operation: &str, err: &ClusterError) {
        self.counters.transport_errors.fetch_add(1, Ordering::Relaxed);
        warn!(queue = %self.name, operation, error = %err, "Cluster operation failed");
    }

    fn encode(task: &Task<T>) -> QueueResult<Vec<u8>> {
        Ok(serde_json::to_vec(task)?)
    }

    async fn release(&self, dedup_key: &str, holder: &str) {
        match self.map.remove_if_value(dedup_key, holder).await {
            Ok(true) => {}
            Ok(false) => debug!(queue = %self.name, dedup_key, holder, "Dedup key held by another task, left in place"),
            Err(e) => self.transport_failure("release dedup key", &e),
        }
    }

    /// Decode a dequeued item and release its dedup key
    async fn accept(&self, bytes: Vec<u8>) -> Option<Task<T>> {
        let task: Task<T> = match serde_json::from_slice(&bytes) {
            Ok(task) => task,
            Err(e) => {
                error!(queue = %self.name, error = %e, "Dropping undecodable queue item");
                return None;
            }
        };
        self.release(task.dedup_key(), task.id().as_str()).await;
        self.counters.polled.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %self.name, task_id = %task.id(), "Task dequeued");
        Some(task)
    }

    async fn accept_result(
        &self,
        operation: &str,
        result: Result<Option<Vec<u8>>, ClusterError>,
    ) -> Option<Task<T>> {
        match result {
            Ok(Some(bytes)) => self.accept(bytes).await,
            Ok(None) => None,
            Err(e) => {
                self.transport_failure(operation, &e);
                None
            }
        }
    }

    /// Drop index entries whose TTL elapsed
    pub async fn cleanup_expired_index(&self) -> usize {
        match self.map.evict_expired().await {
            Ok(evicted) => {
                if evicted > 0 {
                    info!(queue = %self.name, evicted, "Expired dedup entries removed");
                }
                evicted
            }
            Err(e) => {
                self.transport_failure("evict expired", &e);
                0
            }
        }
    }
}

#[async_trait]
impl<T> TaskQueue<T> for DistributedQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, task), fields(queue = %self.name, task_id = %task.id()))]
    async fn offer(&self, task: Task<T>) -> QueueResult<bool> {
        task.validate()?;
        let payload = Self::encode(&task)?;
        self.counters.offered.fetch_add(1, Ordering::Relaxed);

        let key = task.dedup_key();
        let holder = task.id().as_str();
        let indexed = match self
            .map
            .put_if_absent(key, holder.to_string(), self.config.dedup_ttl)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                debug!(dedup_key = %key, "Duplicate task rejected cluster-wide");
                return Ok(false);
            }
            Err(e) => {
                self.transport_failure("dedup check", &e);
                match self.config.failure_policy {
                    DedupFailurePolicy::FailOpen => {
                        warn!(dedup_key = %key, "Dedup index unreachable, admitting without index entry");
                        false
                    }
                    DedupFailurePolicy::FailClosed => {
                        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(dedup_key = %key, "Dedup index unreachable, task rejected");
                        return Ok(false);
                    }
                }
            }
        };

        match self.queue.offer(payload).await {
            Ok(true) => return Ok(true),
            Ok(false) => {
                if task.is_discardable() {
                    debug!("Distributed queue full, discardable task dropped");
                } else {
                    warn!("Distributed queue full, task rejected");
                }
            }
            Err(e) => self.transport_failure("enqueue", &e),
        }

        if indexed {
            self.release(key, holder).await;
        }
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        Ok(false)
    }

    async fn take(&self) -> QueueResult<Option<Task<T>>> {
        let result = self.queue.take().await.map(Some);
        Ok(self.accept_result("take", result).await)
    }

    /// Only the wait is cancellable. An item already taken off the cluster
    /// queue is always released and returned, even if `cancel` fires meanwhile.
    async fn take_until(&self, cancel: &CancellationToken) -> QueueResult<Option<Task<T>>> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Interrupted),
            result = self.queue.take() => result.map(Some),
        };
        Ok(self.accept_result("take", result).await)
    }

    async fn poll(&self) -> QueueResult<Option<Task<T>>> {
        let result = self.queue.poll().await;
        Ok(self.accept_result("poll", result).await)
    }

    async fn poll_timeout(&self, timeout: Duration) -> QueueResult<Option<Task<T>>> {
        let result = self.queue.poll_timeout(timeout).await;
        Ok(self.accept_result("poll", result).await)
    }

    async fn size(&self) -> usize {
        match self.queue.len().await {
            Ok(len) => len,
            Err(e) => {
                self.transport_failure("size", &e);
                0
            }
        }
    }

    async fn clear(&self) -> QueueResult<()> {
        let mut cleared = true;
        if let Err(e) = self.queue.clear().await {
            self.transport_failure("clear queue", &e);
            cleared = false;
        }
        if let Err(e) = self.map.clear().await {
            self.transport_failure("clear dedup index", &e);
            cleared = false;
        }
        if cleared {
            info!(queue = %self.name, "Distributed queue cleared");
        }
        Ok(())
    }

    async fn stats(&self) -> QueueStats {
        let index_size = match self.map.len().await {
            Ok(len) => len,
            Err(e) => {
                self.transport_failure("index size", &e);
                0
            }
        };
        QueueStats {
            offered: self.counters.offered.load(Ordering::Relaxed),
            deduplicated: self.counters.deduplicated.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            polled: self.counters.polled.load(Ordering::Relaxed),
            current_size: self.size().await,
            index_size,
        }
    }

    fn reset_stats(&self) {
        self.counters.offered.store(0, Ordering::Relaxed);
        self.counters.deduplicated.store(0, Ordering::Relaxed);
        self.counters.rejected.store(0, Ordering::Relaxed);
        self.counters.polled.store(0, Ordering::Relaxed);
        self.counters.transport_errors.store(0, Ordering::Relaxed);
    }
}
