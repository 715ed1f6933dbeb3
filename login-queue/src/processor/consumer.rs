use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::retry::retry_with_backoff;
use crate::config::ConsumerConfig;
use crate::handler::HandlerRegistry;
use crate::observability::QueueMetrics;
use crate::queue::{DistributedQueue, TaskQueue};
use crate::{QueueError, QueueResult, Task};

/// Handle for a running consumer pool
pub struct ConsumerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Stop all workers and wait for the task in hand to finish
    pub async fn shutdown(self) -> QueueResult<()> {
        self.cancel.cancel();
        for task in self.tasks {
            task.await
                .map_err(|e| QueueError::Internal(format!("Consumer join error: {}", e)))?;
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Long-running workers draining the distributed queue one task at a time.
///
/// Alongside the workers run a periodic status log and a sweep of expired
/// dedup entries.
pub struct ConsumerPool<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    queue: Arc<DistributedQueue<T>>,
    handlers: Arc<HandlerRegistry<T>>,
    config: ConsumerConfig,
    metrics: Arc<QueueMetrics>,
}

impl<T> ConsumerPool<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        queue: Arc<DistributedQueue<T>>,
        handlers: Arc<HandlerRegistry<T>>,
        config: ConsumerConfig,
        metrics: Arc<QueueMetrics>,
    ) -> Arc<Self> {
        metrics.set_capacity(queue.config().capacity);
        Arc::new(Self {
            queue,
            handlers,
            config,
            metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    pub fn start(self: &Arc<Self>) -> ConsumerHandle {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(self.config.consumers + 2);

        for worker in 0..self.config.consumers.max(1) {
            let pool = self.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move { pool.worker_loop(worker, cancel).await }));
        }

        let pool = self.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { pool.status_loop(token).await }));

        let pool = self.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { pool.cleanup_loop(token).await }));

        info!(
            queue = %self.queue.name(),
            consumers = self.config.consumers.max(1),
            "Consumer pool started"
        );
        ConsumerHandle { cancel, tasks }
    }

    async fn worker_loop(&self, worker: usize, cancel: CancellationToken) {
        debug!(worker, "Consumer started");
        let idle = self.config.poll_timeout.min(Duration::from_secs(1));
        loop {
            let polled_at = Instant::now();
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.queue.poll_timeout(self.config.poll_timeout) => next,
            };
            match next {
                Ok(Some(task)) => self.consume(worker, task).await,
                // An early empty poll means the cluster is unreachable
                Ok(None) if polled_at.elapsed() < self.config.poll_timeout => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(idle) => {}
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker, error = %e, "Consumer poll failed");
                }
            }
        }
        debug!(worker, "Consumer stopped");
    }

    /// Handle one task with retries and record the outcome
    pub async fn consume(&self, worker: usize, task: Task<T>) {
        let started = Instant::now();
        let handler = match self.handlers.resolve(task.task_type()) {
            Ok(handler) => handler,
            Err(e) => {
                error!(worker, task_id = %task.id(), error = %e, "Dropping task");
                self.metrics.record_task(false, started.elapsed());
                return;
            }
        };

        let result = retry_with_backoff(&self.config.retry, "handle", || handler.handle(&task)).await;
        match result {
            Ok(()) => {
                debug!(worker, task_id = %task.id(), "Task processed");
                self.metrics.record_task(true, started.elapsed());
            }
            Err(e) => {
                error!(worker, task_id = %task.id(), error = %e, "Task failed");
                self.metrics.record_task(false, started.elapsed());
            }
        }
    }

    async fn status_loop(&self, cancel: CancellationToken) {
        let period = self.config.status_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = self.queue.stats().await;
                    self.metrics.set_queue_size(stats.current_size);
                    let snapshot = self.metrics.snapshot();
                    info!(
                        queue = %self.queue.name(),
                        size = stats.current_size,
                        index_size = stats.index_size,
                        processed = snapshot.processed,
                        failed = snapshot.failed,
                        success_rate = snapshot.success_rate(),
                        "Distributed queue status"
                    );
                }
            }
        }
    }

    async fn cleanup_loop(&self, cancel: CancellationToken) {
        let period = self.config.cleanup_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.queue.cleanup_expired_index().await;
                }
            }
        }
    }
}
