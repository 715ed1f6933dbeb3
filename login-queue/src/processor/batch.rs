use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use super::retry::{retry_with_backoff, RetryPolicy};
use crate::config::QueueSettings;
use crate::handler::{HandlerRegistry, TaskHandler};
use crate::observability::QueueMetrics;
use crate::queue::TaskQueue;
use crate::{QueueError, QueueResult, Task, TaskType};

/// Where a processor is in its scheduling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProcessorState {
    Idle = 0,
    Collecting = 1,
    Dispatching = 2,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Collecting,
            2 => Self::Dispatching,
            _ => Self::Idle,
        }
    }
}

/// Returns the processor to `Idle` however the cycle ends
struct CycleGuard<'a>(&'a AtomicU8);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(ProcessorState::Idle as u8, Ordering::SeqCst);
    }
}

/// Result of one scheduling cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub size: usize,
    pub processed: usize,
    pub failed: usize,
    pub task_types: Vec<TaskType>,
    pub elapsed_ms: u64,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Outcome of handing one group of tasks to a handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub processed: usize,
    pub failed: usize,
}

impl DispatchOutcome {
    fn add(&mut self, other: DispatchOutcome) {
        self.processed += other.processed;
        self.failed += other.failed;
    }
}

/// Handle for a running processor loop
pub struct ProcessorHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Stop scheduling; a cycle in flight finishes first
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Processor join error: {}", e)))
    }
}

/// Drains a queue in bounded batches and hands them to the registered handlers.
///
/// Each cycle moves `IDLE -> COLLECTING -> DISPATCHING -> IDLE`. A cycle that
/// finds the processor busy is skipped.
pub struct BatchProcessor<T: Send + Sync + 'static> {
    queue: Arc<dyn TaskQueue<T>>,
    handlers: Arc<HandlerRegistry<T>>,
    settings: QueueSettings,
    metrics: Arc<QueueMetrics>,
    state: AtomicU8,
}

impl<T: Send + Sync + 'static> BatchProcessor<T> {
    pub fn new(
        queue: Arc<dyn TaskQueue<T>>,
        handlers: Arc<HandlerRegistry<T>>,
        settings: QueueSettings,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        metrics.set_capacity(settings.max_size);
        Self {
            queue,
            handlers,
            settings,
            metrics,
            state: AtomicU8::new(ProcessorState::Idle as u8),
        }
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    /// The whole queue when it fits the preferred size, else up to the hard cap
    pub fn batch_size_for(&self, queue_size: usize) -> usize {
        if queue_size <= self.settings.batch_size {
            queue_size
        } else {
            queue_size.min(self.settings.max_batch_size)
        }
    }

    /// Run one scheduling cycle. `None` when the queue was empty or a cycle
    /// was already running.
    #[instrument(skip(self), fields(queue = %self.queue.name()))]
    pub async fn run_cycle(&self) -> Option<BatchOutcome> {
        if self
            .state
            .compare_exchange(
                ProcessorState::Idle as u8,
                ProcessorState::Collecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            debug!("Previous cycle still running, skipping");
            return None;
        }
        let _guard = CycleGuard(&self.state);

        let queue_size = self.queue.size().await;
        self.metrics.set_queue_size(queue_size);
        if queue_size == 0 {
            return None;
        }

        let wanted = self.batch_size_for(queue_size);
        let mut batch = Vec::with_capacity(wanted);
        while batch.len() < wanted {
            match self.queue.poll().await {
                Ok(Some(task)) => batch.push(task),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Poll failed while collecting batch");
                    break;
                }
            }
        }
        if batch.is_empty() {
            return None;
        }

        self.state.store(ProcessorState::Dispatching as u8, Ordering::SeqCst);
        let started = Instant::now();
        let size = batch.len();

        let mut groups: BTreeMap<TaskType, Vec<Task<T>>> = BTreeMap::new();
        for task in batch {
            groups.entry(task.task_type().clone()).or_default().push(task);
        }
        let task_types: Vec<TaskType> = groups.keys().cloned().collect();

        let mut total = DispatchOutcome::default();
        for (task_type, tasks) in groups {
            total.add(self.dispatch_group(&task_type, tasks).await);
        }

        let elapsed = started.elapsed();
        self.metrics.record_batch(total.processed, total.failed, elapsed);
        self.metrics.set_queue_size(self.queue.size().await);

        let outcome = BatchOutcome {
            size,
            processed: total.processed,
            failed: total.failed,
            task_types,
            elapsed_ms: elapsed.as_millis() as u64,
        };
        if outcome.succeeded() {
            info!(size, elapsed_ms = outcome.elapsed_ms, "Batch processed");
        } else {
            error!(size, failed = outcome.failed, "Batch failed");
        }
        Some(outcome)
    }

    async fn dispatch_group(&self, task_type: &TaskType, tasks: Vec<Task<T>>) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(task_type) else {
            error!(%task_type, count = tasks.len(), "No handler registered for task type");
            return DispatchOutcome {
                processed: 0,
                failed: tasks.len(),
            };
        };

        let (accepted, refused): (Vec<Task<T>>, Vec<Task<T>>) =
            tasks.into_iter().partition(|task| handler.can_handle(task));
        if !refused.is_empty() {
            warn!(%task_type, count = refused.len(), "Handler refused tasks");
        }

        let mut outcome = if accepted.is_empty() {
            DispatchOutcome::default()
        } else if self.settings.parallel {
            dispatch_parallel(handler, accepted, self.settings.workers, &self.settings.retry).await
        } else {
            dispatch_serial(handler.as_ref(), &accepted, &self.settings.retry).await
        };
        outcome.failed += refused.len();
        outcome
    }

    /// Run cycles on the configured interval until the handle is shut down.
    pub fn start(self: &Arc<Self>) -> ProcessorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let processor = self.clone();
        let period = self.settings.process_interval;

        let join_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(queue = %processor.queue_name(), ?period, "Batch processor started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!(queue = %processor.queue_name(), "Batch processor shutdown requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        processor.run_cycle().await;
                    }
                }
            }
        });

        ProcessorHandle {
            shutdown_tx,
            join_handle,
        }
    }
}

/// Hand the whole group to the handler at once; the group succeeds or fails as one.
///
/// Delivery is at-least-once: a retry replays the whole group, so tasks the
/// handler already finished before a retryable error are handled again.
/// Handlers that retry should be idempotent per task.
pub async fn dispatch_serial<T: Send + Sync + 'static>(
    handler: &dyn TaskHandler<T>,
    tasks: &[Task<T>],
    retry: &RetryPolicy,
) -> DispatchOutcome {
    match retry_with_backoff(retry, "handle_batch", || handler.handle_batch(tasks)).await {
        Ok(()) => DispatchOutcome {
            processed: tasks.len(),
            failed: 0,
        },
        Err(e) => {
            error!(count = tasks.len(), error = %e, "Batch handler failed");
            DispatchOutcome {
                processed: 0,
                failed: tasks.len(),
            }
        }
    }
}

/// Split the group into `workers` even sub-batches and handle them concurrently.
///
/// Every sub-batch runs to completion; a failing one does not cancel the others.
pub async fn dispatch_parallel<T: Send + Sync + 'static>(
    handler: Arc<dyn TaskHandler<T>>,
    tasks: Vec<Task<T>>,
    workers: usize,
    retry: &RetryPolicy,
) -> DispatchOutcome {
    let workers = workers.max(1);
    let chunk_size = tasks.len().div_ceil(workers).max(1);
    let permits = Arc::new(Semaphore::new(workers));

    let mut sub_batches = Vec::with_capacity(workers);
    let mut remaining = tasks.into_iter();
    loop {
        let chunk: Vec<Task<T>> = remaining.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        sub_batches.push(chunk);
    }

    let mut set = JoinSet::new();
    for (worker, chunk) in sub_batches.into_iter().enumerate() {
        let handler = handler.clone();
        let permits = permits.clone();
        let retry = retry.clone();
        set.spawn(async move {
            let count = chunk.len();
            let Ok(_permit) = permits.acquire_owned().await else {
                return DispatchOutcome { processed: 0, failed: count };
            };
            debug!(worker, count, "Worker handling sub-batch");
            let outcome = dispatch_serial(handler.as_ref(), &chunk, &retry).await;
            if outcome.failed > 0 {
                warn!(worker, count, "Sub-batch failed");
            }
            outcome
        });
    }

    let mut total = DispatchOutcome::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => total.add(outcome),
            Err(e) => error!(error = %e, "Worker task panicked"),
        }
    }
    total
}
