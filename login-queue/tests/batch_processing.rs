use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use login_queue::processor::{BatchProcessor, ProcessorState};
use login_queue::{
    DeduplicatingQueue, HandlerError, HandlerRegistry, QueueMetrics, QueueSettings, RetryPolicy,
    Task, TaskHandler, TaskType,
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Records every task it sees; fails any batch holding a poisoned value
#[derive(Default)]
struct Recording {
    handled: Mutex<HashMap<u32, u32>>,
    batch_sizes: Mutex<Vec<usize>>,
    poison: Option<u32>,
}

impl Recording {
    fn poisoned(value: u32) -> Self {
        Self {
            poison: Some(value),
            ..Default::default()
        }
    }

    fn handled_once(&self, count: u32) -> bool {
        let handled = self.handled.lock();
        handled.len() == count as usize && handled.values().all(|&n| n == 1)
    }
}

#[async_trait]
impl TaskHandler<u32> for Recording {
    fn supported_type(&self) -> TaskType {
        TaskType::new("COUNT")
    }

    async fn handle(&self, task: &Task<u32>) -> Result<(), HandlerError> {
        *self.handled.lock().entry(*task.data()).or_default() += 1;
        Ok(())
    }

    // Handles the whole sub-batch before reporting the poisoned value
    async fn handle_batch(&self, tasks: &[Task<u32>]) -> Result<(), HandlerError> {
        self.batch_sizes.lock().push(tasks.len());
        for task in tasks {
            self.handle(task).await?;
        }
        match self.poison {
            Some(poison) if tasks.iter().any(|t| *t.data() == poison) => {
                Err(HandlerError::permanent(format!("poisoned by {}", poison)))
            }
            _ => Ok(()),
        }
    }
}

fn settings(batch_size: usize, max_batch_size: usize) -> QueueSettings {
    QueueSettings {
        batch_size,
        max_batch_size,
        process_interval: Duration::from_millis(20),
        retry: RetryPolicy::none(),
        ..Default::default()
    }
}

fn processor(
    settings: QueueSettings,
    handler: Arc<dyn TaskHandler<u32>>,
) -> (Arc<DeduplicatingQueue<u32>>, Arc<BatchProcessor<u32>>) {
    let queue = Arc::new(DeduplicatingQueue::with_settings("batches", &settings));
    let handlers = HandlerRegistry::new().with_handler(handler).unwrap();
    let processor = BatchProcessor::new(
        queue.clone(),
        Arc::new(handlers),
        settings,
        Arc::new(QueueMetrics::new("batches")),
    );
    (queue, Arc::new(processor))
}

fn fill(queue: &DeduplicatingQueue<u32>, count: u32) {
    for i in 0..count {
        assert!(queue.try_offer(Task::new("COUNT", i)).unwrap());
    }
}

/// D1. 120 queued tasks with a hard cap of 50 drain in three cycles
#[tokio::test]
async fn test_scenario_c_three_cycles() {
    let handler = Arc::new(Recording::default());
    let (queue, processor) = processor(settings(20, 50), handler.clone());
    fill(&queue, 120);

    let mut sizes = Vec::new();
    while let Some(outcome) = processor.run_cycle().await {
        assert!(outcome.succeeded());
        assert!(outcome.size <= 50);
        sizes.push(outcome.size);
    }

    assert_eq!(sizes, vec![50, 50, 20]);
    assert!(handler.handled_once(120));
    assert_eq!(processor.metrics().batches(), 3);
    assert_eq!(processor.metrics().processed(), 120);
    assert_eq!(processor.metrics().snapshot().queue_size, 0);
}

/// D2. One failing sub-batch does not stop the other workers
#[tokio::test]
async fn test_scenario_d_parallel_failure_is_isolated() {
    let handler = Arc::new(Recording::poisoned(30));
    let (queue, processor) = processor(
        QueueSettings {
            parallel: true,
            workers: 4,
            ..settings(100, 100)
        },
        handler.clone(),
    );
    fill(&queue, 100);

    let outcome = processor.run_cycle().await.unwrap();
    assert_eq!(outcome.size, 100);
    assert!(!outcome.succeeded());
    assert_eq!(outcome.failed, 25);
    assert_eq!(outcome.processed, 75);

    assert!(handler.handled_once(100));
    assert_eq!(*handler.batch_sizes.lock(), vec![25, 25, 25, 25]);

    let metrics = processor.metrics().snapshot();
    assert_eq!(metrics.failed_batches, 1);
    assert_eq!(metrics.success_rate(), 75.0);
}

/// D3. Uneven batches spread over the worker pool without loss
#[tokio::test]
async fn test_parallel_dispatch_uneven_split() {
    let handler = Arc::new(Recording::default());
    let (queue, processor) = processor(
        QueueSettings {
            parallel: true,
            workers: 4,
            ..settings(10, 10)
        },
        handler.clone(),
    );
    fill(&queue, 10);

    let outcome = processor.run_cycle().await.unwrap();
    assert!(outcome.succeeded());
    assert!(handler.handled_once(10));

    let mut sizes = handler.batch_sizes.lock().clone();
    sizes.sort();
    assert_eq!(sizes, vec![1, 3, 3, 3]);
}

struct Flaky {
    failures_left: AtomicU32,
    calls: AtomicU32,
}

#[async_trait]
impl TaskHandler<u32> for Flaky {
    fn supported_type(&self) -> TaskType {
        TaskType::new("COUNT")
    }

    async fn handle(&self, _task: &Task<u32>) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(HandlerError::retryable("database busy"));
        }
        Ok(())
    }
}

/// D4. Retryable handler failures are retried within one cycle
#[tokio::test]
async fn test_retryable_failures_recover() {
    let handler = Arc::new(Flaky {
        failures_left: AtomicU32::new(2),
        calls: AtomicU32::new(0),
    });
    let (queue, processor) = processor(
        QueueSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(5),
            },
            ..settings(20, 50)
        },
        handler.clone(),
    );
    fill(&queue, 1);

    let outcome = processor.run_cycle().await.unwrap();
    assert!(outcome.succeeded());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}

/// D5. Exhausted retries fail the batch and drop the tasks
#[tokio::test]
async fn test_exhausted_retries_fail_the_batch() {
    let handler = Arc::new(Flaky {
        failures_left: AtomicU32::new(u32::MAX),
        calls: AtomicU32::new(0),
    });
    let (queue, processor) = processor(
        QueueSettings {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                multiplier: 1.0,
                max_delay: Duration::from_millis(1),
            },
            ..settings(20, 50)
        },
        handler.clone(),
    );
    fill(&queue, 5);

    let outcome = processor.run_cycle().await.unwrap();
    assert_eq!(outcome.failed, 5);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert!(queue.is_empty());
    assert_eq!(queue.index_len(), 0);
}

/// Fails the first time it meets one value
struct FailOnceAt {
    value: u32,
    tripped: AtomicBool,
    handled: Mutex<HashMap<u32, u32>>,
}

#[async_trait]
impl TaskHandler<u32> for FailOnceAt {
    fn supported_type(&self) -> TaskType {
        TaskType::new("COUNT")
    }

    async fn handle(&self, task: &Task<u32>) -> Result<(), HandlerError> {
        *self.handled.lock().entry(*task.data()).or_default() += 1;
        if *task.data() == self.value && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(HandlerError::retryable("lock timeout"));
        }
        Ok(())
    }
}

/// D8. A serial retry replays the whole group, finished tasks included
#[tokio::test]
async fn test_serial_retry_is_at_least_once() {
    let handler = Arc::new(FailOnceAt {
        value: 1,
        tripped: AtomicBool::new(false),
        handled: Mutex::new(HashMap::new()),
    });
    let (queue, processor) = processor(
        QueueSettings {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                multiplier: 1.0,
                max_delay: Duration::from_millis(1),
            },
            ..settings(20, 50)
        },
        handler.clone(),
    );
    fill(&queue, 3);

    let outcome = processor.run_cycle().await.unwrap();
    assert!(outcome.succeeded());
    assert_eq!(outcome.processed, 3);

    let handled = handler.handled.lock();
    assert_eq!(handled[&0], 2);
    assert_eq!(handled[&1], 2);
    assert_eq!(handled[&2], 1);
}

/// Blocks inside the handler until the test lets it go
struct Gated {
    gate: Semaphore,
}

#[async_trait]
impl TaskHandler<u32> for Gated {
    fn supported_type(&self) -> TaskType {
        TaskType::new("COUNT")
    }

    async fn handle(&self, _task: &Task<u32>) -> Result<(), HandlerError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| HandlerError::permanent(e.to_string()))?;
        Ok(())
    }
}

/// D6. A cycle that finds the processor busy is skipped
#[tokio::test]
async fn test_overlapping_cycles_are_skipped() {
    let handler = Arc::new(Gated {
        gate: Semaphore::new(0),
    });
    let (queue, processor) = processor(settings(20, 50), handler.clone());
    fill(&queue, 3);

    let running = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run_cycle().await })
    };
    while processor.state() != ProcessorState::Dispatching {
        tokio::task::yield_now().await;
    }

    fill_more(&queue);
    assert!(processor.run_cycle().await.is_none());

    handler.gate.add_permits(10);
    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.size, 3);
    assert_eq!(processor.state(), ProcessorState::Idle);
    assert_eq!(queue.len(), 1);
}

fn fill_more(queue: &DeduplicatingQueue<u32>) {
    assert!(queue.try_offer(Task::new("COUNT", 99)).unwrap());
}

/// D7. The scheduled loop drains the queue until shut down
#[test_log::test(tokio::test)]
async fn test_scheduled_processing_drains_queue() {
    let handler = Arc::new(Recording::default());
    let (queue, processor) = processor(settings(20, 50), handler.clone());
    fill(&queue, 70);

    let handle = processor.start();
    for _ in 0..200 {
        if handler.handled.lock().len() == 70 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await.unwrap();

    assert!(handler.handled_once(70));
    assert!(queue.is_empty());
    assert_eq!(processor.metrics().batches(), 2);
}
