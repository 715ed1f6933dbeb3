use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Count, total and maximum of a timed operation
#[derive(Debug, Default)]
struct Timing {
    count: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Timing {
    fn record(&self, elapsed: Duration) {
        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TimingSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_micros.load(Ordering::Relaxed);
        TimingSnapshot {
            count,
            avg_ms: if count == 0 { 0.0 } else { total as f64 / count as f64 / 1000.0 },
            max_ms: self.max_micros.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.total_micros.store(0, Ordering::Relaxed);
        self.max_micros.store(0, Ordering::Relaxed);
    }
}

/// Live counters of one queue's processing
#[derive(Debug)]
pub struct QueueMetrics {
    queue: String,
    processed: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
    failed_batches: AtomicU64,
    queue_size: AtomicU64,
    capacity: AtomicU64,
    batch_timing: Timing,
    task_timing: Timing,
}

impl QueueMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            failed_batches: AtomicU64::new(0),
            queue_size: AtomicU64::new(0),
            capacity: AtomicU64::new(0),
            batch_timing: Timing::default(),
            task_timing: Timing::default(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// One dispatched batch; it failed if any of its tasks failed
    pub fn record_batch(&self, processed: usize, failed: usize, elapsed: Duration) {
        self.processed.fetch_add(processed as u64, Ordering::Relaxed);
        self.failed.fetch_add(failed as u64, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        if failed > 0 {
            self.failed_batches.fetch_add(1, Ordering::Relaxed);
        }
        self.batch_timing.record(elapsed);
    }

    /// One task handled outside a batch
    pub fn record_task(&self, success: bool, elapsed: Duration) {
        if success {
            self.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.task_timing.record(elapsed);
    }

    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.store(size as u64, Ordering::Relaxed);
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity as u64, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue: self.queue.clone(),
            timestamp: Utc::now(),
            processed: self.processed(),
            failed: self.failed(),
            batches: self.batches(),
            failed_batches: self.failed_batches(),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            capacity: self.capacity.load(Ordering::Relaxed),
            batch_timing: self.batch_timing.snapshot(),
            task_timing: self.task_timing.snapshot(),
        }
    }

    pub fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.batches.store(0, Ordering::Relaxed);
        self.failed_batches.store(0, Ordering::Relaxed);
        self.batch_timing.reset();
        self.task_timing.reset();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingSnapshot {
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

/// Point-in-time view of a queue's metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queue: String,
    pub timestamp: DateTime<Utc>,
    pub processed: u64,
    pub failed: u64,
    pub batches: u64,
    pub failed_batches: u64,
    pub queue_size: u64,
    pub capacity: u64,
    pub batch_timing: TimingSnapshot,
    pub task_timing: TimingSnapshot,
}

impl MetricsSnapshot {
    /// Success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.processed + self.failed;
        if total == 0 {
            100.0
        } else {
            (self.processed as f64 / total as f64) * 100.0
        }
    }

    /// Queue fill level as percentage
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.queue_size as f64 / self.capacity as f64) * 100.0
        }
    }
}

/// Metrics of every queue, created on first use
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queues: DashMap<String, Arc<QueueMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_queue(&self, queue: &str) -> Arc<QueueMetrics> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(QueueMetrics::new(queue)))
            .clone()
    }

    pub fn get(&self, queue: &str) -> Option<Arc<QueueMetrics>> {
        self.queues.get(queue).map(|m| m.clone())
    }

    pub fn snapshot_all(&self) -> Vec<MetricsSnapshot> {
        let mut snapshots: Vec<MetricsSnapshot> =
            self.queues.iter().map(|m| m.snapshot()).collect();
        snapshots.sort_by(|a, b| a.queue.cmp(&b.queue));
        snapshots
    }
}
