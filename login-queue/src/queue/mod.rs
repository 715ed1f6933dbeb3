//! The task source contract and its two implementations.
//!
//! [`DeduplicatingQueue`] keeps storage and the uniqueness index in process.
//! [`DistributedQueue`] binds the same contract onto a replicated queue and a
//! replicated map so that admission and uniqueness hold cluster-wide.

pub mod distributed;
pub mod local;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{QueueError, QueueResult, QueueStats, Task};

pub use distributed::DistributedQueue;
pub use local::DeduplicatingQueue;

/// A bounded, deduplicating source of tasks.
///
/// `offer` never blocks and reports duplicates and a full queue as `false`;
/// only malformed input is an error. A successful dequeue releases the
/// task's dedup key before returning.
#[async_trait]
pub trait TaskQueue<T: Send + Sync + 'static>: Send + Sync {
    fn name(&self) -> &str;

    async fn offer(&self, task: Task<T>) -> QueueResult<bool>;

    /// Wait for the next task. `None` only when the transport failed.
    async fn take(&self) -> QueueResult<Option<Task<T>>>;

    async fn poll(&self) -> QueueResult<Option<Task<T>>>;

    async fn poll_timeout(&self, timeout: Duration) -> QueueResult<Option<Task<T>>>;

    /// [`take`](Self::take) that gives up with [`QueueError::Interrupted`] once
    /// `cancel` fires. A cancelled wait leaves the queue and its index untouched.
    async fn take_until(&self, cancel: &CancellationToken) -> QueueResult<Option<Task<T>>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Interrupted),
            task = self.take() => task,
        }
    }

    async fn size(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    /// Drop every task and every index entry
    async fn clear(&self) -> QueueResult<()>;

    async fn stats(&self) -> QueueStats;

    /// Zero the counters without touching the contents
    fn reset_stats(&self);
}
