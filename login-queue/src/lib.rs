//! # login-queue
//!
//! Deduplicating task queue for login-event ingestion.
//!
//! - **At-most-once admission**: a task whose dedup key is already pending is
//!   rejected in O(1), locally or cluster-wide
//! - **Non-blocking offers**: duplicates and a full queue are reported as
//!   `false`, never as errors
//! - **Batch dispatch**: bounded batches handed to typed handlers, serially
//!   or split across a worker pool, with bounded retry
//! - **Distributed mode**: the same contract over a replicated queue and map,
//!   with a configurable fail-open or fail-closed dedup policy
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use login_queue::prelude::*;
//!
//! struct PersistLogins;
//!
//! #[async_trait]
//! impl TaskHandler<LoginRecord> for PersistLogins {
//!     fn supported_type(&self) -> TaskType {
//!         TaskType::login_record()
//!     }
//!
//!     async fn handle(&self, task: &Task<LoginRecord>) -> Result<(), HandlerError> {
//!         println!("login of {}", task.data().uid);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> QueueResult<()> {
//! let handlers = HandlerRegistry::<LoginRecord>::new().with_handler(Arc::new(PersistLogins))?;
//! let registry = Arc::new(QueueRegistry::new(QueueConfig::default(), Arc::new(handlers)));
//! registry.start_processing(LOGIN_QUEUE_NAME);
//!
//! let service = LoginIngestService::local(registry.clone());
//! let record = LoginRecord::new("u-1", "alice", "10.0.0.1", "PASSWORD", "trace-1");
//! assert!(service.enqueue(record.clone()).await?);
//! assert!(!service.enqueue(record).await?); // still pending
//!
//! registry.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod login;
pub mod manager;
pub mod observability;
pub mod processor;
pub mod queue;
pub mod types;

pub use config::{
    ConsumerConfig, DedupFailurePolicy, DistributedQueueConfig, OrderingMode, QueueConfig,
    QueueSettings,
};
pub use error::{HandlerError, QueueError, QueueResult};
pub use handler::{HandlerRegistry, TaskHandler};
pub use login::{LoginIngestService, LoginRecord, LOGIN_QUEUE_NAME};
pub use manager::{QueueRegistry, QueueStatistics};
pub use observability::{MetricsRegistry, MetricsSnapshot, QueueMetrics};
pub use processor::{
    BatchOutcome, BatchProcessor, ConsumerHandle, ConsumerPool, ProcessorHandle, ProcessorState,
    RetryPolicy,
};
pub use queue::{DeduplicatingQueue, DistributedQueue, TaskQueue};
pub use types::{QueueStats, Task, TaskId, TaskType, DEFAULT_PRIORITY};

#[cfg(feature = "tracing-basic")]
pub use observability::{init_tracing, LogFormat};

pub mod prelude {
    pub use crate::{
        DeduplicatingQueue, DistributedQueue, HandlerRegistry, QueueRegistry, TaskHandler,
        TaskQueue,
    };

    pub use crate::{HandlerError, QueueError, QueueResult, QueueStats, Task, TaskId, TaskType};

    pub use crate::{QueueConfig, QueueSettings, RetryPolicy};

    pub use crate::{LoginIngestService, LoginRecord, LOGIN_QUEUE_NAME};

    pub use async_trait::async_trait;
}
