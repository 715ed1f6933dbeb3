//! Everything that pulls tasks out of a queue and runs handlers on them.
//!
//! - [`BatchProcessor`]: periodic batch drain of a local queue, serial or
//!   split across a worker pool
//! - [`ConsumerPool`]: long-running workers on the distributed queue
//! - [`retry_with_backoff`]: bounded exponential retry shared by both

pub mod batch;
pub mod consumer;
pub mod retry;

pub use batch::{
    dispatch_parallel, dispatch_serial, BatchOutcome, BatchProcessor, DispatchOutcome,
    ProcessorHandle, ProcessorState,
};
pub use consumer::{ConsumerHandle, ConsumerPool};
pub use retry::{retry_with_backoff, RetryPolicy};
