//! Handlers and the typed registry that routes tasks to them.

pub mod registry;

use async_trait::async_trait;

use crate::{HandlerError, Task, TaskType};

pub use registry::HandlerRegistry;

/// Processes tasks of one type.
#[async_trait]
pub trait TaskHandler<T: Send + Sync + 'static>: Send + Sync {
    /// The task type this handler is registered under
    fn supported_type(&self) -> TaskType;

    fn can_handle(&self, task: &Task<T>) -> bool {
        task.task_type() == &self.supported_type()
    }

    async fn handle(&self, task: &Task<T>) -> Result<(), HandlerError>;

    /// Process a batch. Defaults to one task at a time in batch order,
    /// stopping at the first failure.
    async fn handle_batch(&self, tasks: &[Task<T>]) -> Result<(), HandlerError> {
        for task in tasks {
            self.handle(task).await?;
        }
        Ok(())
    }
}
