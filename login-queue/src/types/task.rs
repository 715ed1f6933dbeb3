use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskType};
use crate::{QueueError, QueueResult};

/// Default priority; lower values are served first in priority mode.
pub const DEFAULT_PRIORITY: i32 = 0;

/// One immutable unit of work.
///
/// Built once at the producer boundary with the `with_*` builders and never
/// mutated afterwards. The dedup key defaults to the task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task<T> {
    id: TaskId,
    data: T,
    task_type: TaskType,
    dedup_key: String,
    priority: i32,
    created_at: DateTime<Utc>,
    discardable: bool,
}

impl<T> Task<T> {
    pub fn new(task_type: impl Into<TaskType>, data: T) -> Self {
        Self::with_id(TaskId::new(), task_type, data)
    }

    pub fn with_id(id: impl Into<TaskId>, task_type: impl Into<TaskType>, data: T) -> Self {
        let id = id.into();
        Self {
            dedup_key: id.as_str().to_string(),
            id,
            data,
            task_type: task_type.into(),
            priority: DEFAULT_PRIORITY,
            created_at: Utc::now(),
            discardable: false,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = key.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the task as droppable under backpressure
    pub fn discardable(mut self, discardable: bool) -> Self {
        self.discardable = discardable;
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn dedup_key(&self) -> &str {
        &self.dedup_key
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_discardable(&self) -> bool {
        self.discardable
    }

    /// Reject malformed tasks before they reach any queue.
    pub fn validate(&self) -> QueueResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(QueueError::invalid_task("task id is empty"));
        }
        if self.task_type.as_str().trim().is_empty() {
            return Err(QueueError::invalid_task(format!("task {} has no type", self.id)));
        }
        if self.dedup_key.trim().is_empty() {
            return Err(QueueError::invalid_task(format!("task {} has an empty dedup key", self.id)));
        }
        Ok(())
    }
}
