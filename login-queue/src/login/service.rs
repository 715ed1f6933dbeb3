use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::LoginRecord;
use crate::manager::QueueRegistry;
use crate::queue::{DistributedQueue, TaskQueue};
use crate::{QueueResult, QueueStats};

/// Local queue name used when the distributed queue is disabled
pub const LOGIN_QUEUE_NAME: &str = "login-record-queue";

/// Which queue the service writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestRoute {
    Local,
    Distributed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStatus {
    pub route: IngestRoute,
    pub queue: String,
    pub stats: QueueStats,
}

/// Producer entry point for login events.
///
/// Routes to the distributed queue when one is configured, otherwise to the
/// local `login-record-queue` of the registry.
pub struct LoginIngestService {
    registry: Arc<QueueRegistry<LoginRecord>>,
    distributed: Option<Arc<DistributedQueue<LoginRecord>>>,
}

impl LoginIngestService {
    pub fn local(registry: Arc<QueueRegistry<LoginRecord>>) -> Self {
        Self {
            registry,
            distributed: None,
        }
    }

    pub fn distributed(
        registry: Arc<QueueRegistry<LoginRecord>>,
        queue: Arc<DistributedQueue<LoginRecord>>,
    ) -> Self {
        Self {
            registry,
            distributed: Some(queue),
        }
    }

    pub fn route(&self) -> IngestRoute {
        if self.distributed.is_some() {
            IngestRoute::Distributed
        } else {
            IngestRoute::Local
        }
    }

    fn target(&self) -> Arc<dyn TaskQueue<LoginRecord>> {
        match &self.distributed {
            Some(queue) => queue.clone() as Arc<dyn TaskQueue<LoginRecord>>,
            None => self.registry.get_queue(LOGIN_QUEUE_NAME) as Arc<dyn TaskQueue<LoginRecord>>,
        }
    }

    /// Enqueue at default priority. `false` when the user already has a
    /// pending record or the queue is full.
    pub async fn enqueue(&self, record: LoginRecord) -> QueueResult<bool> {
        self.enqueue_with_priority(record, crate::DEFAULT_PRIORITY).await
    }

    #[instrument(skip(self, record), fields(uid = %record.uid, route = ?self.route()))]
    pub async fn enqueue_with_priority(&self, record: LoginRecord, priority: i32) -> QueueResult<bool> {
        let task = record.into_task_with_priority(priority)?;
        let accepted = self.target().offer(task).await?;
        if accepted {
            debug!(priority, "Login record queued");
        } else {
            warn!("Login record not queued");
        }
        Ok(accepted)
    }

    pub async fn queue_size(&self) -> usize {
        self.target().size().await
    }

    /// Users with a pending record
    pub async fn index_size(&self) -> usize {
        self.target().stats().await.index_size
    }

    pub async fn statistics(&self) -> IngestStatus {
        let queue = self.target();
        IngestStatus {
            route: self.route(),
            queue: queue.name().to_string(),
            stats: queue.stats().await,
        }
    }
}
