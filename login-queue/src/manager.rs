use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::handler::HandlerRegistry;
use crate::observability::{MetricsRegistry, MetricsSnapshot};
use crate::processor::{BatchProcessor, ProcessorHandle, ProcessorState};
use crate::queue::{DeduplicatingQueue, TaskQueue};
use crate::{QueueResult, QueueStats};

/// Everything known about one named queue at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub name: String,
    pub stats: QueueStats,
    pub metrics: MetricsSnapshot,
    pub processor_state: Option<ProcessorState>,
    pub processing: bool,
}

/// Named local queues and their batch processors, created on first use.
///
/// Each queue gets the settings of its name from [`QueueConfig`] and shares
/// the handler registry with every other queue.
pub struct QueueRegistry<T: Send + Sync + 'static> {
    config: QueueConfig,
    handlers: Arc<HandlerRegistry<T>>,
    queues: DashMap<String, Arc<DeduplicatingQueue<T>>>,
    processors: DashMap<String, Arc<BatchProcessor<T>>>,
    running: Mutex<HashMap<String, ProcessorHandle>>,
    metrics: MetricsRegistry,
}

impl<T: Send + Sync + 'static> QueueRegistry<T> {
    pub fn new(config: QueueConfig, handlers: Arc<HandlerRegistry<T>>) -> Self {
        Self {
            config,
            handlers,
            queues: DashMap::new(),
            processors: DashMap::new(),
            running: Mutex::new(HashMap::new()),
            metrics: MetricsRegistry::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry<T>> {
        &self.handlers
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// The named queue, created with its configured settings if new
    pub fn get_queue(&self, name: &str) -> Arc<DeduplicatingQueue<T>> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                let settings = self.config.settings_for(name);
                info!(queue = name, max_size = settings.max_size, "Creating queue");
                self.metrics.for_queue(name).set_capacity(settings.max_size);
                Arc::new(DeduplicatingQueue::with_settings(name, &settings))
            })
            .clone()
    }

    /// The batch processor of the named queue, created with the queue if new
    pub fn processor(&self, name: &str) -> Arc<BatchProcessor<T>> {
        let queue = self.get_queue(name);
        self.processors
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(BatchProcessor::new(
                    queue,
                    self.handlers.clone(),
                    self.config.settings_for(name),
                    self.metrics.for_queue(name),
                ))
            })
            .clone()
    }

    /// Start scheduled processing of the named queue. Returns `false` when it
    /// was already running.
    pub fn start_processing(&self, name: &str) -> bool {
        let mut running = self.running.lock();
        if running.contains_key(name) {
            return false;
        }
        let handle = self.processor(name).start();
        running.insert(name.to_string(), handle);
        true
    }

    pub fn is_processing(&self, name: &str) -> bool {
        self.running.lock().contains_key(name)
    }

    /// Stop scheduled processing of the named queue
    pub async fn stop_processing(&self, name: &str) -> QueueResult<bool> {
        let handle = self.running.lock().remove(name);
        match handle {
            Some(handle) => {
                handle.shutdown().await?;
                info!(queue = name, "Processing stopped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn statistics(&self, name: &str) -> Option<QueueStatistics> {
        let queue = self.queues.get(name).map(|q| q.clone())?;
        let stats = queue.stats().await;
        let metrics = self.metrics.for_queue(name);
        metrics.set_queue_size(stats.current_size);

        Some(QueueStatistics {
            name: name.to_string(),
            stats,
            metrics: metrics.snapshot(),
            processor_state: self.processors.get(name).map(|p| p.state()),
            processing: self.is_processing(name),
        })
    }

    /// Statistics of every queue, sorted by name
    pub async fn all_statistics(&self) -> Vec<QueueStatistics> {
        let mut all = Vec::with_capacity(self.queues.len());
        for name in self.queue_names() {
            if let Some(statistics) = self.statistics(&name).await {
                all.push(statistics);
            }
        }
        all
    }

    /// Drop every task and index entry of the named queue
    pub async fn clear_queue(&self, name: &str) -> QueueResult<bool> {
        let Some(queue) = self.queues.get(name).map(|q| q.clone()) else {
            warn!(queue = name, "Clear requested for unknown queue");
            return Ok(false);
        };
        queue.clear().await?;
        self.metrics.for_queue(name).set_queue_size(0);
        Ok(true)
    }

    /// Zero the counters of the named queue, keeping its contents
    pub fn reset_stats(&self, name: &str) -> bool {
        let Some(queue) = self.queues.get(name).map(|q| q.clone()) else {
            return false;
        };
        queue.reset_stats();
        if let Some(metrics) = self.metrics.get(name) {
            metrics.reset();
        }
        info!(queue = name, "Statistics reset");
        true
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        names.sort();
        names
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Stop every processor. Queues and their contents stay in place.
    pub async fn shutdown(&self) -> QueueResult<()> {
        let handles: Vec<(String, ProcessorHandle)> = self.running.lock().drain().collect();
        let results = join_all(handles.into_iter().map(|(name, handle)| async move {
            let result = handle.shutdown().await;
            info!(queue = %name, "Processing stopped");
            result
        }))
        .await;
        info!(queues = self.queue_count(), "Queue registry shut down");
        results.into_iter().collect()
    }
}
