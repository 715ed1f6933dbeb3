//! Queue configuration.
//!
//! Defaults apply to every named queue; `queues.<name>.<field>` keys override
//! them for one queue. All keys are read from a [`ConfigStore`]:
//!
//! ```bash
//! export LOGINQ__QUEUE__BATCH_SIZE=20                 # queue.batch_size
//! export LOGINQ__QUEUES__AUDIT__PARALLEL=true         # queues.audit.parallel
//! export LOGINQ__DISTRIBUTED__ENABLED=true            # distributed.enabled
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use login_cluster::{ClusterConfig, ConfigStore};

use crate::processor::RetryPolicy;
use crate::{QueueError, QueueResult};

/// Dequeue order of a local queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingMode {
    /// Offer order
    #[default]
    Fifo,
    /// Lower priority value first, offer order among equals
    Priority,
}

impl FromStr for OrderingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown ordering '{}', expected fifo or priority", other)),
        }
    }
}

/// What the distributed adapter does when the dedup map cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupFailurePolicy {
    /// Admit the task; a duplicate may slip through during a partition
    #[default]
    FailOpen,
    /// Reject the task; work may be lost during a partition
    FailClosed,
}

impl FromStr for DedupFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Ok(Self::FailOpen),
            "fail_closed" | "closed" => Ok(Self::FailClosed),
            other => Err(format!("unknown dedup failure policy '{}'", other)),
        }
    }
}

impl fmt::Display for DedupFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailOpen => f.write_str("fail_open"),
            Self::FailClosed => f.write_str("fail_closed"),
        }
    }
}

/// Settings of one named queue and its batch processor
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub max_size: usize,
    pub dedup_enabled: bool,
    pub ordering: OrderingMode,
    /// Preferred batch size
    pub batch_size: usize,
    /// Hard cap on a single batch
    pub max_batch_size: usize,
    pub process_interval: Duration,
    pub parallel: bool,
    /// Worker pool size for parallel dispatch
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            dedup_enabled: true,
            ordering: OrderingMode::Fifo,
            batch_size: 20,
            max_batch_size: 50,
            process_interval: Duration::from_millis(5000),
            parallel: false,
            workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueSettings {
    pub fn validate(&self) -> QueueResult<()> {
        let positive = [
            ("max_size", self.max_size),
            ("batch_size", self.batch_size),
            ("max_batch_size", self.max_batch_size),
            ("workers", self.workers),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(QueueError::Config {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.process_interval.is_zero() {
            return Err(QueueError::Config {
                key: "process_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(QueueError::Config {
                key: "retry.multiplier".to_string(),
                reason: "must be >= 1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Overlay the keys under `prefix` (e.g. `queue.` or `queues.audit.`)
    fn apply(mut self, store: &ConfigStore, prefix: &str) -> QueueResult<Self> {
        let key = |name: &str| format!("{}{}", prefix, name);

        if let Some(v) = store.parse(&key("max_size"))? {
            self.max_size = v;
        }
        if let Some(v) = store.parse_bool(&key("dedup_enabled"))? {
            self.dedup_enabled = v;
        }
        if let Some(raw) = store.get(&key("ordering")) {
            self.ordering = raw.parse().map_err(|reason| QueueError::Config {
                key: key("ordering"),
                reason,
            })?;
        }
        if let Some(v) = store.parse(&key("batch_size"))? {
            self.batch_size = v;
        }
        if let Some(v) = store.parse(&key("max_batch_size"))? {
            self.max_batch_size = v;
        }
        if let Some(v) = store.parse_millis(&key("process_interval_ms"))? {
            self.process_interval = v;
        }
        if let Some(v) = store.parse_bool(&key("parallel"))? {
            self.parallel = v;
        }
        if let Some(v) = store.parse(&key("workers"))? {
            self.workers = v;
        }
        if let Some(v) = store.parse(&key("retry.max_attempts"))? {
            self.retry.max_attempts = v;
        }
        if let Some(v) = store.parse_millis(&key("retry.delay_ms"))? {
            self.retry.initial_delay = v;
        }
        if let Some(v) = store.parse(&key("retry.multiplier"))? {
            self.retry.multiplier = v;
        }
        if let Some(v) = store.parse_millis(&key("retry.max_delay_ms"))? {
            self.retry.max_delay = v;
        }

        self.validate()?;
        Ok(self)
    }
}

/// Binding of the distributed adapter onto the replicated structures
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedQueueConfig {
    pub queue_name: String,
    pub dedup_map_name: String,
    pub capacity: usize,
    /// Lifetime of a dedup entry; `None` keeps entries until dequeue
    pub dedup_ttl: Option<Duration>,
    pub failure_policy: DedupFailurePolicy,
}

impl Default for DistributedQueueConfig {
    fn default() -> Self {
        Self::from_cluster(&ClusterConfig::default())
    }
}

impl DistributedQueueConfig {
    pub fn from_cluster(cluster: &ClusterConfig) -> Self {
        Self {
            queue_name: cluster.task_queue_name.clone(),
            dedup_map_name: cluster.dedup_map_name.clone(),
            capacity: cluster.queue_max_size,
            dedup_ttl: Some(cluster.dedup_ttl),
            failure_policy: DedupFailurePolicy::default(),
        }
    }
}

/// Consumer pool draining the distributed queue
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub consumers: usize,
    pub poll_timeout: Duration,
    pub status_interval: Duration,
    pub cleanup_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumers: 2,
            poll_timeout: Duration::from_secs(5),
            status_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300), // 5 minutes
            retry: RetryPolicy::default(),
        }
    }
}

/// Top-level queue configuration
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    pub defaults: QueueSettings,
    pub overrides: HashMap<String, QueueSettings>,
    /// Route producers to the distributed queue
    pub distributed_enabled: bool,
    pub distributed: DistributedQueueConfig,
    pub consumer: ConsumerConfig,
}

impl QueueConfig {
    /// Effective settings of the named queue
    pub fn settings_for(&self, queue_name: &str) -> QueueSettings {
        self.overrides
            .get(queue_name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn with_override(mut self, queue_name: impl Into<String>, settings: QueueSettings) -> Self {
        self.overrides.insert(queue_name.into(), settings);
        self
    }

    pub fn from_store(store: &ConfigStore) -> QueueResult<Self> {
        let defaults = QueueSettings::default().apply(store, "queue.")?;

        let mut overrides = HashMap::new();
        for key in store.keys_with_prefix("queues.") {
            let Some((name, _)) = key["queues.".len()..].split_once('.') else {
                continue;
            };
            if overrides.contains_key(name) {
                continue;
            }
            let settings = defaults.clone().apply(store, &format!("queues.{}.", name))?;
            overrides.insert(name.to_string(), settings);
        }

        let cluster = ClusterConfig::from_store(store)?;
        let mut distributed = DistributedQueueConfig::from_cluster(&cluster);
        if let Some(raw) = store.get("distributed.dedup_failure_policy") {
            distributed.failure_policy = raw.parse().map_err(|reason| QueueError::Config {
                key: "distributed.dedup_failure_policy".to_string(),
                reason,
            })?;
        }

        let mut consumer = ConsumerConfig {
            retry: defaults.retry.clone(),
            ..ConsumerConfig::default()
        };
        if let Some(v) = store.parse("distributed.consumers")? {
            consumer.consumers = v;
        }
        if let Some(v) = store.parse_secs("distributed.poll_timeout_secs")? {
            consumer.poll_timeout = v;
        }
        if let Some(v) = store.parse_secs("distributed.status_interval_secs")? {
            consumer.status_interval = v;
        }
        if let Some(v) = store.parse_secs("distributed.cleanup_interval_secs")? {
            consumer.cleanup_interval = v;
        }

        Ok(Self {
            defaults,
            overrides,
            distributed_enabled: store.parse_bool("distributed.enabled")?.unwrap_or(false),
            distributed,
            consumer,
        })
    }
}
