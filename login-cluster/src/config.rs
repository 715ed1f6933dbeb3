//! # Configuration
//!
//! A flat string key/value store plus typed configuration structs that read
//! their overrides from it. Keys are dotted and lower-case
//! (`fault_tolerance.max_attempts`); environment variables map onto them by
//! stripping a prefix and turning `__` into `.`:
//!
//! ```bash
//! export LOGINQ__FAULT_TOLERANCE__MAX_ATTEMPTS=5   # fault_tolerance.max_attempts
//! ```
//!
//! Every typed config starts from its `Default` and only overrides the keys
//! that are present, so an empty store yields production defaults.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::{ClusterError, ClusterResult};

/// Environment prefix used by [`ConfigStore::from_env`] callers by default.
pub const DEFAULT_ENV_PREFIX: &str = "LOGINQ__";

#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: HashMap<String, String>,
}

impl ConfigStore {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Load every environment variable that starts with `prefix`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_pairs(prefix, std::env::vars())
    }

    /// Same as [`from_env`](Self::from_env) over an explicit variable list.
    pub fn from_pairs<I, K, V>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut store = Self::new();
        for (key, value) in vars {
            if let Some(stripped) = key.as_ref().strip_prefix(prefix) {
                store.set(stripped.to_lowercase().replace("__", "."), value);
            }
        }
        store
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Keys starting with `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .map(|k| k.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Parse a value, `Ok(None)` when the key is absent.
    pub fn parse<T>(&self, key: &str) -> ClusterResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ClusterError::Config {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Booleans accept `true/false`, `1/0`, `yes/no`, `on/off`.
    pub fn parse_bool(&self, key: &str) -> ClusterResult<Option<bool>> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(None),
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                other => Err(ClusterError::Config {
                    key: key.to_string(),
                    reason: format!("expected a boolean, got '{}'", other),
                }),
            },
        }
    }

    pub fn parse_secs(&self, key: &str) -> ClusterResult<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_secs))
    }

    pub fn parse_millis(&self, key: &str) -> ClusterResult<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }

    /// Comma separated list, empty items dropped.
    pub fn parse_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// Names and storage settings of the clustered substrate.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub cluster_name: String,
    /// Replicated map holding the dedup index
    pub dedup_map_name: String,
    /// Replicated queue holding encoded tasks
    pub task_queue_name: String,
    /// Time-to-live of a dedup index entry
    pub dedup_ttl: Duration,
    /// Capacity of the replicated task queue
    pub queue_max_size: usize,
    pub backup_count: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_name: "login-management-cluster".to_string(),
            dedup_map_name: "login-record-deduplication".to_string(),
            task_queue_name: "login-record-task-queue".to_string(),
            dedup_ttl: Duration::from_secs(3600), // 1 hour
            queue_max_size: 10_000,
            backup_count: 1,
        }
    }
}

impl ClusterConfig {
    pub fn from_store(store: &ConfigStore) -> ClusterResult<Self> {
        let mut config = Self::default();
        if let Some(v) = store.get("cluster.name") {
            config.cluster_name = v.to_string();
        }
        if let Some(v) = store.get("cluster.dedup_map_name") {
            config.dedup_map_name = v.to_string();
        }
        if let Some(v) = store.get("cluster.task_queue_name") {
            config.task_queue_name = v.to_string();
        }
        if let Some(v) = store.parse_secs("cluster.dedup_ttl_secs")? {
            config.dedup_ttl = v;
        }
        if let Some(v) = store.parse("cluster.queue_max_size")? {
            config.queue_max_size = v;
        }
        if let Some(v) = store.parse("cluster.backup_count")? {
            config.backup_count = v;
        }
        Ok(config)
    }
}

/// Settings of the fault-tolerance manager.
#[derive(Debug, Clone)]
pub struct FaultToleranceConfig {
    pub enabled: bool,
    /// Period of the scheduled health check
    pub health_check_interval: Duration,
    /// Consecutive probe failures before a member counts as unhealthy
    pub max_consecutive_failures: u32,
    /// Minimum time between two reconnection runs
    pub recovery_window: Duration,
    pub auto_reconnect: bool,
    pub max_attempts: u32,
    /// Backoff before the first attempt of a run
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    /// Upper bound of random jitter added to each backoff
    pub backoff_jitter: Duration,
    /// Timeout of a TCP reachability probe during rejoin
    pub connect_timeout: Duration,
    /// Service name looked up in discovery during rejoin
    pub service_name: String,
    /// Fallback member addresses when discovery returns nothing
    pub static_members: Vec<String>,
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_check_interval: Duration::from_secs(30),
            max_consecutive_failures: 3,
            recovery_window: Duration::from_secs(300), // 5 minutes
            auto_reconnect: true,
            max_attempts: 10,
            initial_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            backoff_jitter: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(10),
            service_name: "login-management-app".to_string(),
            static_members: vec![
                "127.0.0.1:5701".to_string(),
                "127.0.0.1:5702".to_string(),
                "127.0.0.1:5703".to_string(),
            ],
        }
    }
}

impl FaultToleranceConfig {
    pub fn from_store(store: &ConfigStore) -> ClusterResult<Self> {
        let mut config = Self::default();
        if let Some(v) = store.parse_bool("fault_tolerance.enabled")? {
            config.enabled = v;
        }
        if let Some(v) = store.parse_secs("fault_tolerance.health_check_interval_secs")? {
            config.health_check_interval = v;
        }
        if let Some(v) = store.parse("fault_tolerance.max_consecutive_failures")? {
            config.max_consecutive_failures = v;
        }
        if let Some(v) = store.parse_secs("fault_tolerance.recovery_window_secs")? {
            config.recovery_window = v;
        }
        if let Some(v) = store.parse_bool("fault_tolerance.auto_reconnect")? {
            config.auto_reconnect = v;
        }
        if let Some(v) = store.parse("fault_tolerance.max_attempts")? {
            config.max_attempts = v;
        }
        if let Some(v) = store.parse_millis("fault_tolerance.initial_backoff_ms")? {
            config.initial_backoff = v;
        }
        if let Some(v) = store.parse::<f64>("fault_tolerance.backoff_multiplier")? {
            if v < 1.0 {
                return Err(ClusterError::Config {
                    key: "fault_tolerance.backoff_multiplier".to_string(),
                    reason: "multiplier must be >= 1.0".to_string(),
                });
            }
            config.backoff_multiplier = v;
        }
        if let Some(v) = store.parse_millis("fault_tolerance.max_backoff_ms")? {
            config.max_backoff = v;
        }
        if let Some(v) = store.parse_millis("fault_tolerance.backoff_jitter_ms")? {
            config.backoff_jitter = v;
        }
        if let Some(v) = store.parse_secs("fault_tolerance.connect_timeout_secs")? {
            config.connect_timeout = v;
        }
        if let Some(v) = store.get("fault_tolerance.service_name") {
            config.service_name = v.to_string();
        }
        if let Some(v) = store.parse_list("fault_tolerance.static_members") {
            config.static_members = v;
        }
        Ok(config)
    }
}
