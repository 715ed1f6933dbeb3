//! # login-cluster
//!
//! The clustered substrate underneath the login ingestion queue.
//!
//! - [`backend`]: the contract a cluster runtime must satisfy (membership,
//!   lifecycle events, replicated maps and queues) and an in-process
//!   [`MemoryGrid`] implementation of it
//! - [`fault`]: health monitoring and single-flight reconnection
//! - [`config`]: environment-driven configuration
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use login_cluster::prelude::*;
//!
//! # async fn example() -> ClusterResult<()> {
//! let grid = MemoryGrid::new("login-management-cluster");
//! let node = grid.join();
//!
//! let manager = FaultToleranceManager::new(
//!     node.clone(),
//!     Arc::new(StaticDiscovery::default()),
//!     FaultToleranceConfig::default(),
//! );
//! let handle = manager.start()?;
//! println!("{}", manager.health_report().await);
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fault;
pub mod types;

pub use backend::memory::{MemoryGrid, MemoryNode};
pub use backend::{ClusterRuntime, ClusterSubstrate, ReplicatedMap, ReplicatedQueue};
pub use config::{ClusterConfig, ConfigStore, FaultToleranceConfig, DEFAULT_ENV_PREFIX};
pub use discovery::{ServiceDiscovery, StaticDiscovery};
pub use error::{ClusterError, ClusterResult};
pub use fault::{
    ClusterFaultState, FaultToleranceHandle, FaultToleranceManager, HealthReport, HealthState,
    MemberHealthStatus,
};
pub use types::{ClusterEvent, LifecycleState, Member, MemberId};

pub mod prelude {
    pub use crate::backend::memory::{MemoryGrid, MemoryNode};
    pub use crate::backend::{ClusterRuntime, ClusterSubstrate, ReplicatedMap, ReplicatedQueue};
    pub use crate::config::{ClusterConfig, ConfigStore, FaultToleranceConfig};
    pub use crate::discovery::{ServiceDiscovery, StaticDiscovery};
    pub use crate::error::{ClusterError, ClusterResult};
    pub use crate::fault::{FaultToleranceManager, HealthReport, HealthState};
    pub use crate::types::{ClusterEvent, LifecycleState, Member, MemberId};
}
