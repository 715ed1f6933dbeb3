//! Network fault tolerance.
//!
//! The manager tracks per-member probe history and a small cluster-level
//! state machine (`HEALTHY`, `DEGRADED`, `RECONNECTING`, `UNHEALTHY`). Losing
//! the cluster schedules a reconnection run; at most one run is in flight at a
//! time and attempts back off multiplicatively until the attempt budget is
//! spent, after which only a manual trigger starts a new run.

pub mod health;
pub mod manager;
pub mod reconnect;

pub use health::{ClusterFaultState, HealthReport, HealthState, MemberHealthStatus};
pub use manager::{FaultToleranceHandle, FaultToleranceManager};
pub use reconnect::{backoff_delay, ReconnectRequest};
