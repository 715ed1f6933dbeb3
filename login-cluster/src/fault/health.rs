use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Cluster-level health as seen by the fault-tolerance manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Reconnecting,
    /// Reconnect attempts exhausted; needs a manual trigger
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Reconnecting => "RECONNECTING",
            Self::Unhealthy => "UNHEALTHY",
        };
        f.write_str(s)
    }
}

/// Probe history of a single member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberHealthStatus {
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl MemberHealthStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, success: bool) {
        let now = Utc::now();
        if success {
            self.consecutive_failures = 0;
            self.last_success_at = Some(now);
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure_at = Some(now);
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }

    pub fn is_unhealthy(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        None
    } else {
        Utc.timestamp_millis_opt(ms).single()
    }
}

/// Process-wide fault state, shared by reference with whoever needs to read it.
///
/// Timestamps are stored as epoch milliseconds, `0` meaning never.
#[derive(Debug)]
pub struct ClusterFaultState {
    healthy: AtomicBool,
    reconnecting: AtomicBool,
    reconnect_attempts: AtomicU32,
    last_reconnect_at: AtomicI64,
    last_health_check_at: AtomicI64,
}

impl Default for ClusterFaultState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterFaultState {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            reconnecting: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            last_reconnect_at: AtomicI64::new(0),
            last_health_check_at: AtomicI64::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn last_reconnect_at(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_reconnect_at.load(Ordering::SeqCst))
    }

    pub fn last_health_check_at(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_health_check_at.load(Ordering::SeqCst))
    }

    /// Derive the state machine position from the flags
    pub fn state(&self, max_attempts: u32) -> HealthState {
        if self.is_reconnecting() {
            HealthState::Reconnecting
        } else if self.is_healthy() {
            HealthState::Healthy
        } else if self.reconnect_attempts() >= max_attempts {
            HealthState::Unhealthy
        } else {
            HealthState::Degraded
        }
    }

    /// Healthy again: clears the degraded flag and the attempt counter
    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    /// Returns `true` if this call flipped the state from healthy
    pub fn mark_unhealthy(&self) -> bool {
        self.healthy.swap(false, Ordering::SeqCst)
    }

    /// Single-flight guard: only one caller wins until [`end_reconnect`](Self::end_reconnect)
    pub fn try_begin_reconnect(&self) -> bool {
        self.reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_reconnect(&self) {
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    /// Count one reconnect attempt and stamp its time. Returns the attempt number.
    pub fn record_attempt(&self) -> u32 {
        self.last_reconnect_at.store(to_millis(Utc::now()), Ordering::SeqCst);
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    pub fn touch_health_check(&self) {
        self.last_health_check_at.store(to_millis(Utc::now()), Ordering::SeqCst);
    }
}

/// Point-in-time health summary for monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub total_members: usize,
    pub healthy_members: usize,
    pub unhealthy_members: usize,
    pub reconnect_attempts: u32,
    pub max_attempts: u32,
    pub reconnecting: bool,
    pub last_reconnect_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "Never".to_string(),
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cluster health: {}", self.state)?;
        writeln!(f, "  members: {} total, {} healthy, {} unhealthy", self.total_members, self.healthy_members, self.unhealthy_members)?;
        writeln!(f, "  reconnect attempts: {}/{}", self.reconnect_attempts, self.max_attempts)?;
        writeln!(f, "  reconnecting: {}", self.reconnecting)?;
        writeln!(f, "  last reconnect: {}", format_timestamp(self.last_reconnect_at))?;
        write!(f, "  last health check: {}", format_timestamp(self.last_health_check_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_failures_reset_on_success() {
        let mut status = MemberHealthStatus::new();
        status.record(false);
        status.record(false);
        status.record(false);
        assert!(status.is_unhealthy(3));
        assert!(status.last_failure_at.is_some());

        status.record(true);
        assert!(status.is_healthy());
        assert_eq!(status.consecutive_failures, 0);
    }

    #[test]
    fn state_is_derived_from_flags() {
        let state = ClusterFaultState::new();
        assert_eq!(state.state(2), HealthState::Healthy);

        assert!(state.mark_unhealthy());
        assert!(!state.mark_unhealthy());
        assert_eq!(state.state(2), HealthState::Degraded);

        assert!(state.try_begin_reconnect());
        assert!(!state.try_begin_reconnect());
        assert_eq!(state.state(2), HealthState::Reconnecting);

        state.record_attempt();
        state.record_attempt();
        state.end_reconnect();
        assert_eq!(state.state(2), HealthState::Unhealthy);

        state.mark_healthy();
        assert_eq!(state.reconnect_attempts(), 0);
        assert_eq!(state.state(2), HealthState::Healthy);
    }

    #[test]
    fn report_prints_never_for_missing_timestamps() {
        let report = HealthReport {
            state: HealthState::Healthy,
            total_members: 2,
            healthy_members: 1,
            unhealthy_members: 0,
            reconnect_attempts: 0,
            max_attempts: 10,
            reconnecting: false,
            last_reconnect_at: None,
            last_health_check_at: None,
        };

        let text = report.to_string();
        assert!(text.contains("HEALTHY"));
        assert!(text.contains("last reconnect: Never"));
    }
}
