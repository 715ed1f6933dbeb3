use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::health::{ClusterFaultState, HealthReport, HealthState, MemberHealthStatus};
use super::reconnect::{backoff_delay, ReconnectRequest};
use crate::backend::ClusterRuntime;
use crate::config::FaultToleranceConfig;
use crate::discovery::{tcp_reachable, ServiceDiscovery};
use crate::{ClusterError, ClusterEvent, ClusterResult, LifecycleState, Member, MemberId};

/// Handle for the manager's background tasks
pub struct FaultToleranceHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl FaultToleranceHandle {
    /// Stop the event loop, the health checker and the reconnect worker
    pub async fn shutdown(self) -> ClusterResult<()> {
        self.cancel.cancel();
        for task in self.tasks {
            task.await
                .map_err(|e| ClusterError::Internal(format!("Fault-tolerance task join error: {}", e)))?;
        }
        Ok(())
    }
}

/// Watches cluster membership and drives reconnection when the local node
/// loses the cluster.
pub struct FaultToleranceManager {
    runtime: Arc<dyn ClusterRuntime>,
    discovery: Arc<dyn ServiceDiscovery>,
    config: FaultToleranceConfig,
    state: Arc<ClusterFaultState>,
    member_health: DashMap<MemberId, MemberHealthStatus>,
    reconnect_tx: mpsc::Sender<ReconnectRequest>,
    reconnect_rx: Mutex<Option<mpsc::Receiver<ReconnectRequest>>>,
    reconnect_runs: AtomicU64,
}

impl FaultToleranceManager {
    pub fn new(
        runtime: Arc<dyn ClusterRuntime>,
        discovery: Arc<dyn ServiceDiscovery>,
        config: FaultToleranceConfig,
    ) -> Arc<Self> {
        Self::with_state(runtime, discovery, config, Arc::new(ClusterFaultState::new()))
    }

    /// Build around an externally owned state object
    pub fn with_state(
        runtime: Arc<dyn ClusterRuntime>,
        discovery: Arc<dyn ServiceDiscovery>,
        config: FaultToleranceConfig,
        state: Arc<ClusterFaultState>,
    ) -> Arc<Self> {
        // A run in flight is already guarded by the CAS flag, one slot is enough
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        Arc::new(Self {
            runtime,
            discovery,
            config,
            state,
            member_health: DashMap::new(),
            reconnect_tx,
            reconnect_rx: Mutex::new(Some(reconnect_rx)),
            reconnect_runs: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &FaultToleranceConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<ClusterFaultState> {
        &self.state
    }

    pub fn current_state(&self) -> HealthState {
        self.state.state(self.config.max_attempts)
    }

    /// Number of reconnection runs the worker has started
    pub fn reconnect_runs(&self) -> u64 {
        self.reconnect_runs.load(Ordering::SeqCst)
    }

    pub fn member_health(&self, member: &MemberId) -> Option<MemberHealthStatus> {
        self.member_health.get(member).map(|s| s.clone())
    }

    /// Spawn the event loop, the periodic health check and the reconnect worker.
    pub fn start(self: &Arc<Self>) -> ClusterResult<FaultToleranceHandle> {
        let reconnect_rx = self
            .reconnect_rx
            .lock()
            .take()
            .ok_or_else(|| ClusterError::Internal("Fault-tolerance manager already started".to_string()))?;

        let cancel = CancellationToken::new();
        if !self.config.enabled {
            warn!("Network fault tolerance is disabled");
            return Ok(FaultToleranceHandle { cancel, tasks: Vec::new() });
        }

        let events = self.runtime.subscribe();
        let tasks = vec![
            tokio::spawn(self.clone().event_loop(events, cancel.clone())),
            tokio::spawn(self.clone().health_check_loop(cancel.clone())),
            tokio::spawn(self.clone().reconnect_worker(reconnect_rx, cancel.clone())),
        ];

        info!(
            interval = ?self.config.health_check_interval,
            max_failures = self.config.max_consecutive_failures,
            max_attempts = self.config.max_attempts,
            "Network fault tolerance manager started"
        );
        Ok(FaultToleranceHandle { cancel, tasks })
    }

    async fn event_loop(
        self: Arc<Self>,
        events: tokio::sync::broadcast::Receiver<ClusterEvent>,
        cancel: CancellationToken,
    ) {
        let mut events = BroadcastStream::new(events);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = events.next() => match next {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        warn!(skipped, "Cluster event feed lagged, re-checking health");
                        self.check_health().await;
                    }
                    None => {
                        debug!("Cluster event feed closed");
                        break;
                    }
                },
            }
        }
    }

    async fn health_check_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.health_check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_health().await;
                }
            }
        }
    }

    async fn reconnect_worker(
        self: Arc<Self>,
        mut requests: mpsc::Receiver<ReconnectRequest>,
        cancel: CancellationToken,
    ) {
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state.end_reconnect();
                    break;
                }
                _ = self.run_reconnection(request) => {}
            }
            self.state.end_reconnect();
        }
        debug!("Reconnect worker stopped");
    }

    /// React to one membership or lifecycle event.
    #[instrument(skip(self))]
    pub async fn handle_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::Lifecycle(state) => self.on_lifecycle(state),
            ClusterEvent::MemberAdded(member) => {
                info!(member = %member, "Member joined cluster");
                self.member_health.entry(member.id.clone()).or_default();
                self.check_health().await;
            }
            ClusterEvent::MemberRemoved(member) => {
                if member.id == self.runtime.local_member().id {
                    warn!(member = %member, "Local member was removed from the cluster");
                    self.degrade("local member removed from cluster");
                    self.schedule_reconnection("local member removed from cluster");
                } else {
                    warn!(member = %member, "Member left cluster");
                    self.member_health.remove(&member.id);
                    self.check_health().await;
                }
            }
        }
    }

    fn on_lifecycle(&self, state: LifecycleState) {
        match state {
            LifecycleState::Started if self.is_exhausted() => {
                warn!("Cluster runtime started while reconnection is exhausted, awaiting manual trigger");
            }
            LifecycleState::Started => {
                info!("Cluster runtime started");
                self.state.mark_healthy();
            }
            s if s.is_down() => {
                warn!(state = ?s, "Cluster runtime going down");
                self.degrade("runtime lifecycle went down");
                if s.needs_reconnect() {
                    self.schedule_reconnection("runtime shut down or disconnected");
                }
            }
            other => debug!(state = ?other, "Lifecycle state changed"),
        }
    }

    /// One health-check pass. Returns the state after the check.
    #[instrument(skip(self))]
    pub async fn check_health(&self) -> HealthState {
        self.state.touch_health_check();
        if !self.config.enabled {
            return self.current_state();
        }

        if !self.runtime.is_running() {
            self.degrade_and_reconnect("cluster runtime is not running");
            return self.current_state();
        }

        let members = match self.runtime.members().await {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, "Failed to read cluster membership");
                self.degrade_and_reconnect("membership unavailable");
                return self.current_state();
            }
        };

        let local = self.runtime.local_member();
        if members.len() <= 1 {
            self.degrade_and_reconnect("no other cluster members");
            return self.current_state();
        }
        if !members.iter().any(|m| m.id == local.id) {
            self.degrade_and_reconnect("local member missing from membership");
            return self.current_state();
        }

        let remotes: Vec<&Member> = members.iter().filter(|m| m.id != local.id).collect();
        let probes = join_all(remotes.iter().map(|member| async move {
            (member.id.clone(), self.runtime.probe(member).await)
        }))
        .await;

        let threshold = self.config.max_consecutive_failures;
        let mut unhealthy = 0;
        let mut failing = 0;
        for (id, result) in probes {
            let mut status = self.member_health.entry(id.clone()).or_default();
            status.record(result.is_ok());
            if let Err(e) = result {
                failing += 1;
                warn!(member = %id, failures = status.consecutive_failures, error = %e, "Member probe failed");
            }
            if status.is_unhealthy(threshold) {
                unhealthy += 1;
            }
        }

        if unhealthy == remotes.len() {
            self.degrade_and_reconnect("every remote member is unreachable");
        } else if failing == 0
            && !self.state.is_healthy()
            && !self.state.is_reconnecting()
            && !self.is_exhausted()
        {
            info!(members = members.len(), "Cluster health restored");
            self.state.mark_healthy();
        } else if failing == 0 && self.state.is_healthy() {
            self.state.reset_attempts();
        }

        debug!(members = members.len(), unhealthy, "Health check complete");
        self.current_state()
    }

    /// Attempt budget spent; only a manual trigger leaves this state
    fn is_exhausted(&self) -> bool {
        self.state.reconnect_attempts() >= self.config.max_attempts
    }

    fn degrade(&self, reason: &str) {
        if self.state.mark_unhealthy() {
            warn!(reason, "Cluster health degraded");
        }
    }

    fn degrade_and_reconnect(&self, reason: &str) {
        self.degrade(reason);
        self.schedule_reconnection(reason);
    }

    /// Ask the reconnect worker for a run, subject to auto-reconnect, the
    /// single-flight flag and the recovery window. Returns whether a run was queued.
    pub fn schedule_reconnection(&self, reason: &str) -> bool {
        if !self.config.auto_reconnect {
            debug!(reason, "Auto-reconnect disabled, not scheduling");
            return false;
        }
        if self.state.is_reconnecting() {
            debug!(reason, "Reconnection already in progress");
            return false;
        }
        if self.is_exhausted() {
            warn!(reason, "Reconnection attempts exhausted, awaiting manual trigger");
            return false;
        }
        if let Some(last) = self.state.last_reconnect_at() {
            let elapsed = (Utc::now() - last).to_std().unwrap_or_default();
            if elapsed < self.config.recovery_window {
                debug!(reason, ?elapsed, "Within recovery window, not scheduling");
                return false;
            }
        }
        self.enqueue_reconnect(reason, false)
    }

    fn enqueue_reconnect(&self, reason: &str, fresh_budget: bool) -> bool {
        if !self.state.try_begin_reconnect() {
            return false;
        }
        // Only the caller that owns the run may touch the attempt budget
        if fresh_budget {
            self.state.reset_attempts();
        }
        match self.reconnect_tx.try_send(ReconnectRequest::new(reason)) {
            Ok(()) => {
                info!(reason, "Reconnection scheduled");
                true
            }
            Err(e) => {
                self.state.end_reconnect();
                warn!(reason, error = %e, "Could not hand reconnection to worker");
                false
            }
        }
    }

    /// Manual intervention: reconnect now with a fresh attempt budget,
    /// ignoring the recovery window. Rejected while a run is in flight, and
    /// then the running attempt count is left alone.
    pub fn trigger_reconnection(&self) -> bool {
        info!("Manual reconnection triggered");
        self.enqueue_reconnect("manual trigger", true)
    }

    /// Forget all failure history and report healthy.
    pub fn reset_health_status(&self) {
        self.state.mark_healthy();
        self.member_health.clear();
        info!("Health status reset");
    }

    #[instrument(skip(self), fields(reason = %request.reason))]
    async fn run_reconnection(&self, request: ReconnectRequest) {
        self.reconnect_runs.fetch_add(1, Ordering::SeqCst);
        let max_attempts = self.config.max_attempts;
        let queued = (Utc::now() - request.requested_at).to_std().unwrap_or_default();
        debug!(?queued, "Reconnection run started");

        loop {
            if self.is_exhausted() {
                error!(max_attempts, "Reconnection attempts exhausted, manual trigger required");
                return;
            }

            let attempt = self.state.record_attempt();
            let delay = backoff_delay(&self.config, attempt);
            info!(attempt, max_attempts, ?delay, "Reconnection attempt");
            tokio::time::sleep(delay).await;

            match self.perform_reconnection().await {
                Ok(true) => {
                    self.state.mark_healthy();
                    info!(attempt, "Reconnection successful");
                    return;
                }
                Ok(false) => warn!(attempt, "Reconnection attempt failed"),
                Err(e) => warn!(attempt, error = %e, "Reconnection attempt errored"),
            }
        }
    }

    async fn perform_reconnection(&self) -> ClusterResult<bool> {
        if !self.runtime.is_running() {
            warn!("Cluster runtime stopped, restarting");
            self.runtime.restart().await?;
            return Ok(self.runtime.is_running());
        }
        self.rejoin().await
    }

    async fn rejoin(&self) -> ClusterResult<bool> {
        let local = self.runtime.local_member();
        let members = self.runtime.members().await?;
        if members.len() > 1 && members.iter().any(|m| m.id == local.id) {
            info!(members = members.len(), "Cluster membership recovered");
            return Ok(true);
        }

        let mut candidates = self.discovery.list_instances(&self.config.service_name).await;
        if candidates.is_empty() {
            candidates = self.config.static_members.clone();
        }
        candidates.retain(|address| address != &local.address);

        debug!(candidates = candidates.len(), "Probing rediscovered members");
        for address in candidates {
            if tcp_reachable(&address, self.config.connect_timeout).await {
                info!(%address, "Reachable cluster member found");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Read-only summary for monitoring
    pub async fn health_report(&self) -> HealthReport {
        let members = self.runtime.members().await.unwrap_or_default();
        let local = self.runtime.local_member();
        let threshold = self.config.max_consecutive_failures;

        let mut healthy_members = 0;
        let mut unhealthy_members = 0;
        for member in members.iter().filter(|m| m.id != local.id) {
            match self.member_health.get(&member.id) {
                Some(status) if status.is_unhealthy(threshold) => unhealthy_members += 1,
                Some(status) if !status.is_healthy() => {}
                _ => healthy_members += 1,
            }
        }

        HealthReport {
            state: self.current_state(),
            total_members: members.len(),
            healthy_members,
            unhealthy_members,
            reconnect_attempts: self.state.reconnect_attempts(),
            max_attempts: self.config.max_attempts,
            reconnecting: self.state.is_reconnecting(),
            last_reconnect_at: self.state.last_reconnect_at(),
            last_health_check_at: self.state.last_health_check_at(),
        }
    }
}
