//! HA coordinator: the per-node control loop.
//!
//! Every tick reads a fresh [`Cluster`] snapshot, probes the local engine,
//! and reconciles the local role with the leader lock. The lock is the only
//! cross-node mutual exclusion, so ownership is re-checked on every tick
//! no matter what the previous tick concluded.
//!
//! Ticks and manual commands are serialized by an internal mutex: a node
//! never makes two role decisions at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::adapter::{DatabaseAdapter, FollowOutcome, Node, UpstreamAction};
use crate::dcs::CoordinationStore;
use crate::domain::{Cluster, EventBus, HaEvent, HaState, Member, MemberHealth, MemberStatus, Role};
use crate::error::HaError;

/// What a tick did to the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickAction {
    /// Nothing needed changing.
    None,
    /// The local node was promoted.
    Promoted,
    /// The local node was demoted; it is re-attached to `leader` once the
    /// holder is registered.
    Demoted {
        /// New upstream.
        leader: String,
    },
    /// Replication was (re)pointed at `leader`.
    Followed {
        /// Upstream.
        leader: String,
        /// A rewind ran first.
        rewound: bool,
        /// The engine was restarted.
        restarted: bool,
    },
    /// The stopped engine was started.
    Started,
    /// The tick stopped before deciding.
    Aborted,
}

/// Outcome of one coordinator tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// State after the tick.
    pub state: HaState,
    /// Local role as probed at the start of the tick.
    pub role: Option<Role>,
    /// Valid leader lock holder.
    pub leader: Option<String>,
    /// Action taken.
    pub action: TickAction,
    /// Health verdict for the local member.
    pub healthy: bool,
    /// Verdicts computed this tick, local member first.
    pub members: Vec<MemberHealth>,
    /// Why the tick was aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Completion time.
    pub finished_at: DateTime<Utc>,
}

/// Coordinator for one database node.
#[derive(Debug)]
pub struct HaCoordinator {
    member_name: String,
    store: Arc<dyn CoordinationStore>,
    adapter: Arc<dyn DatabaseAdapter>,
    event_bus: EventBus,
    probe_timeout: Duration,
    state: RwLock<HaState>,
    last_report: RwLock<Option<TickReport>>,
    last_cluster: RwLock<Option<Cluster>>,
    decision: Mutex<()>,
}

impl HaCoordinator {
    /// Creates a coordinator in [`HaState::Unknown`].
    #[must_use]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        adapter: Arc<dyn DatabaseAdapter>,
        event_bus: EventBus,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            member_name: adapter.member_name().to_string(),
            store,
            adapter,
            event_bus,
            probe_timeout,
            state: RwLock::new(HaState::Unknown),
            last_report: RwLock::new(None),
            last_cluster: RwLock::new(None),
            decision: Mutex::new(()),
        }
    }

    /// Name of the managed member.
    #[must_use]
    pub fn member_name(&self) -> &str {
        &self.member_name
    }

    /// Engine driven by the adapter.
    #[must_use]
    pub fn engine(&self) -> &'static str {
        self.adapter.engine()
    }

    /// Returns a reference to the inner [`EventBus`].
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Current state.
    pub async fn state(&self) -> HaState {
        *self.state.read().await
    }

    /// Report of the most recent tick.
    pub async fn last_report(&self) -> Option<TickReport> {
        self.last_report.read().await.clone()
    }

    /// Snapshot read by the most recent tick.
    pub async fn last_cluster(&self) -> Option<Cluster> {
        self.last_cluster.read().await.clone()
    }

    /// Runs ticks every `interval` until `shutdown` flips or its sender is
    /// dropped. An in-flight tick is cancelled on shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(member = %self.member_name, ?interval, "coordinator loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        report = self.tick() => {
                            debug!(state = %report.state, action = ?report.action, healthy = report.healthy, "tick done");
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(member = %self.member_name, "coordinator loop stopped");
    }

    /// Runs one reconciliation pass. Never fails.
    ///
    /// A store read failure aborts the whole tick and marks the member
    /// unhealthy. A failed role decision aborts only the decision: the
    /// health verdict is still computed and reported. Both are retried on
    /// the next tick.
    pub async fn tick(&self) -> TickReport {
        let _decision = self.decision.lock().await;

        let report = match self.reconcile().await {
            Ok(report) => report,
            Err(e) => {
                self.tick_failed(&e);
                TickReport {
                    state: self.state().await,
                    role: None,
                    leader: None,
                    action: TickAction::Aborted,
                    healthy: false,
                    members: vec![MemberHealth::unhealthy(&self.member_name, e.to_string())],
                    error: Some(e.to_string()),
                    finished_at: Utc::now(),
                }
            }
        };

        self.publish_status(&report).await;
        *self.last_report.write().await = Some(report.clone());
        report
    }

    async fn reconcile(&self) -> Result<TickReport, HaError> {
        let cluster = self.bounded("read cluster", self.store.get_cluster()).await?;
        *self.last_cluster.write().await = Some(cluster.clone());

        let owner = cluster.lock_owner(Utc::now()).map(str::to_owned);

        let mut role = None;
        let decision = match self.local_role().await {
            Ok(probed) => {
                role = probed;
                self.decide(&cluster, probed, owner.as_deref()).await
            }
            Err(e) => Err(e),
        };
        let (action, error) = match decision {
            Ok(action) => (action, None),
            Err(e) => {
                self.tick_failed(&e);
                (TickAction::Aborted, Some(e.to_string()))
            }
        };

        let mut members = Vec::with_capacity(cluster.members.len());
        let own_health = match cluster.get_member(&self.member_name) {
            Some(me) => self.bounded_health(&cluster, me).await,
            None => MemberHealth::unhealthy(&self.member_name, "not registered in the cluster"),
        };
        let healthy = own_health.healthy;
        members.push(own_health);

        let state = self.state().await;
        let mut candidates = Vec::new();
        if state == HaState::Leading {
            let others = self.evaluate_all(&cluster, &self.member_name).await;
            candidates = others
                .iter()
                .filter(|h| h.healthy)
                .map(|h| h.member.clone())
                .collect();
            members.extend(others);
        }

        let _ = self.event_bus.publish(HaEvent::HealthReported {
            member: self.member_name.clone(),
            healthy,
            candidates,
            timestamp: Utc::now(),
        });

        Ok(TickReport {
            state,
            role,
            leader: owner,
            action,
            healthy,
            members,
            error,
            finished_at: Utc::now(),
        })
    }

    /// Probes the local role; `None` when the engine is not running.
    async fn local_role(&self) -> Result<Option<Role>, HaError> {
        match self
            .bounded("probe local role", self.adapter.current_role(Node::Local))
            .await
        {
            Ok(role) => Ok(Some(role)),
            Err(e) if !self.adapter.is_running().await => {
                debug!(error = %e, "local engine is not running");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Reconciles the local role with the valid lock holder `owner`.
    async fn decide(
        &self,
        cluster: &Cluster,
        role: Option<Role>,
        owner: Option<&str>,
    ) -> Result<TickAction, HaError> {
        let holds_lock = owner == Some(self.member_name.as_str());

        let action = match (role, owner) {
            (Some(Role::Primary), Some(_)) if holds_lock => {
                self.transition(HaState::Leading).await;
                TickAction::None
            }
            (Some(Role::Primary), Some(other)) => {
                warn!(member = %self.member_name, leader = %other, "primary without the leader lock, demoting");
                self.transition(HaState::Demoting).await;
                self.command("demote", self.adapter.demote()).await?;
                let _ = self.event_bus.publish(HaEvent::Demoted {
                    member: self.member_name.clone(),
                    timestamp: Utc::now(),
                });
                match cluster.get_member(other) {
                    Some(leader) => {
                        self.follow_leader(leader).await?;
                    }
                    None => {
                        warn!(leader = %other, "lock holder is not registered, nothing to follow yet");
                    }
                }
                TickAction::Demoted {
                    leader: other.to_string(),
                }
            }
            (Some(Role::Primary), None) => {
                warn!(member = %self.member_name, "primary but nobody holds the leader lock");
                self.transition(HaState::Unknown).await;
                TickAction::None
            }
            (Some(Role::Secondary), Some(_)) if holds_lock => {
                self.promote_locked().await?;
                TickAction::Promoted
            }
            (None, Some(_)) if holds_lock => {
                info!(member = %self.member_name, "holding the leader lock with a stopped engine, starting");
                self.command("recover", self.adapter.start()).await?;
                self.transition(HaState::Unknown).await;
                TickAction::Started
            }
            (Some(Role::Secondary) | None, Some(other)) => {
                let Some(leader) = cluster.get_member(other) else {
                    warn!(leader = %other, "lock holder is not registered, nothing to follow yet");
                    return Ok(TickAction::None);
                };
                let outcome = self.follow_leader(leader).await?;
                if outcome.action == UpstreamAction::NoChange {
                    TickAction::None
                } else {
                    TickAction::Followed {
                        leader: other.to_string(),
                        rewound: outcome.rewound,
                        restarted: outcome.action == UpstreamAction::Restart,
                    }
                }
            }
            (Some(Role::Secondary), None) => {
                debug!("no leader to follow");
                self.transition(HaState::Following).await;
                TickAction::None
            }
            (None, None) => {
                self.transition(HaState::Unknown).await;
                TickAction::None
            }
        };
        Ok(action)
    }

    /// Whether the local engine currently reports itself as primary.
    ///
    /// # Errors
    ///
    /// Returns the probe error when the local engine cannot be queried.
    pub async fn is_leader(&self) -> Result<bool, HaError> {
        let role = self
            .bounded("probe local role", self.adapter.current_role(Node::Local))
            .await?;
        Ok(role == Role::Primary)
    }

    /// Health verdict for `member` against a fresh snapshot. Store or probe
    /// failures make the member unhealthy.
    pub async fn is_member_healthy(&self, member: &Member) -> bool {
        match self.bounded("read cluster", self.store.get_cluster()).await {
            Ok(cluster) => self.bounded_health(&cluster, member).await.healthy,
            Err(e) => {
                warn!(error = %e, "cannot read cluster for health check");
                false
            }
        }
    }

    /// Detailed health verdict for the member called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::MemberNotFound`] for unknown members and store
    /// errors from reading the snapshot.
    pub async fn member_health(&self, name: &str) -> Result<MemberHealth, HaError> {
        let cluster = self.bounded("read cluster", self.store.get_cluster()).await?;
        let member = cluster
            .get_member(name)
            .ok_or_else(|| HaError::MemberNotFound(name.to_string()))?;
        Ok(self.bounded_health(&cluster, member).await)
    }

    /// Another member that is reachable and reports itself as primary.
    pub async fn has_other_healthy_leader(&self) -> Option<Member> {
        let cluster = match self.bounded("read cluster", self.store.get_cluster()).await {
            Ok(cluster) => cluster,
            Err(e) => {
                warn!(error = %e, "cannot read cluster");
                return None;
            }
        };

        let others: Vec<&Member> = cluster
            .members
            .iter()
            .filter(|m| m.name != self.member_name)
            .collect();
        let roles = join_all(others.iter().map(|m| {
            self.bounded("probe member role", self.adapter.current_role(Node::Remote(*m)))
        }))
        .await;

        others
            .into_iter()
            .zip(roles)
            .find(|(_, role)| matches!(role, Ok(Role::Primary)))
            .map(|(member, _)| member.clone())
    }

    /// Healthy members other than `exclude_leader`, in cluster order.
    pub async fn has_other_healthy_members(&self, exclude_leader: &str) -> Vec<Member> {
        let cluster = match self.bounded("read cluster", self.store.get_cluster()).await {
            Ok(cluster) => cluster,
            Err(e) => {
                warn!(error = %e, "cannot read cluster");
                return Vec::new();
            }
        };
        let verdicts = self.evaluate_all(&cluster, exclude_leader).await;
        cluster
            .members
            .iter()
            .filter(|m| verdicts.iter().any(|h| h.healthy && h.member == m.name))
            .cloned()
            .collect()
    }

    /// Promotes the local node.
    ///
    /// # Errors
    ///
    /// Surfaces the engine failure; the node stays in
    /// [`HaState::Promoting`] until a later tick decides again.
    pub async fn promote(&self) -> Result<(), HaError> {
        let _decision = self.decision.lock().await;
        self.promote_locked().await
    }

    /// Stops the local writable service.
    ///
    /// # Errors
    ///
    /// Surfaces the engine failure.
    pub async fn demote(&self) -> Result<(), HaError> {
        let _decision = self.decision.lock().await;
        self.transition(HaState::Demoting).await;
        self.command("demote", self.adapter.demote()).await?;
        let _ = self.event_bus.publish(HaEvent::Demoted {
            member: self.member_name.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Follows the leader named in `cluster`.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::NoLeader`] without a lock holder,
    /// [`HaError::MemberNotFound`] if the holder is not registered, and
    /// engine failures.
    pub async fn follow(&self, cluster: &Cluster) -> Result<FollowOutcome, HaError> {
        let _decision = self.decision.lock().await;
        let name = cluster.leader_name().ok_or(HaError::NoLeader)?;
        let leader = leader_member(cluster, name)?;
        self.follow_leader(leader).await
    }

    /// Follows the leader of a freshly read snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`HaCoordinator::follow`], plus store errors.
    pub async fn follow_current(&self) -> Result<FollowOutcome, HaError> {
        let cluster = self.bounded("read cluster", self.store.get_cluster()).await?;
        self.follow(&cluster).await
    }

    /// Starts the engine if it is not running; the next tick picks the
    /// role. Returns whether a start was issued.
    ///
    /// # Errors
    ///
    /// Surfaces the engine failure.
    pub async fn recover(&self) -> Result<bool, HaError> {
        let _decision = self.decision.lock().await;
        let started = self.command("recover", self.adapter.recover()).await?;
        if started {
            info!(member = %self.member_name, "engine started by recover");
        }
        Ok(started)
    }

    async fn promote_locked(&self) -> Result<(), HaError> {
        self.transition(HaState::Promoting).await;
        self.command("promote", self.adapter.promote()).await?;
        let _ = self.event_bus.publish(HaEvent::Promoted {
            member: self.member_name.clone(),
            timestamp: Utc::now(),
        });
        self.transition(HaState::Leading).await;
        Ok(())
    }

    async fn follow_leader(&self, leader: &Member) -> Result<FollowOutcome, HaError> {
        let outcome = self.command("follow", self.adapter.follow(leader)).await?;
        if outcome.rewound {
            let _ = self.event_bus.publish(HaEvent::Rewound {
                member: self.member_name.clone(),
                leader: leader.name.clone(),
                timestamp: Utc::now(),
            });
        }
        if outcome.action != UpstreamAction::NoChange {
            info!(leader = %leader.name, action = ?outcome.action, rewound = outcome.rewound, "following new upstream");
            let _ = self.event_bus.publish(HaEvent::FollowReconfigured {
                member: self.member_name.clone(),
                leader: leader.name.clone(),
                restarted: outcome.action == UpstreamAction::Restart,
                timestamp: Utc::now(),
            });
        }
        self.transition(HaState::Following).await;
        Ok(outcome)
    }

    async fn evaluate_all(&self, cluster: &Cluster, exclude: &str) -> Vec<MemberHealth> {
        join_all(
            cluster
                .members
                .iter()
                .filter(|m| m.name != exclude)
                .map(|m| self.bounded_health(cluster, m)),
        )
        .await
    }

    async fn bounded_health(&self, cluster: &Cluster, member: &Member) -> MemberHealth {
        match tokio::time::timeout(self.probe_timeout, self.adapter.evaluate_health(cluster, member))
            .await
        {
            Ok(health) => health,
            Err(_) => MemberHealth::unhealthy(&member.name, "health check timed out"),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, HaError>>,
    ) -> Result<T, HaError> {
        tokio::time::timeout(self.probe_timeout, fut)
            .await
            .map_err(|_| HaError::Timeout {
                operation: operation.to_string(),
                timeout_ms: u64::try_from(self.probe_timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    async fn command<T>(
        &self,
        name: &str,
        fut: impl Future<Output = Result<T, HaError>>,
    ) -> Result<T, HaError> {
        fut.await.inspect_err(|e| {
            error!(member = %self.member_name, command = name, error = %e, "engine command failed");
            let _ = self.event_bus.publish(HaEvent::CommandFailed {
                member: self.member_name.clone(),
                command: name.to_string(),
                error: e.to_string(),
                timestamp: Utc::now(),
            });
        })
    }

    fn tick_failed(&self, e: &HaError) {
        warn!(member = %self.member_name, error = %e, transient = e.is_transient(), "tick aborted");
        let _ = self.event_bus.publish(HaEvent::TickFailed {
            member: self.member_name.clone(),
            error: e.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn transition(&self, to: HaState) {
        let from = std::mem::replace(&mut *self.state.write().await, to);
        if from != to {
            info!(member = %self.member_name, %from, %to, "state changed");
            let _ = self.event_bus.publish(HaEvent::StateChanged {
                member: self.member_name.clone(),
                from,
                to,
                timestamp: Utc::now(),
            });
        }
    }

    async fn publish_status(&self, report: &TickReport) {
        let status = MemberStatus {
            member: self.member_name.clone(),
            state: report.state,
            role: report.role,
            position: report.members.first().and_then(|h| h.position),
            healthy: report.healthy,
            updated_at: report.finished_at,
        };
        if let Err(e) = self.bounded("publish status", self.store.publish_status(&status)).await {
            warn!(error = %e, "status write-back failed");
        }
    }
}

fn leader_member<'a>(cluster: &'a Cluster, name: &str) -> Result<&'a Member, HaError> {
    cluster
        .get_member(name)
        .ok_or_else(|| HaError::MemberNotFound(name.to_string()))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterCommand, FailPoint, InMemoryAdapter, NodeState};
    use crate::dcs::InMemoryStore;
    use crate::domain::lsn::{TimelinePosition, WalPosition};
    use crate::domain::{HaConfig, Leader};

    fn member(name: &str) -> Member {
        Member::new(name, format!("{name}.pg.svc"), 5432)
    }

    fn cluster(leader: Option<&str>, names: &[&str]) -> Cluster {
        Cluster {
            leader: leader.map(|name| Leader {
                name: name.to_string(),
                acquire_time: None,
                renew_time: None,
            }),
            members: names.iter().map(|n| member(n)).collect(),
            ha_config: HaConfig {
                max_lag_on_switchover: 1_000,
                ..HaConfig::default()
            },
            op_time: Some(TimelinePosition::new(1, WalPosition::new(10_000))),
        }
    }

    struct Harness {
        coordinator: HaCoordinator,
        adapter: Arc<InMemoryAdapter>,
        store: Arc<InMemoryStore>,
    }

    fn harness(local: &str, cluster: Cluster) -> Harness {
        let adapter = Arc::new(InMemoryAdapter::new(local));
        let store = Arc::new(InMemoryStore::new(cluster));
        let coordinator = HaCoordinator::new(
            Arc::clone(&store) as Arc<dyn CoordinationStore>,
            Arc::clone(&adapter) as Arc<dyn DatabaseAdapter>,
            EventBus::new(64),
            Duration::from_millis(500),
        );
        Harness {
            coordinator,
            adapter,
            store,
        }
    }

    #[tokio::test]
    async fn leader_excludes_lagging_member_from_candidates() {
        let h = harness("m1", cluster(Some("m1"), &["m1", "m2", "m3"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;
        h.adapter.set_node(NodeState::secondary("m2", 1, 2_000)).await;
        h.adapter.set_node(NodeState::secondary("m3", 1, 9_500)).await;

        let report = h.coordinator.tick().await;
        assert_eq!(report.state, HaState::Leading);
        assert_eq!(report.action, TickAction::None);
        assert!(report.healthy);
        assert!(h.adapter.commands().await.is_empty());

        let healthy = h.coordinator.has_other_healthy_members("m1").await;
        assert_eq!(healthy, vec![member("m3")]);
        assert!(!h.coordinator.is_member_healthy(&member("m2")).await);
    }

    #[tokio::test]
    async fn stale_primary_demotes_then_follows_lock_holder() {
        let h = harness("m1", cluster(Some("m3"), &["m1", "m2", "m3"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;
        h.adapter.set_node(NodeState::primary("m3", 1, 10_000)).await;
        let mut events = h.coordinator.event_bus().subscribe();

        let report = h.coordinator.tick().await;
        assert_eq!(report.state, HaState::Following);
        assert_eq!(
            report.action,
            TickAction::Demoted {
                leader: "m3".to_string()
            }
        );
        assert_eq!(
            h.adapter.commands().await,
            vec![
                AdapterCommand::Demote,
                AdapterCommand::Reconfigure {
                    leader: "m3".to_string(),
                    restart: true
                },
            ]
        );

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let HaEvent::StateChanged { to, .. } = event {
                transitions.push(to);
            }
        }
        assert_eq!(transitions, vec![HaState::Demoting, HaState::Following]);
    }

    #[tokio::test]
    async fn synchronous_quorum_decides_member_health() {
        let h = harness("m1", cluster(Some("m1"), &["m1", "m2", "m4"]));
        let mut leader = NodeState::primary("m1", 1, 10_000);
        leader.synchronous_commit = "on".to_string();
        leader.sync_standby_names = "1(m2)".to_string();
        h.adapter.set_node(leader).await;
        h.adapter.set_node(NodeState::secondary("m2", 1, 10_000)).await;
        h.adapter.set_node(NodeState::secondary("m4", 1, 10_000)).await;

        assert!(h.coordinator.is_member_healthy(&member("m2")).await);
        assert!(!h.coordinator.is_member_healthy(&member("m4")).await);
    }

    #[tokio::test]
    async fn secondary_holding_lock_is_promoted() {
        let h = harness("m2", cluster(Some("m2"), &["m1", "m2"]));
        h.adapter.set_node(NodeState::secondary("m2", 1, 10_000)).await;

        let report = h.coordinator.tick().await;
        assert_eq!(report.action, TickAction::Promoted);
        assert_eq!(h.coordinator.state().await, HaState::Leading);
        assert_eq!(h.adapter.commands().await, vec![AdapterCommand::Promote]);
        let Ok(leader) = h.coordinator.is_leader().await else {
            panic!("local probe should work");
        };
        assert!(leader);
    }

    #[tokio::test]
    async fn secondary_follows_and_then_stays_put() {
        let h = harness("m2", cluster(Some("m1"), &["m1", "m2"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;
        h.adapter.set_node(NodeState::secondary("m2", 1, 10_000)).await;

        let first = h.coordinator.tick().await;
        assert_eq!(
            first.action,
            TickAction::Followed {
                leader: "m1".to_string(),
                rewound: false,
                restarted: false
            }
        );
        let second = h.coordinator.tick().await;
        assert_eq!(second.action, TickAction::None);
        assert_eq!(second.state, HaState::Following);
        assert!(second.healthy);
        assert_eq!(h.adapter.commands().await.len(), 1);
    }

    #[tokio::test]
    async fn store_outage_aborts_tick_without_commands() {
        let h = harness("m1", cluster(Some("m1"), &["m1"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;
        h.store.set_unavailable(true);
        let mut events = h.coordinator.event_bus().subscribe();

        let report = h.coordinator.tick().await;
        assert_eq!(report.action, TickAction::Aborted);
        assert!(!report.healthy);
        assert!(report.error.is_some());
        assert!(h.adapter.commands().await.is_empty());
        let Ok(event) = events.try_recv() else {
            panic!("tick failure should be published");
        };
        assert_eq!(event.event_type_str(), "tick_failed");
    }

    #[tokio::test]
    async fn failed_demote_is_retried_next_tick() {
        let h = harness("m1", cluster(Some("m3"), &["m1", "m3"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;
        h.adapter.set_node(NodeState::primary("m3", 1, 10_000)).await;
        h.adapter.fail(FailPoint::Demote).await;

        let failed = h.coordinator.tick().await;
        assert_eq!(failed.action, TickAction::Aborted);
        assert!(failed.error.is_some());
        assert_eq!(failed.role, Some(Role::Primary));
        assert_eq!(h.coordinator.state().await, HaState::Demoting);
        assert!(h.adapter.commands().await.is_empty());

        h.adapter.clear_failure(FailPoint::Demote).await;
        let retried = h.coordinator.tick().await;
        assert_eq!(retried.state, HaState::Following);
        assert_eq!(h.adapter.commands().await.first(), Some(&AdapterCommand::Demote));
    }

    #[tokio::test]
    async fn unregistered_lock_holder_still_demotes_stale_primary() {
        let h = harness("m1", cluster(Some("m3"), &["m1"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;

        let report = h.coordinator.tick().await;
        assert_eq!(
            report.action,
            TickAction::Demoted {
                leader: "m3".to_string()
            }
        );
        assert!(report.error.is_none());
        assert_eq!(report.state, HaState::Demoting);
        assert_eq!(h.adapter.commands().await, vec![AdapterCommand::Demote]);
    }

    #[tokio::test]
    async fn unregistered_lock_holder_leaves_standby_alone() {
        let h = harness("m2", cluster(Some("m3"), &["m1", "m2"]));
        h.adapter.set_node(NodeState::secondary("m2", 1, 10_000)).await;

        let report = h.coordinator.tick().await;
        assert_eq!(report.action, TickAction::None);
        assert!(report.error.is_none());
        assert!(report.healthy);
        assert!(h.adapter.commands().await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_leader_keeps_standby_healthy() {
        let h = harness("m2", cluster(Some("m1"), &["m1", "m2", "m3"]));
        h.adapter.set_node(NodeState::secondary("m2", 1, 10_000)).await;
        h.adapter.set_node(NodeState::secondary("m3", 1, 9_500)).await;

        let report = h.coordinator.tick().await;
        assert_ne!(report.action, TickAction::Aborted);
        assert!(report.error.is_none());
        assert!(report.healthy);
        assert_eq!(report.state, HaState::Following);
        assert_eq!(
            h.adapter.commands().await,
            vec![AdapterCommand::Reconfigure {
                leader: "m1".to_string(),
                restart: false
            }]
        );

        let healthy = h.coordinator.has_other_healthy_members("m1").await;
        assert_eq!(healthy, vec![member("m2"), member("m3")]);
    }

    #[tokio::test]
    async fn failed_follow_still_reports_health() {
        let h = harness("m2", cluster(Some("m1"), &["m1", "m2"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;
        h.adapter.set_node(NodeState::secondary("m2", 1, 10_000)).await;
        h.adapter.fail(FailPoint::Reconfigure).await;
        let mut events = h.coordinator.event_bus().subscribe();

        let report = h.coordinator.tick().await;
        assert_eq!(report.action, TickAction::Aborted);
        assert!(report.error.is_some());
        assert_eq!(report.role, Some(Role::Secondary));
        assert!(report.healthy);
        assert_eq!(report.members.first().map(|m| m.member.as_str()), Some("m2"));

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.event_type_str());
        }
        assert!(kinds.contains(&"tick_failed"));
        assert!(kinds.contains(&"health_reported"));

        let Some(status) = h.store.status("m2").await else {
            panic!("status should be published");
        };
        assert!(status.healthy);
    }

    #[tokio::test]
    async fn stopped_engine_follows_or_starts() {
        let h = harness("m2", cluster(Some("m1"), &["m1", "m2"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;
        h.adapter.set_node(NodeState::stopped("m2", true, 1, 9_000)).await;

        let report = h.coordinator.tick().await;
        assert_eq!(report.role, None);
        assert_eq!(
            h.adapter.commands().await,
            vec![AdapterCommand::Reconfigure {
                leader: "m1".to_string(),
                restart: true
            }]
        );

        let own = harness("m1", cluster(Some("m1"), &["m1"]));
        own.adapter.set_node(NodeState::stopped("m1", false, 1, 9_000)).await;
        let report = own.coordinator.tick().await;
        assert_eq!(report.action, TickAction::Started);
        assert_eq!(own.adapter.commands().await, vec![AdapterCommand::Start]);
    }

    #[tokio::test]
    async fn other_leader_is_detected() {
        let h = harness("m1", cluster(Some("m3"), &["m1", "m2", "m3"]));
        h.adapter.set_node(NodeState::secondary("m1", 1, 10_000)).await;
        h.adapter.set_node(NodeState::secondary("m2", 1, 10_000)).await;
        h.adapter.set_node(NodeState::primary("m3", 1, 10_000)).await;

        let Some(leader) = h.coordinator.has_other_healthy_leader().await else {
            panic!("m3 is primary");
        };
        assert_eq!(leader.name, "m3");

        h.adapter.remove_node("m3").await;
        assert!(h.coordinator.has_other_healthy_leader().await.is_none());
    }

    #[tokio::test]
    async fn status_is_written_back() {
        let h = harness("m1", cluster(Some("m1"), &["m1"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;

        let _ = h.coordinator.tick().await;
        let Some(status) = h.store.status("m1").await else {
            panic!("status should be published");
        };
        assert_eq!(status.state, HaState::Leading);
        assert_eq!(status.role, Some(Role::Primary));
        assert!(status.healthy);
        assert_eq!(status.position.map(|p| p.timeline), Some(1));
    }

    #[tokio::test]
    async fn manual_commands_surface_failures() {
        let h = harness("m1", cluster(None, &["m1"]));
        h.adapter.set_node(NodeState::secondary("m1", 1, 10_000)).await;
        h.adapter.fail(FailPoint::Promote).await;

        let Err(HaError::CommandFailed { .. }) = h.coordinator.promote().await else {
            panic!("promote should fail");
        };
        let Err(HaError::NoLeader) = h.coordinator.follow(&cluster(None, &["m1"])).await else {
            panic!("no leader to follow");
        };
        let Ok(started) = h.coordinator.recover().await else {
            panic!("recover on a running engine is a no-op");
        };
        assert!(!started);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let h = harness("m1", cluster(Some("m1"), &["m1"]));
        h.adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;
        let coordinator = Arc::new(h.coordinator);
        let (tx, rx) = watch::channel(false);

        let task = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run(Duration::from_millis(20), rx).await })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(tx.send(true).is_ok());

        let joined = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(matches!(joined, Ok(Ok(()))));
        assert!(coordinator.last_report().await.is_some());
    }
}
