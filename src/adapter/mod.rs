//! Database adapter: the engine-specific probe and control surface.
//!
//! [`DatabaseAdapter`] exposes primitive probes (role, WAL positions,
//! timelines, settings) and control commands (promote, demote, rewind,
//! reconfigure). Decisions that are the same for every engine, such as
//! whether to rewind before following or whether a member is healthy, are
//! provided methods built on top of those primitives.
//!
//! The engine is picked once at configuration time through [`build`].

pub mod conninfo;
pub mod control_data;
pub mod memory;
pub mod pid_file;
pub mod postgres;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{CoordinatorConfig, EngineKind};
use crate::domain::lsn::{self, HistoryEntry, LocalPosition, Timeline, TimelinePosition, WalPosition};
use crate::domain::{Cluster, Member, MemberHealth, ReplicationMode, Role, SyncStandbySpec, WalKind};
use crate::error::HaError;

pub use memory::{AdapterCommand, FailPoint, InMemoryAdapter, NodeState};
pub use postgres::PostgresAdapter;

/// Node a probe is addressed to.
///
/// The local node is reached through a long-lived pool; remote members get
/// a short-lived connection per call.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    /// The node this coordinator manages.
    Local,
    /// Another cluster member.
    Remote(&'a Member),
}

impl Node<'_> {
    /// Name used in logs and errors.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Remote(member) => &member.name,
        }
    }
}

impl fmt::Display for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What it takes to point local replication at a leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamAction {
    /// The configured upstream already is the leader.
    NoChange,
    /// Rewrite the upstream and reload the configuration.
    Reload,
    /// Rewrite the upstream and (re)start the engine as a standby.
    Restart,
}

/// Result of [`DatabaseAdapter::follow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowOutcome {
    /// A rewind ran before reconfiguring.
    pub rewound: bool,
    /// How the upstream was applied.
    pub action: UpstreamAction,
}

impl FollowOutcome {
    const NOTHING: Self = Self {
        rewound: false,
        action: UpstreamAction::NoChange,
    };
}

/// Uniform probe and control contract implemented by each engine.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync + fmt::Debug {
    /// Engine name, for logs and the API.
    fn engine(&self) -> &'static str;

    /// Name of the member this adapter manages locally.
    fn member_name(&self) -> &str;

    /// Role reported by the node's recovery state.
    async fn current_role(&self, node: Node<'_>) -> Result<Role, HaError>;

    /// Commit durability mode currently configured on the node.
    async fn replication_mode(&self, node: Node<'_>) -> Result<ReplicationMode, HaError>;

    /// Raw synchronous standby specification configured on the node.
    async fn sync_standby_names(&self, node: Node<'_>) -> Result<String, HaError>;

    /// WAL position of the given kind.
    ///
    /// Fails with [`HaError::RoleMismatch`] when `kind` is not defined for
    /// the node's current role.
    async fn wal_position(&self, node: Node<'_>, kind: WalKind) -> Result<WalPosition, HaError>;

    /// Timeline the node is currently on.
    async fn timeline(&self, node: Node<'_>) -> Result<Timeline, HaError>;

    /// History of `timeline` as recorded on the node. Timeline 1 has none.
    async fn timeline_history(
        &self,
        node: Node<'_>,
        timeline: Timeline,
    ) -> Result<Vec<HistoryEntry>, HaError>;

    /// Local recovery flag, timeline and position, from a live connection
    /// when reachable, else from on-disk control state.
    async fn local_timeline_and_position(&self) -> Result<LocalPosition, HaError>;

    /// Whether the local engine process is alive.
    async fn is_running(&self) -> bool;

    /// Decides how the local upstream must change to follow `leader`.
    async fn upstream_action(&self, leader: &Member) -> Result<UpstreamAction, HaError>;

    /// Makes the local node writable. A no-op on a primary.
    async fn promote(&self) -> Result<(), HaError>;

    /// Stops the local writable service, leaving data files intact.
    async fn demote(&self) -> Result<(), HaError>;

    /// Points local replication at `leader`, reloading or restarting.
    async fn reconfigure_upstream(&self, leader: &Member, restart: bool) -> Result<(), HaError>;

    /// Rewinds local data onto `leader`'s history.
    async fn rewind(&self, leader: &Member) -> Result<(), HaError>;

    /// Starts the local engine with its current configuration.
    async fn start(&self) -> Result<(), HaError>;

    /// Maps a member to [`Node::Local`] when it is this node.
    fn node_for<'a>(&self, member: &'a Member) -> Node<'a> {
        if member.name == self.member_name() {
            Node::Local
        } else {
            Node::Remote(member)
        }
    }

    /// Best replication position of a node on its current timeline.
    ///
    /// Primaries report their insert position; secondaries the furthest of
    /// replayed and received.
    async fn node_position(&self, node: Node<'_>) -> Result<TimelinePosition, HaError> {
        let role = self.current_role(node).await?;
        let position = match role {
            Role::Primary => self.wal_position(node, WalKind::Current).await?,
            Role::Secondary => {
                let replayed = self.wal_position(node, WalKind::Replayed).await?;
                let received = self.wal_position(node, WalKind::Received).await?;
                replayed.max(received)
            }
        };
        let timeline = self.timeline(node).await?;
        Ok(TimelinePosition::new(timeline, position))
    }

    /// Timeline and, when the local timeline lags behind it, the timeline
    /// history of a rewind source. `None` if the source is in recovery.
    async fn rewind_source(
        &self,
        source: Node<'_>,
        local_timeline: Timeline,
    ) -> Result<Option<(Timeline, Vec<HistoryEntry>)>, HaError> {
        if self.current_role(source).await? != Role::Primary {
            return Ok(None);
        }
        let timeline = self.timeline(source).await?;
        let history = if local_timeline < timeline {
            self.timeline_history(source, timeline).await?
        } else {
            Vec::new()
        };
        Ok(Some((timeline, history)))
    }

    /// Whether local data diverged from `leader` and must be rewound.
    ///
    /// Unknown local state never triggers a rewind, and a leader that is
    /// unreachable or still in recovery is not a usable rewind source.
    async fn needs_rewind(&self, leader: &Member) -> Result<bool, HaError> {
        let local = self.local_timeline_and_position().await?;
        if !local.is_known() {
            debug!(member = %self.member_name(), "local timeline unknown, skipping rewind check");
            return Ok(false);
        }

        let source = Node::Remote(leader);
        let (primary_timeline, history) = match self.rewind_source(source, local.timeline).await {
            Ok(Some(source_state)) => source_state,
            Ok(None) => {
                warn!(leader = %leader.name, "leader is still in recovery and can't be used for rewind");
                return Ok(false);
            }
            Err(e) => {
                warn!(leader = %leader.name, error = %e, "leader unreachable, skipping rewind check");
                return Ok(false);
            }
        };

        let rewind = lsn::needs_rewind(&local, primary_timeline, &history);
        debug!(
            local_timeline = local.timeline,
            local_position = %local.position,
            primary_timeline,
            rewind,
            "rewind check"
        );
        Ok(rewind)
    }

    /// Follows `leader`: rewinds first when needed, then reloads or
    /// restarts depending on the current upstream.
    async fn follow(&self, leader: &Member) -> Result<FollowOutcome, HaError> {
        if leader.name == self.member_name() {
            debug!(member = %leader.name, "holding the leader lock, nothing to follow");
            return Ok(FollowOutcome::NOTHING);
        }

        if self.needs_rewind(leader).await? {
            self.rewind(leader).await.map_err(|e| match e {
                HaError::RewindFailed(_) => e,
                other => HaError::RewindFailed(other.to_string()),
            })?;
            self.reconfigure_upstream(leader, true).await?;
            return Ok(FollowOutcome {
                rewound: true,
                action: UpstreamAction::Restart,
            });
        }

        let action = self.upstream_action(leader).await?;
        match action {
            UpstreamAction::NoChange => {
                debug!(leader = %leader.name, "already following the leader");
            }
            UpstreamAction::Reload => self.reconfigure_upstream(leader, false).await?,
            UpstreamAction::Restart => self.reconfigure_upstream(leader, true).await?,
        }
        Ok(FollowOutcome {
            rewound: false,
            action,
        })
    }

    /// Replication settings deciding standby quorum membership: the raw
    /// `synchronous_standby_names` of `node` when commits wait on standbys,
    /// either because the engine runs synchronously or because the cluster
    /// requests it, and `None` otherwise.
    async fn quorum_settings(&self, node: Node<'_>, requested: bool) -> Result<Option<String>, HaError> {
        let mode = self.replication_mode(node).await?;
        if mode == ReplicationMode::Synchronous || requested {
            Ok(Some(self.sync_standby_names(node).await?))
        } else {
            Ok(None)
        }
    }

    /// Full health verdict for `member`. Never fails: every probe error
    /// makes the member unhealthy.
    ///
    /// Quorum settings come from the lock holder while its lease is valid;
    /// when it has none or cannot be reached, the local node's settings are
    /// used instead.
    async fn evaluate_health(&self, cluster: &Cluster, member: &Member) -> MemberHealth {
        let now = Utc::now();
        let requested = cluster.ha_config.synchronous_mode;
        let settings = match cluster.lock_holder(now) {
            Some(leader) => match self.quorum_settings(self.node_for(leader), requested).await {
                Ok(settings) => Ok(settings),
                Err(e) => {
                    debug!(leader = %leader.name, error = %e, "leader settings unreadable, using local settings");
                    self.quorum_settings(Node::Local, requested).await
                }
            },
            None => self.quorum_settings(Node::Local, requested).await,
        };
        let standbys = match settings {
            Ok(standbys) => standbys,
            Err(e) => return MemberHealth::unhealthy(&member.name, format!("replication settings: {e}")),
        };

        if let Some(raw) = standbys
            && !cluster.is_leader(&member.name, now)
        {
            match SyncStandbySpec::parse(&raw) {
                // Nothing configured: commits do not wait on any standby.
                Ok(spec) if spec.is_empty() => {}
                Ok(spec) if spec.matches(&member.name) => {}
                Ok(_) => {
                    return MemberHealth::unhealthy(&member.name, "not in the synchronous standby quorum");
                }
                Err(e) => {
                    warn!(error = %e, "unparsable synchronous_standby_names");
                    return MemberHealth::unhealthy(&member.name, e.to_string());
                }
            }
        }

        let position = match self.node_position(self.node_for(member)).await {
            Ok(position) => position,
            Err(e) => return MemberHealth::unhealthy(&member.name, e.to_string()),
        };

        if let Some(reference) = cluster.op_time {
            let max_lag = cluster.ha_config.max_lag_on_switchover();
            match lsn::lag(&reference, &position) {
                Ok(lag) if lag > max_lag => {
                    return MemberHealth::unhealthy(
                        &member.name,
                        format!("lagging {lag} bytes behind, limit is {max_lag}"),
                    );
                }
                Ok(_) => {}
                Err(e) => return MemberHealth::unhealthy(&member.name, e.to_string()),
            }
        }

        MemberHealth::healthy(&member.name, Some(position))
    }

    /// `true` iff [`DatabaseAdapter::evaluate_health`] is healthy.
    async fn is_healthy(&self, cluster: &Cluster, member: &Member) -> bool {
        self.evaluate_health(cluster, member).await.healthy
    }

    /// Starts the engine if its process is gone. Returns whether a start
    /// was issued.
    async fn recover(&self) -> Result<bool, HaError> {
        if self.is_running().await {
            return Ok(false);
        }
        self.start().await?;
        Ok(true)
    }
}

/// Whether a configured upstream host designates `leader`: either the
/// exact host, or a DNS name whose first label is the leader's name.
#[must_use]
pub fn host_matches(host: &str, leader: &Member) -> bool {
    host == leader.host || host.split('.').next() == Some(leader.name.as_str())
}

/// Builds the adapter for the configured engine.
///
/// # Errors
///
/// Returns [`HaError::Config`] if the engine cannot be initialised.
pub fn build(config: &CoordinatorConfig) -> Result<Arc<dyn DatabaseAdapter>, HaError> {
    match config.engine {
        EngineKind::Postgres => Ok(Arc::new(PostgresAdapter::new(
            config.member_name.clone(),
            config.postgres.clone(),
            config.probe_timeout,
        )?)),
        EngineKind::Memory => Ok(Arc::new(InMemoryAdapter::seeded(NodeState::secondary(
            &config.member_name,
            1,
            0,
        )))),
    }
}
