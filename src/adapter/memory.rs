//! In-memory engine used for tests and dry runs.
//!
//! Every member's node is a [`NodeState`] in one shared map, so a single
//! adapter can play both the local node and the remote members it probes.
//! Control commands mutate the local entry and are recorded in order.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{DatabaseAdapter, Node, UpstreamAction};
use crate::domain::{
    HistoryEntry, LocalPosition, Member, ReplicationMode, Role, Timeline, WalKind, WalPosition,
};
use crate::error::HaError;

/// Simulated state of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    /// Member name.
    pub name: String,
    /// Engine process alive.
    pub running: bool,
    /// Replaying WAL from an upstream.
    pub in_recovery: bool,
    /// Current timeline.
    pub timeline: Timeline,
    /// Insert position on a primary, replay/receive position on a standby.
    pub position: WalPosition,
    /// `synchronous_commit` setting.
    pub synchronous_commit: String,
    /// `synchronous_standby_names` setting.
    pub sync_standby_names: String,
    /// History of the current timeline.
    pub history: Vec<HistoryEntry>,
    /// Member the node replicates from.
    pub upstream: Option<String>,
    /// Standby signal file present.
    pub standby_signal: bool,
}

impl NodeState {
    fn base(name: &str, running: bool, in_recovery: bool, timeline: Timeline, position: u64) -> Self {
        Self {
            name: name.to_string(),
            running,
            in_recovery,
            timeline,
            position: WalPosition::new(position),
            synchronous_commit: "local".to_string(),
            sync_standby_names: String::new(),
            history: Vec::new(),
            upstream: None,
            standby_signal: in_recovery,
        }
    }

    /// Running primary.
    #[must_use]
    pub fn primary(name: &str, timeline: Timeline, position: u64) -> Self {
        Self::base(name, true, false, timeline, position)
    }

    /// Running standby without a configured upstream.
    #[must_use]
    pub fn secondary(name: &str, timeline: Timeline, position: u64) -> Self {
        Self::base(name, true, true, timeline, position)
    }

    /// Stopped node; `in_recovery` is the state recorded at shutdown.
    #[must_use]
    pub fn stopped(name: &str, in_recovery: bool, timeline: Timeline, position: u64) -> Self {
        Self::base(name, false, in_recovery, timeline, position)
    }

    fn role(&self) -> Role {
        Role::from_in_recovery(self.in_recovery)
    }
}

/// Control command issued against the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCommand {
    /// Promotion.
    Promote,
    /// Fast stop.
    Demote,
    /// Upstream rewritten.
    Reconfigure {
        /// New upstream.
        leader: String,
        /// Restarted instead of reloaded.
        restart: bool,
    },
    /// Data rewound.
    Rewind {
        /// Rewind source.
        leader: String,
    },
    /// Engine started.
    Start,
}

/// Command kinds that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// [`DatabaseAdapter::promote`].
    Promote,
    /// [`DatabaseAdapter::demote`].
    Demote,
    /// [`DatabaseAdapter::reconfigure_upstream`].
    Reconfigure,
    /// [`DatabaseAdapter::rewind`].
    Rewind,
    /// [`DatabaseAdapter::start`].
    Start,
}

/// [`DatabaseAdapter`] backed by a map of simulated nodes.
#[derive(Debug)]
pub struct InMemoryAdapter {
    member_name: String,
    nodes: Mutex<HashMap<String, NodeState>>,
    commands: Mutex<Vec<AdapterCommand>>,
    failures: Mutex<HashSet<FailPoint>>,
}

impl InMemoryAdapter {
    /// Creates an adapter managing `member_name`, with no nodes.
    pub fn new(member_name: impl Into<String>) -> Self {
        Self {
            member_name: member_name.into(),
            nodes: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Creates an adapter whose local node starts as `local`.
    #[must_use]
    pub fn seeded(local: NodeState) -> Self {
        let member_name = local.name.clone();
        Self {
            member_name: member_name.clone(),
            nodes: Mutex::new(HashMap::from([(member_name, local)])),
            commands: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Inserts or replaces a node.
    pub async fn set_node(&self, state: NodeState) {
        self.nodes.lock().await.insert(state.name.clone(), state);
    }

    /// Removes a node, making it unreachable.
    pub async fn remove_node(&self, name: &str) {
        self.nodes.lock().await.remove(name);
    }

    /// Snapshot of a node.
    pub async fn node(&self, name: &str) -> Option<NodeState> {
        self.nodes.lock().await.get(name).cloned()
    }

    /// Commands issued so far, in order.
    pub async fn commands(&self) -> Vec<AdapterCommand> {
        self.commands.lock().await.clone()
    }

    /// Makes every later call of the given command fail until cleared.
    pub async fn fail(&self, point: FailPoint) {
        self.failures.lock().await.insert(point);
    }

    /// Clears an injected failure.
    pub async fn clear_failure(&self, point: FailPoint) {
        self.failures.lock().await.remove(&point);
    }

    fn name_of<'a>(&'a self, node: &Node<'a>) -> &'a str {
        match node {
            Node::Local => &self.member_name,
            Node::Remote(member) => &member.name,
        }
    }

    async fn reachable(&self, node: Node<'_>) -> Result<NodeState, HaError> {
        let name = self.name_of(&node);
        match self.nodes.lock().await.get(name) {
            Some(state) if state.running => Ok(state.clone()),
            Some(_) => Err(HaError::connection(name, "engine is not running")),
            None => Err(HaError::connection(name, "no such host")),
        }
    }

    async fn issue(&self, point: FailPoint, command: AdapterCommand) -> Result<(), HaError> {
        if self.failures.lock().await.contains(&point) {
            return Err(HaError::CommandFailed {
                command: format!("{command:?}"),
                stderr: "injected failure".to_string(),
            });
        }
        self.commands.lock().await.push(command);
        Ok(())
    }

    async fn with_local<T>(&self, f: impl FnOnce(&mut NodeState) -> T) -> Result<T, HaError> {
        let mut nodes = self.nodes.lock().await;
        let state = nodes
            .get_mut(&self.member_name)
            .ok_or_else(|| HaError::connection(&self.member_name, "local node missing"))?;
        Ok(f(state))
    }
}

#[async_trait]
impl DatabaseAdapter for InMemoryAdapter {
    fn engine(&self) -> &'static str {
        "memory"
    }

    fn member_name(&self) -> &str {
        &self.member_name
    }

    async fn current_role(&self, node: Node<'_>) -> Result<Role, HaError> {
        Ok(self.reachable(node).await?.role())
    }

    async fn replication_mode(&self, node: Node<'_>) -> Result<ReplicationMode, HaError> {
        let state = self.reachable(node).await?;
        Ok(ReplicationMode::from_synchronous_commit(&state.synchronous_commit))
    }

    async fn sync_standby_names(&self, node: Node<'_>) -> Result<String, HaError> {
        Ok(self.reachable(node).await?.sync_standby_names)
    }

    async fn wal_position(&self, node: Node<'_>, kind: WalKind) -> Result<WalPosition, HaError> {
        let state = self.reachable(node).await?;
        let role = state.role();
        if role != kind.required_role() {
            return Err(HaError::RoleMismatch {
                operation: format!("{kind} wal position"),
                expected: kind.required_role().to_string(),
                actual: role.to_string(),
            });
        }
        Ok(state.position)
    }

    async fn timeline(&self, node: Node<'_>) -> Result<Timeline, HaError> {
        Ok(self.reachable(node).await?.timeline)
    }

    async fn timeline_history(
        &self,
        node: Node<'_>,
        timeline: Timeline,
    ) -> Result<Vec<HistoryEntry>, HaError> {
        let state = self.reachable(node).await?;
        if timeline <= 1 {
            return Ok(Vec::new());
        }
        Ok(state.history)
    }

    async fn local_timeline_and_position(&self) -> Result<LocalPosition, HaError> {
        self.with_local(|state| LocalPosition {
            in_recovery: state.in_recovery,
            timeline: state.timeline,
            position: state.position,
        })
        .await
    }

    async fn is_running(&self) -> bool {
        self.with_local(|state| state.running).await.unwrap_or(false)
    }

    async fn upstream_action(&self, leader: &Member) -> Result<UpstreamAction, HaError> {
        self.with_local(|state| {
            if !state.standby_signal || !state.running {
                UpstreamAction::Restart
            } else if state.upstream.as_deref() == Some(leader.name.as_str()) {
                UpstreamAction::NoChange
            } else {
                UpstreamAction::Reload
            }
        })
        .await
    }

    async fn promote(&self) -> Result<(), HaError> {
        let state = self.reachable(Node::Local).await?;
        if !state.in_recovery {
            return Ok(());
        }
        self.issue(FailPoint::Promote, AdapterCommand::Promote).await?;
        self.with_local(|state| {
            state.history.push(HistoryEntry {
                parent_timeline: state.timeline,
                switch_point: state.position,
                reason: "promoted".to_string(),
            });
            state.timeline += 1;
            state.in_recovery = false;
            state.standby_signal = false;
            state.upstream = None;
        })
        .await?;
        info!(member = %self.member_name, "promoted");
        Ok(())
    }

    async fn demote(&self) -> Result<(), HaError> {
        self.issue(FailPoint::Demote, AdapterCommand::Demote).await?;
        self.with_local(|state| state.running = false).await
    }

    async fn reconfigure_upstream(&self, leader: &Member, restart: bool) -> Result<(), HaError> {
        self.issue(
            FailPoint::Reconfigure,
            AdapterCommand::Reconfigure {
                leader: leader.name.clone(),
                restart,
            },
        )
        .await?;
        self.with_local(|state| {
            state.upstream = Some(leader.name.clone());
            if restart {
                state.standby_signal = true;
                state.in_recovery = true;
                state.running = true;
            }
        })
        .await
    }

    async fn rewind(&self, leader: &Member) -> Result<(), HaError> {
        let source = self.reachable(Node::Remote(leader)).await?;
        self.issue(
            FailPoint::Rewind,
            AdapterCommand::Rewind {
                leader: leader.name.clone(),
            },
        )
        .await
        .map_err(|e| HaError::RewindFailed(e.to_string()))?;
        self.with_local(|state| {
            state.running = false;
            state.timeline = source.timeline;
            state.position = source.position;
            state.history = source.history;
        })
        .await
    }

    async fn start(&self) -> Result<(), HaError> {
        self.issue(FailPoint::Start, AdapterCommand::Start).await?;
        self.with_local(|state| state.running = true).await
    }
}
