//! Node roles, replication modes and coordinator states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role a database node reports for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Writable node, not in recovery.
    Primary,
    /// Read-only node replaying WAL from an upstream.
    Secondary,
}

impl Role {
    /// Maps the engine's "in recovery" flag to a role.
    #[must_use]
    pub const fn from_in_recovery(in_recovery: bool) -> Self {
        if in_recovery { Self::Secondary } else { Self::Primary }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        })
    }
}

/// Commit durability mode, derived from engine settings on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Commits do not wait for standbys.
    Asynchronous,
    /// Commits wait for the synchronous standby quorum.
    Synchronous,
}

impl ReplicationMode {
    /// Maps a `synchronous_commit` value. Unrecognised values count as
    /// synchronous so health checks stay strict.
    #[must_use]
    pub fn from_synchronous_commit(setting: &str) -> Self {
        match setting.trim().to_ascii_lowercase().as_str() {
            "off" | "local" | "remote_write" => Self::Asynchronous,
            _ => Self::Synchronous,
        }
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asynchronous => "asynchronous",
            Self::Synchronous => "synchronous",
        })
    }
}

/// Which WAL position to read from a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalKind {
    /// Current insert position; primaries only.
    Current,
    /// Last replayed position; secondaries only.
    Replayed,
    /// Last received position; secondaries only.
    Received,
}

impl WalKind {
    /// Role a node must be in for this position to be defined.
    #[must_use]
    pub const fn required_role(self) -> Role {
        match self {
            Self::Current => Role::Primary,
            Self::Replayed | Self::Received => Role::Secondary,
        }
    }
}

impl fmt::Display for WalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Current => "current",
            Self::Replayed => "replayed",
            Self::Received => "received",
        })
    }
}

/// Coordinator state for the local node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaState {
    /// No decision has been made yet, or the last one was inconclusive.
    #[default]
    Unknown,
    /// Local node is primary and holds the leader lock.
    Leading,
    /// Local node replicates from the lock holder.
    Following,
    /// Promotion in progress.
    Promoting,
    /// Demotion in progress.
    Demoting,
}

impl fmt::Display for HaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Leading => "leading",
            Self::Following => "following",
            Self::Promoting => "promoting",
            Self::Demoting => "demoting",
        })
    }
}
