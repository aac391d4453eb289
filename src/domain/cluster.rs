//! Cluster topology snapshot read from the coordination store.
//!
//! A [`Cluster`] is immutable once read: the coordinator replaces the whole
//! snapshot on every tick and never edits it in place.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::lsn::TimelinePosition;
use super::role::{HaState, Role};
use crate::error::HaError;

/// A database node registered in the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Unique member name; also used as the replication `application_name`.
    pub name: String,
    /// Host name or IP the member's database listens on.
    pub host: String,
    /// Database port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    5432
}

impl Member {
    /// Creates a member.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// `host:port` address of the member's database.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Holder of the leader lock plus its lease metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    /// Name of the member holding the lock.
    pub name: String,
    /// When the lock was acquired.
    #[serde(default)]
    pub acquire_time: Option<DateTime<Utc>>,
    /// Last lease renewal.
    #[serde(default)]
    pub renew_time: Option<DateTime<Utc>>,
}

/// HA policy shared by every member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaConfig {
    /// Maximum replication lag in bytes for a member to stay a switchover
    /// candidate.
    #[serde(default = "default_max_lag")]
    pub max_lag_on_switchover: u64,
    /// Leader lease time-to-live in seconds; `0` disables expiry checks.
    #[serde(default)]
    pub ttl_secs: u64,
    /// Cluster-level request for synchronous replication. When set, the
    /// quorum check applies to standbys even if the leader's engine still
    /// reports asynchronous replication.
    #[serde(default)]
    pub synchronous_mode: bool,
    /// Refuse to commit without a synchronous standby.
    ///
    /// Enforced by whoever writes the leader's replication settings; the
    /// coordinator only carries the flag through the snapshot.
    #[serde(default)]
    pub synchronous_mode_strict: bool,
}

fn default_max_lag() -> u64 {
    1_048_576
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            max_lag_on_switchover: default_max_lag(),
            ttl_secs: 0,
            synchronous_mode: false,
            synchronous_mode_strict: false,
        }
    }
}

impl HaConfig {
    /// Maximum tolerated lag in bytes.
    #[must_use]
    pub const fn max_lag_on_switchover(&self) -> u64 {
        self.max_lag_on_switchover
    }
}

/// Snapshot of the coordination store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Leader lock holder, if any.
    #[serde(default)]
    pub leader: Option<Leader>,
    /// Registered members, unique by name.
    #[serde(default)]
    pub members: Vec<Member>,
    /// HA policy.
    #[serde(default)]
    pub ha_config: HaConfig,
    /// Leader's last published position, used as the lag reference.
    #[serde(default)]
    pub op_time: Option<TimelinePosition>,
}

impl Cluster {
    /// Checks structural invariants of a freshly read snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Store`] if member names repeat or are empty.
    pub fn validate(&self) -> Result<(), HaError> {
        let mut seen = HashSet::with_capacity(self.members.len());
        for member in &self.members {
            if member.name.is_empty() {
                return Err(HaError::Store("member with empty name".to_string()));
            }
            if !seen.insert(member.name.as_str()) {
                return Err(HaError::Store(format!(
                    "duplicate member name {}",
                    member.name
                )));
            }
        }
        Ok(())
    }

    /// Looks up a member by name.
    #[must_use]
    pub fn get_member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Name on the leader lock, regardless of lease expiry.
    #[must_use]
    pub fn leader_name(&self) -> Option<&str> {
        self.leader.as_ref().map(|l| l.name.as_str())
    }

    /// Address used to reach `member`.
    #[must_use]
    pub fn member_address(&self, member: &Member) -> String {
        member.address()
    }

    /// Lock holder whose lease is still valid at `now`.
    ///
    /// Without a TTL or a renewal timestamp the lock is taken at face value.
    #[must_use]
    pub fn lock_owner(&self, now: DateTime<Utc>) -> Option<&str> {
        let leader = self.leader.as_ref()?;
        if self.ha_config.ttl_secs > 0
            && let Some(renewed) = leader.renew_time
            && let Some(ttl) = i64::try_from(self.ha_config.ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
            && renewed.checked_add_signed(ttl).is_some_and(|expiry| expiry < now)
        {
            return None;
        }
        Some(leader.name.as_str())
    }

    /// Member record of the lock holder, if its lease is valid at `now`.
    #[must_use]
    pub fn lock_holder(&self, now: DateTime<Utc>) -> Option<&Member> {
        self.lock_owner(now).and_then(|name| self.get_member(name))
    }

    /// `true` if `name` holds the leader lock with a valid lease at `now`.
    #[must_use]
    pub fn is_leader(&self, name: &str, now: DateTime<Utc>) -> bool {
        self.lock_owner(now) == Some(name)
    }
}

/// Health verdict for one member, produced per tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberHealth {
    /// Member name.
    pub member: String,
    /// Overall verdict.
    pub healthy: bool,
    /// Why the member was judged unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Position measured during the check, when reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<TimelinePosition>,
}

impl MemberHealth {
    /// A healthy verdict.
    pub fn healthy(member: impl Into<String>, position: Option<TimelinePosition>) -> Self {
        Self {
            member: member.into(),
            healthy: true,
            reason: None,
            position,
        }
    }

    /// An unhealthy verdict with its reason.
    pub fn unhealthy(member: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            healthy: false,
            reason: Some(reason.into()),
            position: None,
        }
    }
}

/// Status the local coordinator writes back to the store every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatus {
    /// Member name.
    pub member: String,
    /// Coordinator state.
    pub state: HaState,
    /// Role reported by the engine, if reachable.
    pub role: Option<Role>,
    /// Local position, if known.
    pub position: Option<TimelinePosition>,
    /// Whether the member is a failover candidate.
    pub healthy: bool,
    /// Time of the report.
    pub updated_at: DateTime<Utc>,
}
