//! Member listing and health DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{Member, MemberHealth};

/// Registered member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MemberDto {
    /// Unique member name.
    pub name: String,
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
}

impl From<&Member> for MemberDto {
    fn from(member: &Member) -> Self {
        Self {
            name: member.name.clone(),
            host: member.host.clone(),
            port: member.port,
        }
    }
}

/// Member as seen by the latest tick.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MemberSummaryDto {
    /// Member record.
    #[serde(flatten)]
    pub member: MemberDto,
    /// Holds the leader lock.
    pub is_leader: bool,
    /// Verdict from the latest tick, if this member was evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
    /// Reason for an unhealthy verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Response body for `GET /api/v1/members`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MemberListResponse {
    /// Leader lock holder.
    pub leader: Option<String>,
    /// Members of the latest snapshot.
    pub data: Vec<MemberSummaryDto>,
}

/// Response body for `GET /api/v1/members/{name}/health`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MemberHealthResponse {
    /// Member name.
    pub name: String,
    /// Failover candidate.
    pub healthy: bool,
    /// Why the member is unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Timeline measured during the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<u32>,
    /// Position measured during the check, in `XXXX/YYYYYYYY` form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl From<MemberHealth> for MemberHealthResponse {
    fn from(health: MemberHealth) -> Self {
        Self {
            name: health.member,
            healthy: health.healthy,
            reason: health.reason,
            timeline: health.position.map(|p| p.timeline),
            position: health.position.map(|p| p.position.to_string()),
        }
    }
}

/// Query parameters for `GET /api/v1/members/healthy`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HealthyMembersQuery {
    /// Member to leave out, usually the current leader.
    #[serde(default)]
    pub exclude_leader: Option<String>,
}

/// Response body for `GET /api/v1/members/healthy`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthyMembersResponse {
    /// Healthy members, in cluster order.
    pub data: Vec<MemberDto>,
}
