//! Coordinator state and command DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::MemberDto;

/// Response body for `GET /api/v1/state`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StateResponse {
    /// Managed member.
    pub member: String,
    /// Engine behind the adapter.
    pub engine: String,
    /// Coordinator state (`unknown`, `leading`, `following`, ...).
    pub state: String,
    /// Report of the latest tick.
    #[schema(value_type = Option<Object>)]
    pub last_tick: Option<serde_json::Value>,
}

/// Response body for `GET /api/v1/leader`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LeaderResponse {
    /// Managed member.
    pub member: String,
    /// Local engine reports itself as primary.
    pub is_leader: bool,
}

/// Response body for `GET /api/v1/leader/other`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtherLeaderResponse {
    /// Another member running as primary, if any.
    pub leader: Option<MemberDto>,
}

/// Response body for command endpoints.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandResponse {
    /// Command that ran.
    pub command: String,
    /// State after the command.
    pub state: String,
    /// Command-specific outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub detail: Option<serde_json::Value>,
}
