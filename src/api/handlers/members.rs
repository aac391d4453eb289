//! Member listing and health handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{
    HealthyMembersQuery, HealthyMembersResponse, MemberDto, MemberHealthResponse,
    MemberListResponse, MemberSummaryDto,
};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, HaError};

/// `GET /members` — Members of the latest snapshot with their verdicts.
#[utoipa::path(
    get,
    path = "/api/v1/members",
    tag = "Members",
    summary = "List members",
    description = "Returns the members read by the latest tick. Health is filled in for the local member and, on the leader, for every member.",
    responses(
        (status = 200, description = "Member list", body = MemberListResponse),
    )
)]
pub async fn list_members(State(state): State<AppState>) -> impl IntoResponse {
    let cluster = state.coordinator.last_cluster().await.unwrap_or_default();
    let verdicts = state
        .coordinator
        .last_report()
        .await
        .map(|report| report.members)
        .unwrap_or_default();

    let now = Utc::now();
    let data = cluster
        .members
        .iter()
        .map(|member| {
            let verdict = verdicts.iter().find(|h| h.member == member.name);
            MemberSummaryDto {
                member: MemberDto::from(member),
                is_leader: cluster.is_leader(&member.name, now),
                healthy: verdict.map(|h| h.healthy),
                reason: verdict.and_then(|h| h.reason.clone()),
            }
        })
        .collect();

    Json(MemberListResponse {
        leader: cluster.lock_owner(now).map(str::to_owned),
        data,
    })
}

/// `GET /members/{name}/health` — Health verdict for one member.
///
/// # Errors
///
/// Returns [`HaError::MemberNotFound`] for unknown members and store
/// errors.
#[utoipa::path(
    get,
    path = "/api/v1/members/{name}/health",
    tag = "Members",
    summary = "Member health",
    description = "Evaluates reachability, synchronous quorum membership and replication lag for the member.",
    params(("name" = String, Path, description = "Member name")),
    responses(
        (status = 200, description = "Health verdict", body = MemberHealthResponse),
        (status = 404, description = "Unknown member", body = ErrorResponse),
        (status = 503, description = "Coordination store unavailable", body = ErrorResponse),
    )
)]
pub async fn member_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, HaError> {
    let health = state.coordinator.member_health(&name).await?;
    Ok(Json(MemberHealthResponse::from(health)))
}

/// `GET /members/healthy` — Healthy members other than the excluded one.
#[utoipa::path(
    get,
    path = "/api/v1/members/healthy",
    tag = "Members",
    summary = "Healthy failover candidates",
    params(HealthyMembersQuery),
    responses(
        (status = 200, description = "Healthy members", body = HealthyMembersResponse),
    )
)]
pub async fn healthy_members(
    State(state): State<AppState>,
    Query(query): Query<HealthyMembersQuery>,
) -> impl IntoResponse {
    let exclude = query.exclude_leader.unwrap_or_default();
    let members = state.coordinator.has_other_healthy_members(&exclude).await;
    Json(HealthyMembersResponse {
        data: members.iter().map(MemberDto::from).collect(),
    })
}

/// Member routes, relative to `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/members", get(list_members))
        .route("/members/healthy", get(healthy_members))
        .route("/members/{name}/health", get(member_health))
}
