//! Coordinator state, leadership queries and role commands.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::adapter::UpstreamAction;
use crate::api::dto::{
    CommandResponse, LeaderResponse, MemberDto, OtherLeaderResponse, StateResponse,
};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, HaError};

/// `GET /state` — Coordinator state and the latest tick report.
#[utoipa::path(
    get,
    path = "/api/v1/state",
    tag = "HA",
    summary = "Coordinator state",
    description = "Returns the current HA state of the managed member and the report of the latest coordinator tick.",
    responses(
        (status = 200, description = "Current state", body = StateResponse),
    )
)]
pub async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    let last_tick = coordinator
        .last_report()
        .await
        .and_then(|report| serde_json::to_value(report).ok());

    Json(StateResponse {
        member: coordinator.member_name().to_string(),
        engine: coordinator.engine().to_string(),
        state: coordinator.state().await.to_string(),
        last_tick,
    })
}

/// `GET /leader` — Whether the local engine runs as primary.
///
/// # Errors
///
/// Returns [`HaError`] when the local engine cannot be probed.
#[utoipa::path(
    get,
    path = "/api/v1/leader",
    tag = "HA",
    summary = "Is the local node the leader",
    responses(
        (status = 200, description = "Leadership of the local node", body = LeaderResponse),
        (status = 503, description = "Local engine unreachable", body = ErrorResponse),
        (status = 504, description = "Probe timed out", body = ErrorResponse),
    )
)]
pub async fn get_leader(State(state): State<AppState>) -> Result<impl IntoResponse, HaError> {
    let is_leader = state.coordinator.is_leader().await?;
    Ok(Json(LeaderResponse {
        member: state.coordinator.member_name().to_string(),
        is_leader,
    }))
}

/// `GET /leader/other` — Another member running as primary.
#[utoipa::path(
    get,
    path = "/api/v1/leader/other",
    tag = "HA",
    summary = "Find another primary",
    description = "Probes every other member and returns the first one that reports itself as primary.",
    responses(
        (status = 200, description = "Other primary, or null", body = OtherLeaderResponse),
    )
)]
pub async fn get_other_leader(State(state): State<AppState>) -> impl IntoResponse {
    let leader = state.coordinator.has_other_healthy_leader().await;
    Json(OtherLeaderResponse {
        leader: leader.as_ref().map(MemberDto::from),
    })
}

async fn command_response(
    state: &AppState,
    command: &str,
    detail: Option<serde_json::Value>,
) -> Json<CommandResponse> {
    Json(CommandResponse {
        command: command.to_string(),
        state: state.coordinator.state().await.to_string(),
        detail,
    })
}

/// `POST /promote` — Promote the local node.
///
/// # Errors
///
/// Returns [`HaError`] when the engine command fails.
#[utoipa::path(
    post,
    path = "/api/v1/promote",
    tag = "HA",
    summary = "Promote the local node",
    responses(
        (status = 200, description = "Node promoted", body = CommandResponse),
        (status = 500, description = "Promotion failed", body = ErrorResponse),
    )
)]
pub async fn promote(State(state): State<AppState>) -> Result<impl IntoResponse, HaError> {
    state.coordinator.promote().await?;
    Ok(command_response(&state, "promote", None).await)
}

/// `POST /demote` — Stop the local writable service.
///
/// # Errors
///
/// Returns [`HaError`] when the engine command fails.
#[utoipa::path(
    post,
    path = "/api/v1/demote",
    tag = "HA",
    summary = "Demote the local node",
    responses(
        (status = 200, description = "Node demoted", body = CommandResponse),
        (status = 500, description = "Demotion failed", body = ErrorResponse),
    )
)]
pub async fn demote(State(state): State<AppState>) -> Result<impl IntoResponse, HaError> {
    state.coordinator.demote().await?;
    Ok(command_response(&state, "demote", None).await)
}

/// `POST /follow` — Follow the current leader lock holder.
///
/// # Errors
///
/// Returns [`HaError`] when there is no leader, the store is unreachable
/// or the engine command fails.
#[utoipa::path(
    post,
    path = "/api/v1/follow",
    tag = "HA",
    summary = "Follow the leader",
    description = "Rewinds if the local history diverged, then points replication at the leader, reloading or restarting as needed.",
    responses(
        (status = 200, description = "Following the leader", body = CommandResponse),
        (status = 409, description = "No leader", body = ErrorResponse),
        (status = 500, description = "Rewind or reconfiguration failed", body = ErrorResponse),
    )
)]
pub async fn follow(State(state): State<AppState>) -> Result<impl IntoResponse, HaError> {
    let outcome = state.coordinator.follow_current().await?;
    let action = match outcome.action {
        UpstreamAction::NoChange => "no_change",
        UpstreamAction::Reload => "reload",
        UpstreamAction::Restart => "restart",
    };
    let detail = serde_json::json!({ "rewound": outcome.rewound, "action": action });
    Ok(command_response(&state, "follow", Some(detail)).await)
}

/// `POST /recover` — Start the engine if it is down.
///
/// # Errors
///
/// Returns [`HaError`] when the engine fails to start.
#[utoipa::path(
    post,
    path = "/api/v1/recover",
    tag = "HA",
    summary = "Recover the local engine",
    responses(
        (status = 200, description = "Engine running", body = CommandResponse),
        (status = 500, description = "Start failed", body = ErrorResponse),
    )
)]
pub async fn recover(State(state): State<AppState>) -> Result<impl IntoResponse, HaError> {
    let started = state.coordinator.recover().await?;
    let detail = serde_json::json!({ "started": started });
    Ok(command_response(&state, "recover", Some(detail)).await)
}

/// HA routes, relative to `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/state", get(get_state))
        .route("/leader", get(get_leader))
        .route("/leader/other", get(get_other_leader))
        .route("/promote", post(promote))
        .route("/demote", post(demote))
        .route("/follow", post(follow))
        .route("/recover", post(recover))
}
