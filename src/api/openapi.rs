//! OpenAPI document for the REST surface.

use axum::Router;
use utoipa::OpenApi;

use crate::api::dto::{
    CommandResponse, HealthyMembersResponse, LeaderResponse, MemberDto, MemberHealthResponse,
    MemberListResponse, MemberSummaryDto, OtherLeaderResponse, StateResponse,
};
use crate::api::handlers::{ha, members, system};
use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};

/// Path of the generated JSON document.
pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

/// Aggregated OpenAPI description of every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "pg-ha-coordinator",
        description = "Per-node high-availability coordinator for replicated PostgreSQL clusters."
    ),
    paths(
        system::health_handler,
        ha::get_state,
        ha::get_leader,
        ha::get_other_leader,
        ha::promote,
        ha::demote,
        ha::follow,
        ha::recover,
        members::list_members,
        members::member_health,
        members::healthy_members,
    ),
    components(schemas(
        system::HealthResponse,
        StateResponse,
        LeaderResponse,
        OtherLeaderResponse,
        CommandResponse,
        MemberDto,
        MemberSummaryDto,
        MemberListResponse,
        MemberHealthResponse,
        HealthyMembersResponse,
        ErrorResponse,
        ErrorBody,
    )),
    tags(
        (name = "System", description = "Process liveness"),
        (name = "HA", description = "Coordinator state and role commands"),
        (name = "Members", description = "Cluster members and health verdicts"),
    )
)]
pub struct ApiDoc;

/// Routes serving the document, plus Swagger UI when the feature is on.
#[cfg(feature = "swagger-ui")]
pub fn routes() -> Router<AppState> {
    use utoipa_swagger_ui::SwaggerUi;

    Router::new().merge(SwaggerUi::new("/swagger-ui").url(OPENAPI_JSON_PATH, ApiDoc::openapi()))
}

/// Routes serving the document, plus Swagger UI when the feature is on.
#[cfg(not(feature = "swagger-ui"))]
pub fn routes() -> Router<AppState> {
    use axum::Json;
    use axum::routing::get;

    Router::new().route(OPENAPI_JSON_PATH, get(|| async { Json(ApiDoc::openapi()) }))
}
