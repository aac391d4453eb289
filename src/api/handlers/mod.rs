//! REST endpoint handlers organized by resource.

pub mod ha;
pub mod members;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().merge(ha::routes()).merge(members::routes())
}
