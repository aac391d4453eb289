//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::service::HaCoordinator;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Coordinator for the local node.
    pub coordinator: Arc<HaCoordinator>,
    /// Event bus for WebSocket subscriptions.
    pub event_bus: EventBus,
}

impl AppState {
    /// Builds the state around `coordinator`, sharing its event bus.
    #[must_use]
    pub fn new(coordinator: Arc<HaCoordinator>) -> Self {
        let event_bus = coordinator.event_bus().clone();
        Self {
            coordinator,
            event_bus,
        }
    }
}
