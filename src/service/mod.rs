//! Service layer: the HA control loop.
//!
//! [`HaCoordinator`] combines coordination-store snapshots with adapter
//! probes, drives role transitions and emits events through the
//! [`super::domain::EventBus`].

pub mod coordinator;

pub use coordinator::{HaCoordinator, TickAction, TickReport};
