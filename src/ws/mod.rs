//! WebSocket layer: connection handling, message routing, subscriptions.
//!
//! The endpoint at `/ws` streams coordinator events for subscribed
//! members and answers state queries.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod subscription;
