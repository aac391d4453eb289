//! # pg-ha-coordinator
//!
//! Per-node high-availability coordinator for replicated PostgreSQL
//! clusters.
//!
//! One coordinator runs next to each database node. On every tick it
//! reads the cluster snapshot from the coordination store, probes the
//! local engine, and reconciles the local role with the leader lock:
//! promoting, demoting, rewinding a diverged history, or repointing
//! replication at the current leader. Leader election itself belongs to
//! whatever maintains the lock in the store.
//!
//! ## Architecture
//!
//! ```text
//! Operators / tooling (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler (ws/)
//!     │
//!     ├── HaCoordinator (service/)
//!     ├── EventBus (domain/)
//!     │
//!     ├── CoordinationStore (dcs/)
//!     └── DatabaseAdapter (adapter/)
//!             │
//!             ├── PostgreSQL (sqlx + pg_ctl / pg_rewind)
//!             └── In-memory engine
//! ```

pub mod adapter;
pub mod api;
pub mod app_state;
pub mod config;
pub mod dcs;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;
