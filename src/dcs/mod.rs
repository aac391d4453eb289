//! Coordination store client.
//!
//! The store is external and already consistent: it owns the leader lock
//! and the member registry. The coordinator only reads snapshots and writes
//! back its own status.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::domain::{Cluster, MemberStatus};
use crate::error::HaError;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;

/// Read/write access to the coordination store.
#[async_trait]
pub trait CoordinationStore: Send + Sync + std::fmt::Debug {
    /// Reads a fresh, validated cluster snapshot.
    async fn get_cluster(&self) -> Result<Cluster, HaError>;

    /// Publishes the local member's status.
    async fn publish_status(&self, status: &MemberStatus) -> Result<(), HaError>;
}
