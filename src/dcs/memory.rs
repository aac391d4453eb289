//! In-memory coordination store for tests and single-process setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CoordinationStore;
use crate::domain::{Cluster, MemberStatus};
use crate::error::HaError;

/// [`CoordinationStore`] holding the snapshot in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    cluster: RwLock<Cluster>,
    statuses: RwLock<HashMap<String, MemberStatus>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Creates a store serving `cluster`.
    #[must_use]
    pub fn new(cluster: Cluster) -> Self {
        Self {
            cluster: RwLock::new(cluster),
            ..Self::default()
        }
    }

    /// Replaces the snapshot, as a lock change in the real store would.
    pub async fn set_cluster(&self, cluster: Cluster) {
        *self.cluster.write().await = cluster;
    }

    /// Simulates a store outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Last status published by `member`.
    pub async fn status(&self, member: &str) -> Option<MemberStatus> {
        self.statuses.read().await.get(member).cloned()
    }

    fn check_available(&self) -> Result<(), HaError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HaError::Store("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn get_cluster(&self) -> Result<Cluster, HaError> {
        self.check_available()?;
        let cluster = self.cluster.read().await.clone();
        cluster.validate()?;
        Ok(cluster)
    }

    async fn publish_status(&self, status: &MemberStatus) -> Result<(), HaError> {
        self.check_available()?;
        self.statuses
            .write()
            .await
            .insert(status.member.clone(), status.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::domain::Member;

    #[tokio::test]
    async fn outage_fails_reads() {
        let store = InMemoryStore::new(Cluster {
            members: vec![Member::new("m1", "h1", 5432)],
            ..Cluster::default()
        });
        let cluster = assert_ok!(store.get_cluster().await);
        assert_eq!(cluster.members.len(), 1);

        store.set_unavailable(true);
        let e = assert_err!(store.get_cluster().await);
        assert!(e.is_transient());

        store.set_unavailable(false);
        assert_ok!(store.get_cluster().await);
    }
}
