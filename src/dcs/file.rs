//! Coordination store backed by a JSON document on disk.
//!
//! An external agent (a sidecar syncing a key-value store, or a projected
//! config map) keeps the document current. Status reports go to one file
//! per member, replaced atomically.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::CoordinationStore;
use crate::domain::{Cluster, MemberStatus};
use crate::error::HaError;

/// [`CoordinationStore`] reading `cluster.json`-style documents.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    cluster_path: PathBuf,
    status_dir: Option<PathBuf>,
}

impl JsonFileStore {
    /// Creates a store reading `cluster_path` and writing statuses under
    /// `status_dir`, if given.
    #[must_use]
    pub fn new(cluster_path: PathBuf, status_dir: Option<PathBuf>) -> Self {
        Self {
            cluster_path,
            status_dir,
        }
    }
}

#[async_trait]
impl CoordinationStore for JsonFileStore {
    async fn get_cluster(&self) -> Result<Cluster, HaError> {
        let raw = tokio::fs::read(&self.cluster_path).await.map_err(|e| {
            HaError::Store(format!("reading {}: {e}", self.cluster_path.display()))
        })?;
        let cluster: Cluster = serde_json::from_slice(&raw).map_err(|e| {
            HaError::Store(format!("parsing {}: {e}", self.cluster_path.display()))
        })?;
        cluster.validate()?;
        Ok(cluster)
    }

    async fn publish_status(&self, status: &MemberStatus) -> Result<(), HaError> {
        let Some(dir) = &self.status_dir else {
            return Ok(());
        };
        let body = serde_json::to_vec_pretty(status).map_err(|e| HaError::Internal(e.to_string()))?;
        let target = dir.join(format!("{}.json", status.member));
        let tmp = dir.join(format!(".{}.json.tmp", status.member));

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| HaError::Store(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| HaError::Store(format!("renaming to {}: {e}", target.display())))?;
        debug!(path = %target.display(), "status published");
        Ok(())
    }
}
