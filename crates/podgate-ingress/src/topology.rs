//! Cached pod topology.
//!
//! The sync loop replaces the cached epoch whenever the registry's epoch hash
//! changes; the distribution pipeline reads pods from here.

use podgate_types::{Epoch, EpochHash, IngressError, Pod, PodHash, Result};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct TopologyCache {
    epoch: RwLock<Option<Epoch>>,
}

impl TopologyCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a pod of the current epoch.
    ///
    /// # Errors
    /// `TopologyUnavailable` before the first sync, `UnknownPod` if the
    /// current epoch has no such pod.
    pub async fn pod(&self, hash: &PodHash) -> Result<Pod> {
        let epoch = self.epoch.read().await;
        let epoch = epoch.as_ref().ok_or(IngressError::TopologyUnavailable)?;
        epoch
            .pod(hash)
            .cloned()
            .ok_or(IngressError::UnknownPod(*hash))
    }

    pub async fn epoch_hash(&self) -> Option<EpochHash> {
        self.epoch.read().await.as_ref().map(|e| e.hash)
    }

    /// Replace the cached epoch if `epoch` has a different hash.
    /// Returns `true` if the cache changed.
    pub async fn update(&self, epoch: Epoch) -> bool {
        let mut current = self.epoch.write().await;
        if current.as_ref().is_some_and(|c| c.hash == epoch.hash) {
            return false;
        }
        *current = Some(epoch);
        true
    }
}
