//! Swarm interface.
//!
//! The peer-to-peer transport and DHT discovery live outside podgate. The
//! gateway needs three things from them: the peers it knows, a way to add
//! bootstrap peers, and a way to hand a pod member its fragments.

use async_trait::async_trait;
use podgate_types::{MultiAddress, OrderFragment, PeerId, PodHash, Result};

#[async_trait]
pub trait Swarm: Send + Sync {
    /// Peers currently known to the swarm.
    async fn peers(&self) -> Result<Vec<MultiAddress>>;

    /// Make `address` known to the swarm.
    async fn add_peer(&self, address: MultiAddress) -> Result<()>;

    /// Store `fragments` on `peer` as a member of `pod`.
    ///
    /// Peers upsert by `(order_id, index)`, so pushing the same bundle twice
    /// is harmless.
    async fn store_fragments(
        &self,
        peer: PeerId,
        pod: PodHash,
        fragments: &[OrderFragment],
    ) -> Result<()>;
}
