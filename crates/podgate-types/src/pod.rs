//! Pod and epoch topology.
//!
//! The on-chain registry groups peers into pods once per epoch. A pod can
//! reconstruct an order from its shares once a threshold of its peers hold
//! them, so the distribution pipeline measures success against that
//! threshold.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::{EpochHash, PeerId, PodHash};

/// A quorum group of swarm peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub hash: PodHash,
    /// Peers in registry order.
    pub peers: Vec<PeerId>,
}

impl Pod {
    /// Build a pod whose hash is derived from `peers`.
    #[must_use]
    pub fn from_peers(peers: Vec<PeerId>) -> Self {
        Self {
            hash: Self::derive_hash(&peers),
            peers,
        }
    }

    /// Keccak-256 over the concatenated peer identities, in order.
    #[must_use]
    pub fn derive_hash(peers: &[PeerId]) -> PodHash {
        let mut hasher = Keccak256::new();
        for peer in peers {
            hasher.update(peer.as_bytes());
        }
        PodHash(hasher.finalize().into())
    }

    /// Number of shares needed to reconstruct: `2 * (n + 1) / 3`.
    #[must_use]
    pub fn threshold(&self) -> usize {
        2 * (self.peers.len() + 1) / 3
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.peers.len()
    }
}

/// One epoch of the registry: its hash and the pods it defines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub hash: EpochHash,
    pub block_number: u64,
    pub pods: Vec<Pod>,
}

impl Epoch {
    #[must_use]
    pub fn pod(&self, hash: &PodHash) -> Option<&Pod> {
        self.pods.iter().find(|p| &p.hash == hash)
    }
}
