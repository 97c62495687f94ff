//! Order fragments and the mappings that assign them to pods.
//!
//! An order is split (outside podgate) into secret shares. Each share is an
//! [`OrderFragment`]; an [`OrderFragmentMapping`] says which pod receives
//! which fragments. Traders may submit several mappings for one order
//! (primary and backup pod assignments) as [`OrderFragmentMappings`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{FragmentId, IngressError, OrderId, PodHash, Result, TokenPair};

/// Order type code carried by every fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Midpoint,
    Limit,
    MidpointFok,
    LimitFok,
}

impl OrderType {
    #[must_use]
    pub fn code(self) -> i8 {
        match self {
            Self::Midpoint => 0,
            Self::Limit => 1,
            Self::MidpointFok => 2,
            Self::LimitFok => 3,
        }
    }

    pub fn from_code(code: i8) -> Result<Self> {
        match code {
            0 => Ok(Self::Midpoint),
            1 => Ok(Self::Limit),
            2 => Ok(Self::MidpointFok),
            3 => Ok(Self::LimitFok),
            other => Err(IngressError::MalformedOrder {
                reason: format!("unknown order type {other}"),
            }),
        }
    }
}

/// Which side of the book the fragment's order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderParity {
    Buy,
    Sell,
}

impl OrderParity {
    #[must_use]
    pub fn code(self) -> i8 {
        match self {
            Self::Buy => 0,
            Self::Sell => 1,
        }
    }

    pub fn from_code(code: i8) -> Result<Self> {
        match code {
            0 => Ok(Self::Buy),
            1 => Ok(Self::Sell),
            other => Err(IngressError::MalformedOrder {
                reason: format!("unknown order parity {other}"),
            }),
        }
    }
}

/// One share of a co-exponent value (`co * 10^exp` before splitting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoExpShare {
    pub co: u64,
    pub exp: u64,
}

impl CoExpShare {
    #[must_use]
    pub fn new(co: u64, exp: u64) -> Self {
        Self { co, exp }
    }
}

/// One secret share of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFragment {
    pub id: FragmentId,
    pub order_id: OrderId,
    /// Position of this share in the split. Peers upsert by
    /// `(order_id, index)`.
    pub index: i64,
    pub order_type: OrderType,
    pub order_parity: OrderParity,
    pub order_settlement: u64,
    /// Expiry as seconds since the UNIX epoch.
    pub order_expiry: i64,
    pub tokens: TokenPair,
    pub price: CoExpShare,
    pub volume: CoExpShare,
    pub minimum_volume: CoExpShare,
    pub nonce: u64,
    /// The share encrypted for the receiving pod.
    pub ciphertext: Vec<u8>,
}

impl OrderFragment {
    /// Feed the canonical byte form of this fragment into `hasher`.
    fn absorb(&self, hasher: &mut Sha256) {
        hasher.update(self.id.as_bytes());
        hasher.update(self.order_id.as_bytes());
        hasher.update(self.index.to_be_bytes());
        hasher.update(self.order_type.code().to_be_bytes());
        hasher.update(self.order_parity.code().to_be_bytes());
        hasher.update(self.order_settlement.to_be_bytes());
        hasher.update(self.order_expiry.to_be_bytes());
        hasher.update(self.tokens.0.to_be_bytes());
        for share in [self.price, self.volume, self.minimum_volume] {
            hasher.update(share.co.to_be_bytes());
            hasher.update(share.exp.to_be_bytes());
        }
        hasher.update(self.nonce.to_be_bytes());
        hasher.update((self.ciphertext.len() as u64).to_be_bytes());
        hasher.update(&self.ciphertext);
    }
}

// ---------------------------------------------------------------------------
// OrderFragmentMapping
// ---------------------------------------------------------------------------

/// "This pod receives these shares", for exactly one order.
///
/// Built by the codec, which guarantees every fragment carries `order_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFragmentMapping {
    pub order_id: OrderId,
    pub pods: BTreeMap<PodHash, Vec<OrderFragment>>,
}

impl OrderFragmentMapping {
    /// Total number of fragments across all pods.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.pods.values().map(Vec::len).sum()
    }

    /// Re-check the single-order invariant.
    ///
    /// # Errors
    /// `EmptyMapping` if there are no fragments, `MalformedOrderId` if any
    /// fragment names a different order.
    pub fn validate(&self) -> Result<()> {
        if self.fragment_count() == 0 {
            return Err(IngressError::EmptyMapping);
        }
        for fragment in self.pods.values().flatten() {
            if fragment.order_id != self.order_id {
                return Err(IngressError::MalformedOrderId {
                    reason: format!(
                        "fragment {} belongs to order {}, mapping is for {}",
                        fragment.id.short(),
                        fragment.order_id.short(),
                        self.order_id.short()
                    ),
                });
            }
        }
        Ok(())
    }

    /// SHA-256 commitment over the pods and fragments, in key order.
    #[must_use]
    pub fn commitment(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"podgate:mapping:v1:");
        hasher.update(self.order_id.as_bytes());
        hasher.update((self.pods.len() as u64).to_be_bytes());
        for (pod, fragments) in &self.pods {
            hasher.update(pod.as_bytes());
            hasher.update((fragments.len() as u64).to_be_bytes());
            for fragment in fragments {
                fragment.absorb(&mut hasher);
            }
        }
        hasher.finalize().into()
    }
}

/// The same order split across several redundancy sets.
pub type OrderFragmentMappings = Vec<OrderFragmentMapping>;

/// SHA-256 commitment over a list of mappings, in submission order.
#[must_use]
pub fn mappings_commitment(mappings: &[OrderFragmentMapping]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"podgate:mappings:v1:");
    hasher.update((mappings.len() as u64).to_be_bytes());
    for mapping in mappings {
        hasher.update(mapping.commitment());
    }
    hasher.finalize().into()
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Dummy fragments for tests. **Never use in production.**
///
/// Shares are random numbers, not real secret shares: podgate treats the
/// splitting scheme as opaque.
#[cfg(any(test, feature = "test-helpers"))]
impl OrderFragment {
    /// Split a random order into `n` fragments (indices `0..n`).
    pub fn dummy_split(n: usize) -> Vec<Self> {
        let order_id = OrderId(rand::random());
        Self::dummy_split_for(order_id, n)
    }

    /// Split the given order into `n` fragments (indices `0..n`).
    pub fn dummy_split_for(order_id: OrderId, n: usize) -> Vec<Self> {
        let expiry = chrono::Utc::now().timestamp() + 3600;
        let nonce = rand::random::<u64>();
        (0..n)
            .map(|i| Self {
                id: FragmentId(rand::random()),
                order_id,
                index: i64::try_from(i).unwrap_or(i64::MAX),
                order_type: OrderType::Limit,
                order_parity: OrderParity::Buy,
                order_settlement: 1,
                order_expiry: expiry,
                tokens: TokenPair::ETH_REN,
                price: CoExpShare::new(rand::random(), rand::random()),
                volume: CoExpShare::new(rand::random(), rand::random()),
                minimum_volume: CoExpShare::new(rand::random(), rand::random()),
                nonce,
                ciphertext: (0..64).map(|_| rand::random::<u8>()).collect(),
            })
            .collect()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl OrderFragmentMapping {
    /// A mapping that sends all of `fragments` to a single pod.
    pub fn dummy_single_pod(pod: PodHash, fragments: Vec<OrderFragment>) -> Self {
        let order_id = fragments.first().map_or(OrderId([0; 32]), |f| f.order_id);
        let mut pods = BTreeMap::new();
        pods.insert(pod, fragments);
        Self { order_id, pods }
    }
}
