//! Identifiers used throughout podgate.
//!
//! Chain-facing identifiers are fixed-width byte strings. They display and
//! serialize as lowercase hex so they can key JSON maps; base64 only appears
//! on the wire, inside the codec.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::IngressError;

/// Declares a fixed-width byte identifier with hex `Display` and serde.
macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Width of the identifier in bytes.
            pub const LEN: usize = $len;

            #[must_use]
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Copy from a slice. Returns `None` unless the slice is exactly
            /// `LEN` bytes long.
            #[must_use]
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; $len]>::try_from(bytes).ok().map(Self)
            }

            /// Parse from hex, with or without a `0x` prefix.
            pub fn from_hex(s: &str) -> crate::Result<Self> {
                let raw = hex::decode(s.trim_start_matches("0x")).map_err(|e| {
                    IngressError::Serialization(format!("{}: {e}", stringify!($name)))
                })?;
                Self::from_slice(&raw).ok_or_else(|| {
                    IngressError::Serialization(format!(
                        "{}: expected {} bytes, got {}",
                        stringify!($name),
                        $len,
                        raw.len()
                    ))
                })
            }

            /// First four bytes as hex, for log lines.
            #[must_use]
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// A 20-byte account address (trader, gateway, or contract).
    Address,
    20
);

fixed_bytes!(
    /// Identifies an order. Every fragment of the order carries it.
    OrderId,
    32
);

fixed_bytes!(
    /// Identifies one fragment (secret share) of an order.
    FragmentId,
    32
);

fixed_bytes!(
    /// Identifies a pod: the Keccak-256 hash of its peers' identities.
    PodHash,
    32
);

fixed_bytes!(
    /// Identifies an epoch of the on-chain peer registry.
    EpochHash,
    32
);

fixed_bytes!(
    /// Identity of a swarm peer.
    PeerId,
    20
);

fixed_bytes!(
    /// Hash of a submitted chain transaction.
    TxHash,
    32
);

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

fixed_bytes!(
    /// A 65-byte recoverable secp256k1 signature laid out as `r || s || v`.
    Signature,
    65
);

impl Signature {
    /// The recovery byte `v`.
    #[must_use]
    pub fn v(&self) -> u8 {
        self.0[64]
    }
}

// ---------------------------------------------------------------------------
// Small codes
// ---------------------------------------------------------------------------

/// Token code used by withdrawal approvals.
pub type TokenId = u32;

/// Token-pair code carried by order fragments: the priority token in the
/// high 32 bits, the secondary token in the low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TokenPair(pub u64);

impl TokenPair {
    pub const BTC: TokenId = 0;
    pub const ETH: TokenId = 1;
    pub const DGX: TokenId = 256;
    pub const REN: TokenId = 65536;

    /// `ETH/REN`, the pair most fragments in the test suites carry.
    pub const ETH_REN: Self = Self::new(Self::ETH, Self::REN);

    #[must_use]
    pub const fn new(priority: TokenId, secondary: TokenId) -> Self {
        Self(((priority as u64) << 32) | secondary as u64)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn priority(self) -> TokenId {
        (self.0 >> 32) as TokenId
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn secondary(self) -> TokenId {
        self.0 as TokenId
    }
}

impl fmt::Display for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.priority(), self.secondary())
    }
}

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// Identifies a pending request. UUIDv7, so ids sort by creation time and the
/// durable queue can claim "oldest first" by key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from the hyphenated form used as a storage key.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| IngressError::Serialization(format!("RequestId: {e}")))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MultiAddress
// ---------------------------------------------------------------------------

/// How a swarm peer is dialed: its identity plus a transport address
/// (e.g. `/ip4/10.0.0.1/tcp/18514`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiAddress {
    pub peer: PeerId,
    pub address: String,
}

impl MultiAddress {
    #[must_use]
    pub fn new(peer: PeerId, address: impl Into<String>) -> Self {
        Self {
            peer,
            address: address.into(),
        }
    }
}

impl fmt::Display for MultiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/podgate/{}", self.address, self.peer)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
