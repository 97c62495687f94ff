//! Gateway signing and signer recovery.
//!
//! Every signature podgate issues or checks is a 65-byte recoverable
//! secp256k1 signature over an Ethereum-prefixed digest, so traders sign with
//! ordinary wallets and contracts verify with `ecrecover`.
//!
//! ## Digests
//!
//! ```text
//! open ack      keccak256("podgate:open:v1:"     || trader || order_id)
//! order auth    keccak256("podgate:order:v1:"    || order_id || commitment)
//! withdrawal    keccak256("podgate:withdraw:v1:" || trader || token_be32 || nonce_be64)
//! ```
//!
//! Signing is RFC 6979 deterministic: one key and one digest always give one
//! signature. Withdrawal deduplication relies on that.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use podgate_types::{
    Address, IngressError, OrderFragmentMapping, OrderId, Result, Signature, TokenId,
    constants, mappings_commitment,
};
use sha3::{Digest, Keccak256};

/// Keccak-256 of `bytes`.
#[must_use]
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    Keccak256::digest(bytes).into()
}

/// `keccak256("\x19Ethereum Signed Message:\n" || len || message)`.
#[must_use]
pub fn eth_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Digest the gateway signs to acknowledge an accepted order.
#[must_use]
pub fn open_order_digest(trader: &Address, order_id: &OrderId) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(constants::OPEN_ORDER_DOMAIN);
    hasher.update(trader.as_bytes());
    hasher.update(order_id.as_bytes());
    hasher.finalize().into()
}

/// Digest a trader signs to authorize distribution of these mappings.
#[must_use]
pub fn order_authorization_digest(
    order_id: &OrderId,
    mappings: &[OrderFragmentMapping],
) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(constants::ORDER_AUTH_DOMAIN);
    hasher.update(order_id.as_bytes());
    hasher.update(mappings_commitment(mappings));
    hasher.finalize().into()
}

/// Digest of a withdrawal approval. Both the trader's request and the
/// gateway's approval sign this, bound to the current on-chain nonce.
#[must_use]
pub fn withdrawal_digest(trader: &Address, token: TokenId, nonce: u64) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(constants::WITHDRAWAL_DOMAIN);
    hasher.update(trader.as_bytes());
    hasher.update(token.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.finalize().into()
}

/// Address of a public key: the last 20 bytes of the Keccak-256 of its
/// uncompressed encoding, minus the `0x04` tag.
#[must_use]
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address(out)
}

/// Recover the signer of `message` (Ethereum-prefixed before hashing).
///
/// Accepts `v` in `{0, 1, 27, 28}`.
///
/// # Errors
/// `InvalidSignature` if the signature does not parse or recover.
pub fn recover_address(message: &[u8], signature: &Signature) -> Result<Address> {
    let bytes = signature.as_bytes();
    let v = match bytes[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => {
            return Err(IngressError::InvalidSignature {
                reason: format!("unsupported recovery byte {other}"),
            });
        }
    };
    let recovery_id = RecoveryId::from_byte(v).ok_or_else(|| IngressError::InvalidSignature {
        reason: format!("unsupported recovery byte {v}"),
    })?;
    let sig = EcdsaSignature::from_slice(&bytes[..64]).map_err(|e| {
        IngressError::InvalidSignature {
            reason: e.to_string(),
        }
    })?;
    let prehash = eth_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id).map_err(|e| {
        IngressError::InvalidSignature {
            reason: e.to_string(),
        }
    })?;
    Ok(address_of(&key))
}

// ---------------------------------------------------------------------------
// GatewayKey
// ---------------------------------------------------------------------------

/// The gateway's signing identity.
///
/// Keystore decryption happens before this point; podgate only ever sees the
/// raw secret.
#[derive(Clone)]
pub struct GatewayKey {
    key: SigningKey,
    address: Address,
}

impl GatewayKey {
    /// Build from a 32-byte secret scalar.
    ///
    /// # Errors
    /// `Configuration` if the bytes are not a valid secp256k1 secret.
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| IngressError::Configuration(format!("invalid gateway key: {e}")))?;
        Ok(Self::from_signing_key(key))
    }

    /// Build from a hex secret, with or without `0x`.
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let raw = hex::decode(secret.trim().trim_start_matches("0x"))
            .map_err(|e| IngressError::Configuration(format!("invalid gateway key hex: {e}")))?;
        Self::from_bytes(&raw)
    }

    #[must_use]
    pub fn from_signing_key(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `message` (Ethereum-prefixed before hashing). `v` is 27 or 28.
    ///
    /// # Errors
    /// `Internal` if the signer rejects the digest, which only happens for a
    /// degenerate key.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let prehash = eth_message_hash(message);
        let (sig, recovery_id) = self
            .key
            .sign_prehash_recoverable(&prehash)
            .map_err(|e| IngressError::Internal(format!("signing failed: {e}")))?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recovery_id.to_byte() + 27;
        Ok(Signature(out))
    }
}

impl std::fmt::Debug for GatewayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Random keys for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl GatewayKey {
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::thread_rng()))
    }
}
