//! Request authenticator.
//!
//! Checks that a request was signed by the trader it names. Verification
//! reads chain state (the withdrawal nonce) but never mutates anything, so a
//! failed check leaves no trace.

use std::sync::Arc;

use podgate_types::{Address, IngressError, OrderFragmentMapping, OrderId, Result, Signature, TokenId};

use crate::binder::Binder;
use crate::crypto::{order_authorization_digest, recover_address, withdrawal_digest};

/// Verifies trader signatures over order and withdrawal requests.
#[derive(Debug, Clone)]
pub struct Authenticator {
    binder: Arc<Binder>,
}

impl Authenticator {
    #[must_use]
    pub fn new(binder: Arc<Binder>) -> Self {
        Self { binder }
    }

    /// Verify `signature` authorizes distributing `mappings` for `order_id`.
    ///
    /// # Errors
    /// `InvalidSignature` if recovery fails or recovers someone other than
    /// `trader`.
    pub fn verify_order(
        &self,
        trader: &Address,
        order_id: &OrderId,
        mappings: &[OrderFragmentMapping],
        signature: &Signature,
    ) -> Result<()> {
        let digest = order_authorization_digest(order_id, mappings);
        verify_signer(&digest, signature, trader)
    }

    /// Verify `signature` requests a withdrawal of `token` at the trader's
    /// current on-chain nonce. Returns that nonce.
    ///
    /// # Errors
    /// Binder errors while fetching the nonce, else `InvalidSignature`.
    pub async fn verify_withdrawal(
        &self,
        trader: &Address,
        token: TokenId,
        signature: &Signature,
    ) -> Result<u64> {
        let nonce = self.binder.get_trader_withdrawal_nonce(*trader).await?;
        let digest = withdrawal_digest(trader, token, nonce);
        verify_signer(&digest, signature, trader)?;
        Ok(nonce)
    }
}

fn verify_signer(message: &[u8], signature: &Signature, expected: &Address) -> Result<()> {
    let signer = recover_address(message, signature)?;
    if &signer != expected {
        tracing::debug!(
            expected = %expected,
            recovered = %signer,
            "signature from unexpected signer"
        );
        return Err(IngressError::InvalidSignature {
            reason: format!("signed by {signer}, expected {expected}"),
        });
    }
    Ok(())
}
