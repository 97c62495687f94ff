//! # Contract Binder: the gateway's view of the chain
//!
//! [`ContractBackend`] is the smart-contract binding layer: it reads contract
//! state and submits transactions. [`Binder`] wraps it with:
//!
//! - a call timeout on every backend call (`Timeout`, transient)
//! - a reader/writer lock over the gateway's cached transaction nonce
//!
//! ## Locking
//!
//! ```text
//! get_trader_withdrawal_nonce ┐
//! balance_of                  │
//! order_trader / order_state  ├─ shared lock   (many at once)
//! get_match_details           │
//! current_epoch               ┘
//! open_order                  ── exclusive lock (one at a time)
//! ```
//!
//! The gateway is the single writer for its signing identity. `open_order`
//! builds the transaction with the cached nonce and advances it only after
//! the backend accepts the submission, so a rejected or timed-out submission
//! never burns a nonce.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use podgate_types::{Address, Epoch, IngressError, OrderId, Result, Signature, TokenId, TxHash};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// On-chain lifecycle of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    /// Never opened.
    Undefined,
    Open,
    /// Matched and confirmed.
    Confirmed,
    Canceled,
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "UNDEFINED"),
            Self::Open => write!(f, "OPEN"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Settlement fields of a matched order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub settled: bool,
    pub order_is_buy: bool,
    pub matched_id: OrderId,
    pub priority_volume: u64,
    pub secondary_volume: u64,
    pub priority_fee: u64,
    pub secondary_fee: u64,
    pub priority_token: TokenId,
    pub secondary_token: TokenId,
}

/// An open-order transaction as the gateway submits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrderTransaction {
    pub settlement_id: u64,
    /// The gateway's acknowledgment, acting as broker signature.
    pub signature: Signature,
    pub order_id: OrderId,
    /// Transaction nonce of the gateway's signing identity.
    pub nonce: u64,
}

/// The smart-contract binding layer.
///
/// Implementations talk to a chain node. They must surface a reused
/// transaction nonce as [`IngressError::NonceTooLow`].
#[async_trait]
pub trait ContractBackend: Send + Sync {
    /// Withdrawal nonce the broker verifier expects next for `trader`.
    async fn trader_withdrawal_nonce(&self, trader: Address) -> Result<u64>;

    /// KYC token balance of `trader`.
    async fn kyc_balance_of(&self, trader: Address) -> Result<u64>;

    /// Trader who opened `order_id`.
    async fn order_trader(&self, order_id: OrderId) -> Result<Address>;

    async fn order_state(&self, order_id: OrderId) -> Result<OrderState>;

    async fn match_details(&self, order_id: OrderId) -> Result<MatchDetails>;

    /// Current registry epoch and its pods.
    async fn current_epoch(&self) -> Result<Epoch>;

    /// Next transaction nonce of the gateway's signing identity, counting
    /// pending transactions.
    async fn pending_transaction_nonce(&self) -> Result<u64>;

    async fn submit_open_order(&self, tx: OpenOrderTransaction) -> Result<TxHash>;
}

/// Run `fut` under `timeout`, mapping expiry to `Timeout`.
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| IngressError::Timeout {
            operation: operation.to_string(),
        })?
}

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

/// Timeout-bounded, nonce-serialising façade over a [`ContractBackend`].
pub struct Binder {
    backend: Arc<dyn ContractBackend>,
    /// Next transaction nonce. Readers hold it shared, `open_order` holds it
    /// exclusively.
    tx_nonce: RwLock<u64>,
    settlement_id: u64,
    call_timeout: Duration,
}

impl Binder {
    /// Connect to `backend`, reading the gateway's pending transaction nonce.
    ///
    /// # Errors
    /// Any backend error or timeout. Callers treat this as fatal at start-up.
    pub async fn connect(
        backend: Arc<dyn ContractBackend>,
        settlement_id: u64,
        call_timeout: Duration,
    ) -> Result<Self> {
        let nonce = with_timeout(
            call_timeout,
            "pending_transaction_nonce",
            backend.pending_transaction_nonce(),
        )
        .await?;
        tracing::info!(nonce, settlement_id, "contract binder connected");
        Ok(Self {
            backend,
            tx_nonce: RwLock::new(nonce),
            settlement_id,
            call_timeout,
        })
    }

    pub async fn get_trader_withdrawal_nonce(&self, trader: Address) -> Result<u64> {
        let _guard = self.tx_nonce.read().await;
        with_timeout(
            self.call_timeout,
            "trader_withdrawal_nonce",
            self.backend.trader_withdrawal_nonce(trader),
        )
        .await
    }

    pub async fn balance_of(&self, trader: Address) -> Result<u64> {
        let _guard = self.tx_nonce.read().await;
        with_timeout(
            self.call_timeout,
            "kyc_balance_of",
            self.backend.kyc_balance_of(trader),
        )
        .await
    }

    pub async fn order_trader(&self, order_id: OrderId) -> Result<Address> {
        let _guard = self.tx_nonce.read().await;
        with_timeout(
            self.call_timeout,
            "order_trader",
            self.backend.order_trader(order_id),
        )
        .await
    }

    pub async fn order_state(&self, order_id: OrderId) -> Result<OrderState> {
        let _guard = self.tx_nonce.read().await;
        with_timeout(
            self.call_timeout,
            "order_state",
            self.backend.order_state(order_id),
        )
        .await
    }

    pub async fn get_match_details(&self, order_id: OrderId) -> Result<MatchDetails> {
        let _guard = self.tx_nonce.read().await;
        with_timeout(
            self.call_timeout,
            "match_details",
            self.backend.match_details(order_id),
        )
        .await
    }

    pub async fn current_epoch(&self) -> Result<Epoch> {
        let _guard = self.tx_nonce.read().await;
        with_timeout(self.call_timeout, "current_epoch", self.backend.current_epoch()).await
    }

    /// Submit an open-order transaction signed by the gateway.
    ///
    /// Holds the exclusive lock for the whole submission. On `NonceTooLow`
    /// the cached nonce is re-read from the backend so the next attempt
    /// uses a fresh one; the error is still returned (it is transient).
    pub async fn open_order(&self, order_id: OrderId, signature: Signature) -> Result<TxHash> {
        let mut nonce = self.tx_nonce.write().await;
        let tx = OpenOrderTransaction {
            settlement_id: self.settlement_id,
            signature,
            order_id,
            nonce: *nonce,
        };

        match with_timeout(
            self.call_timeout,
            "submit_open_order",
            self.backend.submit_open_order(tx),
        )
        .await
        {
            Ok(tx_hash) => {
                *nonce += 1;
                tracing::info!(
                    order_id = %order_id.short(),
                    tx_hash = %tx_hash.short(),
                    next_nonce = *nonce,
                    "open-order transaction submitted"
                );
                Ok(tx_hash)
            }
            Err(err @ IngressError::NonceTooLow { .. }) => {
                let refreshed = with_timeout(
                    self.call_timeout,
                    "pending_transaction_nonce",
                    self.backend.pending_transaction_nonce(),
                )
                .await?;
                tracing::warn!(
                    stale = *nonce,
                    refreshed,
                    "transaction nonce too low, resynchronised"
                );
                *nonce = refreshed;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Cached next transaction nonce.
    pub async fn transaction_nonce(&self) -> u64 {
        *self.tx_nonce.read().await
    }
}

impl std::fmt::Debug for Binder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binder")
            .field("settlement_id", &self.settlement_id)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}
