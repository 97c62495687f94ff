//! # Ingress façade
//!
//! Owns the gateway's collaborators and exposes its four operations:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`Ingress::open_order`] | sign an acknowledgment, enqueue the order |
//! | [`Ingress::approve_withdrawal`] | check eligibility, sign at the current nonce, enqueue |
//! | [`Ingress::sync`] | spawn the sync loop |
//! | [`Ingress::process_requests`] | spawn the process loop |
//!
//! Acceptance is not completion. A request is answered once it is durably
//! queued; blockchain writes and fragment distribution happen in the process
//! loop. [`Ingress::order_status`] and [`Ingress::match_details`] let callers
//! follow an order after acceptance.
//!
//! The gateway is the single writer for its signing identity: run one
//! instance per key.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use podgate_types::{
    Address, IngressConfig, IngressError, OrderFragmentMappings, OrderId, PendingRequest,
    RequestId, RequestKind, RequestStatus, Result, Signature, TokenId, constants,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::binder::{Binder, MatchDetails, OrderState};
use crate::crypto::{GatewayKey, open_order_digest, withdrawal_digest};
use crate::distribution::Distributor;
use crate::eligibility::EligibilityCache;
use crate::process::{ProcessLoop, Worker};
use crate::store::{InsertOutcome, RequestStore};
use crate::swarm::Swarm;
use crate::sync::SyncLoop;
use crate::topology::TopologyCache;

/// On-chain view of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: OrderId,
    pub state: OrderState,
    /// Trader who opened the order. `None` while the order is undefined.
    pub trader: Option<Address>,
}

/// The ingress gateway.
pub struct Ingress {
    config: IngressConfig,
    key: GatewayKey,
    binder: Arc<Binder>,
    swarm: Arc<dyn Swarm>,
    store: Arc<dyn RequestStore>,
    topology: Arc<TopologyCache>,
    eligibility: Arc<EligibilityCache>,
    distributor: Distributor,
    /// Open-order requests newly accepted since start-up.
    accepted: AtomicU64,
}

impl Ingress {
    pub fn new(
        config: IngressConfig,
        key: GatewayKey,
        binder: Arc<Binder>,
        swarm: Arc<dyn Swarm>,
        store: Arc<dyn RequestStore>,
    ) -> Self {
        let topology = Arc::new(TopologyCache::new());
        let eligibility = Arc::new(EligibilityCache::new(
            config.approved_traders.iter().copied(),
            config.min_kyc_balance,
        ));
        let distributor = Distributor::new(
            Arc::clone(&swarm),
            Arc::clone(&topology),
            config.quorum.clone(),
            config.call_timeout(),
        );
        tracing::info!(
            name = constants::GATEWAY_NAME,
            version = constants::VERSION,
            gateway = %key.address(),
            network = ?config.network,
            "ingress initialised"
        );
        Self {
            config,
            key,
            binder,
            swarm,
            store,
            topology,
            eligibility,
            distributor,
            accepted: AtomicU64::new(0),
        }
    }

    /// The gateway's signing address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.key.address()
    }

    #[must_use]
    pub fn config(&self) -> &IngressConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    #[must_use]
    pub fn topology(&self) -> &Arc<TopologyCache> {
        &self.topology
    }

    /// An authenticator reading chain state through this gateway's binder.
    #[must_use]
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(Arc::clone(&self.binder))
    }

    /// Open-order requests newly accepted since start-up.
    #[must_use]
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // OpenOrder
    // -----------------------------------------------------------------------

    /// Accept an order for opening and distribution.
    ///
    /// The request is recorded in one queue transaction, so either all of its
    /// mappings are accepted or none are. Resubmitting an order that is
    /// already queued returns the same acknowledgment and records nothing.
    ///
    /// # Errors
    /// `EmptyMapping`, `MalformedOrderId` or `OrderIdMismatch` for
    /// inconsistent mappings; store errors if the queue cannot be written.
    /// `Unauthorized` if the order is already queued for another trader, and
    /// `RequestFailed` if its queued record has failed terminally.
    pub async fn open_order(
        &self,
        trader: Address,
        order_id: OrderId,
        mappings: OrderFragmentMappings,
    ) -> Result<Signature> {
        if mappings.is_empty() {
            return Err(IngressError::EmptyMapping);
        }
        for mapping in &mappings {
            mapping.validate()?;
            if mapping.order_id != order_id {
                return Err(IngressError::OrderIdMismatch {
                    expected: order_id,
                    actual: mapping.order_id,
                });
            }
        }

        let signature = self.key.sign(&open_order_digest(&trader, &order_id))?;
        let mapping_count = mappings.len();
        let request = PendingRequest::new(RequestKind::OpenOrder {
            trader,
            order_id,
            mappings,
            signature,
        });

        match self.store.insert(request)? {
            InsertOutcome::Inserted(request_id) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    request_id = %request_id,
                    trader = %trader,
                    order_id = %order_id.short(),
                    mappings = mapping_count,
                    "open order accepted"
                );
            }
            InsertOutcome::Duplicate(request_id) => {
                self.check_resubmission(request_id, trader)?;
                tracing::debug!(
                    request_id = %request_id,
                    order_id = %order_id.short(),
                    "open order already queued"
                );
            }
        }
        Ok(signature)
    }

    /// A resubmitted order is acknowledged again only by the trader who
    /// opened it, and only while its record has not failed.
    fn check_resubmission(&self, request_id: RequestId, trader: Address) -> Result<()> {
        let existing = self
            .store
            .get(request_id)?
            .ok_or(IngressError::RequestNotFound(request_id))?;
        let owner = existing.kind.trader();
        if owner != trader {
            tracing::warn!(
                request_id = %request_id,
                trader = %trader,
                owner = %owner,
                "open order resubmitted by another trader"
            );
            return Err(IngressError::Unauthorized(trader));
        }
        if existing.status == RequestStatus::Failed {
            return Err(IngressError::RequestFailed {
                id: request_id,
                attempts: existing.retries + 1,
                reason: existing.last_error.unwrap_or_default(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // ApproveWithdrawal
    // -----------------------------------------------------------------------

    /// Approve a withdrawal of `token` for `trader` at their current
    /// on-chain withdrawal nonce.
    ///
    /// # Errors
    /// `Unauthorized` if the trader is not eligible; binder and store errors.
    pub async fn approve_withdrawal(&self, trader: Address, token: TokenId) -> Result<Signature> {
        let nonce = self.binder.get_trader_withdrawal_nonce(trader).await?;
        self.approve_withdrawal_at(trader, token, nonce).await
    }

    /// Approve a withdrawal bound to `nonce`, the value the trader's own
    /// signature was verified against. The chain is not read again, so an
    /// approval never names a nonce the trader did not sign.
    ///
    /// Signing is deterministic and the queue deduplicates on
    /// `(trader, token, nonce)`, so concurrent calls for one nonce return
    /// identical signatures and leave one record.
    ///
    /// # Errors
    /// `Unauthorized` if the trader is not eligible; binder and store errors.
    pub async fn approve_withdrawal_at(
        &self,
        trader: Address,
        token: TokenId,
        nonce: u64,
    ) -> Result<Signature> {
        if !self.eligibility.is_eligible(&self.binder, trader).await? {
            tracing::warn!(trader = %trader, "withdrawal refused: trader not eligible");
            return Err(IngressError::Unauthorized(trader));
        }

        let signature = self.key.sign(&withdrawal_digest(&trader, token, nonce))?;
        let outcome = self.store.insert(PendingRequest::new(RequestKind::Withdrawal {
            trader,
            token,
            nonce,
            signature,
        }))?;
        tracing::info!(
            request_id = %outcome.id(),
            trader = %trader,
            token,
            nonce,
            duplicate = !outcome.is_inserted(),
            "withdrawal approved"
        );
        Ok(signature)
    }

    // -----------------------------------------------------------------------
    // Background loops
    // -----------------------------------------------------------------------

    /// Spawn the sync loop. The returned channel carries its errors and
    /// closes once the loop has exited after `shutdown` fires.
    pub fn sync(&self, shutdown: CancellationToken) -> mpsc::Receiver<IngressError> {
        SyncLoop {
            binder: Arc::clone(&self.binder),
            swarm: Arc::clone(&self.swarm),
            topology: Arc::clone(&self.topology),
            eligibility: Arc::clone(&self.eligibility),
            bootstrap_peers: self.config.bootstrap_peers.clone(),
            interval: self.config.sync_interval(),
            call_timeout: self.config.call_timeout(),
        }
        .spawn(shutdown, self.config.error_channel_capacity)
    }

    /// Spawn the process loop. The returned channel carries terminal request
    /// failures and queue errors, and closes once the loop has drained its
    /// in-flight attempts after `shutdown` fires.
    pub fn process_requests(&self, shutdown: CancellationToken) -> mpsc::Receiver<IngressError> {
        ProcessLoop {
            worker: Worker {
                store: Arc::clone(&self.store),
                binder: Arc::clone(&self.binder),
                distributor: self.distributor.clone(),
                config: self.config.process.clone(),
                open_orders_on_chain: self.config.open_orders_on_chain,
            },
        }
        .spawn(shutdown, self.config.error_channel_capacity)
    }

    /// Delete succeeded and failed requests last updated before
    /// `older_than`.
    pub fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let purged = self.store.purge_completed(older_than)?;
        tracing::info!(purged, older_than = %older_than, "completed requests purged");
        Ok(purged)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn order_status(&self, order_id: OrderId) -> Result<OrderStatus> {
        let state = self.binder.order_state(order_id).await?;
        let trader = match state {
            OrderState::Undefined => None,
            _ => Some(self.binder.order_trader(order_id).await?),
        };
        Ok(OrderStatus {
            order_id,
            state,
            trader,
        })
    }

    pub async fn match_details(&self, order_id: OrderId) -> Result<MatchDetails> {
        self.binder.get_match_details(order_id).await
    }
}

impl std::fmt::Debug for Ingress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingress")
            .field("address", &self.key.address())
            .field("accepted", &self.accepted_count())
            .finish_non_exhaustive()
    }
}
