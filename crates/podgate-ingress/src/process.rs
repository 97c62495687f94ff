//! # Process loop
//!
//! Drains the durable request queue.
//!
//! ```text
//! start ─▶ recover_in_flight
//!            │
//!            ▼
//!   ┌──▶ claim_next ──none──▶ sleep(poll_interval) ──┐
//!   │        │                                       │
//!   │        ▼                                       │
//!   │   attempt (≤ max_concurrent at once)           │
//!   │        │                                       │
//!   │        ├─ ok ─────────────────▶ SUCCEEDED      │
//!   │        ├─ transient, retries left ▶ RETRYING   │
//!   │        └─ otherwise ──────────▶ FAILED + publish
//!   └────────────────────────────────────────────────┘
//! ```
//!
//! Attempts are idempotent. An open-order attempt reads the on-chain order
//! state before writing, and swarm peers upsert fragments, so a request that
//! was half-done when the gateway crashed is safe to run again.
//!
//! Once the shutdown token fires nothing new is claimed; attempts already
//! running finish and record their outcome before the task exits. Their
//! errors are still sent, so a caller must keep receiving until the channel
//! closes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use podgate_types::{
    Address, IngressError, OrderFragmentMapping, OrderId, PendingRequest, ProcessConfig,
    RequestKind, Result, Signature,
};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::binder::{Binder, OrderState};
use crate::distribution::Distributor;
use crate::store::RequestStore;
use crate::sync::publish;

/// Executes single attempts and records their outcome.
#[derive(Clone)]
pub(crate) struct Worker {
    pub(crate) store: Arc<dyn RequestStore>,
    pub(crate) binder: Arc<Binder>,
    pub(crate) distributor: Distributor,
    pub(crate) config: ProcessConfig,
    pub(crate) open_orders_on_chain: bool,
}

impl Worker {
    /// Run one attempt of `request` and record the outcome. Returns the error
    /// to publish, if any.
    pub(crate) async fn attempt(&self, request: PendingRequest) -> Option<IngressError> {
        let result = match &request.kind {
            RequestKind::OpenOrder {
                order_id,
                mappings,
                signature,
                ..
            } => self.open_order(&request, *order_id, mappings, *signature).await,
            RequestKind::Withdrawal { trader, nonce, .. } => {
                self.confirm_withdrawal(*trader, *nonce).await
            }
        };
        self.record(&request, result)
    }

    async fn open_order(
        &self,
        request: &PendingRequest,
        order_id: OrderId,
        mappings: &[OrderFragmentMapping],
        signature: Signature,
    ) -> Result<()> {
        if self.open_orders_on_chain {
            match self.binder.order_state(order_id).await? {
                OrderState::Undefined => {
                    self.binder.open_order(order_id, signature).await?;
                }
                OrderState::Open | OrderState::Confirmed => {
                    tracing::debug!(order_id = %order_id.short(), "order already open on-chain");
                }
                OrderState::Canceled => return Err(IngressError::OrderCanceled(order_id)),
            }
        }

        let report = self
            .distributor
            .distribute(mappings, &request.distributed)
            .await?;
        if !report.distributed.is_empty() {
            self.store.record_distributed(request.id, &report.distributed)?;
        }
        tracing::info!(
            order_id = %order_id.short(),
            distributed = request.distributed.len() + report.distributed.len(),
            failed = report.failed.len(),
            mappings = mappings.len(),
            pods = report.acks.len(),
            "order distribution pass"
        );
        match report.first_failure() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// The approval is only good while the on-chain nonce has not moved
    /// backwards past the one it was signed for.
    async fn confirm_withdrawal(&self, trader: Address, signed: u64) -> Result<()> {
        let current = self.binder.get_trader_withdrawal_nonce(trader).await?;
        if current < signed {
            return Err(IngressError::NonceMismatch { signed, current });
        }
        Ok(())
    }

    fn record(&self, request: &PendingRequest, result: Result<()>) -> Option<IngressError> {
        let id = request.id;
        match result {
            Ok(()) => match self.store.mark_succeeded(id) {
                Ok(done) => {
                    tracing::info!(
                        request_id = %id,
                        kind = request.kind.label(),
                        retries = done.retries,
                        "request succeeded"
                    );
                    None
                }
                Err(err) => Some(err),
            },
            Err(err) if err.is_transient() && self.config.retry.allows_retry(request.retries) => {
                let delay = self.config.retry.backoff(request.retries);
                let next_attempt_at = retry_at(Utc::now(), delay);
                tracing::warn!(
                    request_id = %id,
                    kind = request.kind.label(),
                    retries = request.retries + 1,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "request attempt failed, retry scheduled"
                );
                self.store
                    .mark_retryable(id, next_attempt_at, &err.to_string())
                    .err()
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::error!(
                    request_id = %id,
                    kind = request.kind.label(),
                    retries = request.retries,
                    error = %reason,
                    "request failed"
                );
                if let Err(store_err) = self.store.mark_failed(id, &reason) {
                    return Some(store_err);
                }
                Some(IngressError::RequestFailed {
                    id,
                    attempts: request.retries + 1,
                    reason,
                })
            }
        }
    }
}

fn retry_at(now: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub(crate) struct ProcessLoop {
    pub(crate) worker: Worker,
}

impl ProcessLoop {
    pub(crate) fn spawn(
        self,
        shutdown: CancellationToken,
        capacity: usize,
    ) -> mpsc::Receiver<IngressError> {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(self.run(shutdown, tx));
        rx
    }

    async fn run(self, shutdown: CancellationToken, errors: mpsc::Sender<IngressError>) {
        let store = Arc::clone(&self.worker.store);
        let max_concurrent = self.worker.config.max_concurrent;
        let poll_interval = self.worker.config.poll_interval();

        match store.recover_in_flight() {
            Ok(0) => {}
            Ok(recovered) => tracing::info!(recovered, "requeued in-flight requests"),
            Err(err) => publish(&errors, err).await,
        }
        tracing::info!(max_concurrent, "process loop started");

        let mut attempts: JoinSet<Option<IngressError>> = JoinSet::new();
        while !shutdown.is_cancelled() {
            while let Some(joined) = attempts.try_join_next() {
                report(&errors, joined).await;
            }

            if attempts.len() >= max_concurrent {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    Some(joined) = attempts.join_next() => report(&errors, joined).await,
                }
                continue;
            }

            match store.claim_next(Utc::now()) {
                Ok(Some(request)) => {
                    tracing::debug!(
                        request_id = %request.id,
                        kind = request.kind.label(),
                        retries = request.retries,
                        "request claimed"
                    );
                    let worker = self.worker.clone();
                    attempts.spawn(async move { worker.attempt(request).await });
                }
                Ok(None) => {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(poll_interval) => {}
                        Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                            report(&errors, joined).await;
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "cannot claim request");
                    publish(&errors, err).await;
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }
        }

        let draining = attempts.len();
        while let Some(joined) = attempts.join_next().await {
            report(&errors, joined).await;
        }
        tracing::info!(drained = draining, "process loop stopped");
    }
}

fn flatten(joined: std::result::Result<Option<IngressError>, JoinError>) -> Option<IngressError> {
    match joined {
        Ok(err) => err,
        Err(join_err) => Some(IngressError::Internal(format!(
            "request attempt aborted: {join_err}"
        ))),
    }
}

async fn report(
    errors: &mpsc::Sender<IngressError>,
    joined: std::result::Result<Option<IngressError>, JoinError>,
) {
    if let Some(err) = flatten(joined) {
        publish(errors, err).await;
    }
}
