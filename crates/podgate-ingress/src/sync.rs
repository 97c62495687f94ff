//! # Sync loop
//!
//! Reconciles cached gateway state against the chain and the swarm, once per
//! `sync_interval`:
//!
//! 1. **Bootstrap**: add configured bootstrap peers the swarm does not know.
//! 2. **Topology**: fetch the current epoch; replace cached pods when the
//!    epoch hash changes.
//! 3. **Eligibility**: re-query KYC balances of cached traders.
//!
//! A failing step publishes its errors and the tick moves on to the next
//! step. The loop stops when the shutdown token fires; its error channel
//! closes after the task exits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use podgate_types::{IngressError, MultiAddress, PeerId};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::binder::{Binder, with_timeout};
use crate::eligibility::EligibilityCache;
use crate::swarm::Swarm;
use crate::topology::TopologyCache;

/// Send `err`, waiting for room in the channel. Only a dropped receiver
/// loses it, and that is logged.
pub(crate) async fn publish(errors: &mpsc::Sender<IngressError>, err: IngressError) {
    if let Err(mpsc::error::SendError(err)) = errors.send(err).await {
        tracing::error!(error = %err, code = err.code(), "error receiver dropped, error lost");
    }
}

pub(crate) struct SyncLoop {
    pub(crate) binder: Arc<Binder>,
    pub(crate) swarm: Arc<dyn Swarm>,
    pub(crate) topology: Arc<TopologyCache>,
    pub(crate) eligibility: Arc<EligibilityCache>,
    pub(crate) bootstrap_peers: Vec<MultiAddress>,
    pub(crate) interval: Duration,
    pub(crate) call_timeout: Duration,
}

impl SyncLoop {
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
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.interval.as_millis(), "sync loop started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            for err in self.tick().await {
                tracing::error!(error = %err, "sync error");
                publish(&errors, err).await;
            }
        }

        tracing::info!("sync loop stopped");
    }

    /// One reconciliation pass. Returns every error encountered.
    pub(crate) async fn tick(&self) -> Vec<IngressError> {
        let mut errors = self.reconcile_bootstrap().await;

        match self.binder.current_epoch().await {
            Ok(epoch) => {
                let (hash, block, pods) = (epoch.hash, epoch.block_number, epoch.pods.len());
                if self.topology.update(epoch).await {
                    tracing::info!(epoch = %hash.short(), block, pods, "epoch changed");
                } else {
                    tracing::debug!(epoch = %hash.short(), "epoch unchanged");
                }
            }
            Err(err) => errors.push(err),
        }

        errors.extend(self.eligibility.refresh(&self.binder).await);
        errors
    }

    async fn reconcile_bootstrap(&self) -> Vec<IngressError> {
        if self.bootstrap_peers.is_empty() {
            return Vec::new();
        }
        let known: HashSet<PeerId> =
            match with_timeout(self.call_timeout, "swarm_peers", self.swarm.peers()).await {
                Ok(peers) => peers.into_iter().map(|p| p.peer).collect(),
                Err(err) => return vec![err],
            };

        let mut errors = Vec::new();
        for address in &self.bootstrap_peers {
            if known.contains(&address.peer) {
                continue;
            }
            match with_timeout(
                self.call_timeout,
                "swarm_add_peer",
                self.swarm.add_peer(address.clone()),
            )
            .await
            {
                Ok(()) => tracing::info!(peer = %address, "bootstrap peer added"),
                Err(err) => errors.push(err),
            }
        }
        errors
    }
}
