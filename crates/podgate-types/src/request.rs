//! # PendingRequest: durable record of accepted work
//!
//! The ingress façade records every accepted open-order and
//! withdrawal-approval request before answering the caller. The process loop
//! drains these records, so acceptance survives restarts.
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────────┐ claim  ┌──────────┐   ok    ┌───────────┐
//!   │ ACCEPTED ├───────▶│ IN_FLIGHT├────────▶│ SUCCEEDED │
//!   └────▲─────┘        └┬───┬───▲─┘         └───────────┘
//!        │  crash recover│   │   │ claim
//!        └───────────────┘   │ ┌─┴────────┐
//!                            ├▶│ RETRYING │
//!                  transient │ └──────────┘
//!                            │  terminal   ┌────────┐
//!                            └────────────▶│ FAILED │
//!                                          └────────┘
//! ```
//!
//! SUCCEEDED and FAILED are terminal.
//!
//! An open-order request also remembers which of its mappings already reached
//! quorum, so a retry pushes only the mappings still missing.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Address, IngressError, OrderFragmentMappings, OrderId, RequestId, Result, Signature, TokenId,
};

/// Lifecycle state of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Recorded, never attempted.
    Accepted,
    /// Claimed by the process loop.
    InFlight,
    /// Failed transiently, waiting for `next_attempt_at`.
    Retrying,
    /// Side effect done. Eligible for garbage collection.
    Succeeded,
    /// Failed terminally. Eligible for garbage collection.
    Failed,
}

impl RequestStatus {
    /// Can a request in this state move to `target`?
    ///
    /// `InFlight → Accepted` only happens when a restart finds work that a
    /// crashed process had claimed.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Accepted | Self::Retrying, Self::InFlight)
                | (
                    Self::InFlight,
                    Self::Succeeded | Self::Retrying | Self::Failed | Self::Accepted
                )
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Claimable by the process loop (subject to `next_attempt_at`).
    #[must_use]
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Accepted | Self::Retrying)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "ACCEPTED"),
            Self::InFlight => write!(f, "IN_FLIGHT"),
            Self::Retrying => write!(f, "RETRYING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// What was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// Open an order and distribute its fragments.
    OpenOrder {
        trader: Address,
        order_id: OrderId,
        mappings: OrderFragmentMappings,
        /// The gateway's acknowledgment, reused as the broker signature when
        /// the order is opened on-chain.
        signature: Signature,
    },
    /// A signed withdrawal approval bound to one on-chain nonce.
    Withdrawal {
        trader: Address,
        token: TokenId,
        nonce: u64,
        signature: Signature,
    },
}

impl RequestKind {
    #[must_use]
    pub fn trader(&self) -> Address {
        match self {
            Self::OpenOrder { trader, .. } | Self::Withdrawal { trader, .. } => *trader,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenOrder { .. } => "open_order",
            Self::Withdrawal { .. } => "withdrawal",
        }
    }
}

/// A durable record of accepted work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub status: RequestStatus,
    /// Number of retries scheduled so far (first attempt excluded).
    pub retries: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant.
    pub next_attempt_at: DateTime<Utc>,
    /// Indices of open-order mappings that reached quorum.
    #[serde(default)]
    pub distributed: BTreeSet<usize>,
}

impl PendingRequest {
    /// A freshly accepted request, claimable immediately.
    #[must_use]
    pub fn new(kind: RequestKind) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            kind,
            status: RequestStatus::Accepted,
            retries: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            next_attempt_at: now,
            distributed: BTreeSet::new(),
        }
    }

    /// Key under which duplicate submissions collapse into one record.
    #[must_use]
    pub fn dedupe_key(&self) -> String {
        match &self.kind {
            RequestKind::OpenOrder { order_id, .. } => format!("open:{order_id}"),
            RequestKind::Withdrawal {
                trader,
                token,
                nonce,
                ..
            } => format!("withdraw:{trader}:{token}:{nonce}"),
        }
    }

    /// Claimable at `now`?
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_attempt_at <= now
    }

    /// Move to `target`, stamping `updated_at`.
    ///
    /// # Errors
    /// `InvalidTransition` if the state machine forbids the move.
    pub fn transition(&mut self, target: RequestStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(IngressError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `InFlight → Retrying`, counting the retry and recording the cause.
    pub fn schedule_retry(&mut self, next_attempt_at: DateTime<Utc>, error: &str) -> Result<()> {
        self.transition(RequestStatus::Retrying)?;
        self.retries += 1;
        self.next_attempt_at = next_attempt_at;
        self.last_error = Some(error.to_string());
        Ok(())
    }

    /// `InFlight → Failed`, recording the cause.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        self.transition(RequestStatus::Failed)?;
        self.last_error = Some(error.to_string());
        Ok(())
    }

    /// Record mappings that reached quorum. Only the attempt holding the
    /// claim records progress, so the request must be `InFlight`.
    ///
    /// # Errors
    /// `InvalidTransition` if the request is not in flight.
    pub fn record_distributed(&mut self, mappings: &BTreeSet<usize>) -> Result<()> {
        if self.status != RequestStatus::InFlight {
            return Err(IngressError::InvalidTransition {
                from: self.status,
                to: RequestStatus::InFlight,
            });
        }
        self.distributed.extend(mappings.iter().copied());
        self.updated_at = Utc::now();
        Ok(())
    }
}
