//! Error types for the podgate ingress gateway.
//!
//! All errors use the `PG_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors (reported to the caller, never queued)
//! - 2xx: Authentication errors (reported to the caller, never queued)
//! - 3xx: Transient infrastructure errors (retried by the process loop)
//! - 4xx: Consistency errors (terminal for the request)
//! - 5xx: Request lifecycle errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{Address, OrderId, PodHash, RequestId, RequestStatus};

/// Central error enum for all podgate operations.
#[derive(Debug, Clone, Error)]
pub enum IngressError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// A pod hash key is not base64 or does not decode to 32 bytes.
    #[error("PG_ERR_100: Malformed pod hash: {reason}")]
    MalformedPodHash { reason: String },

    /// A fragment ID is not base64 or does not decode to 32 bytes.
    #[error("PG_ERR_101: Malformed fragment ID: {reason}")]
    MalformedFragmentId { reason: String },

    /// An order ID is malformed, or fragments disagree on their order.
    #[error("PG_ERR_102: Malformed order ID: {reason}")]
    MalformedOrderId { reason: String },

    #[error("PG_ERR_103: Malformed tokens: {reason}")]
    MalformedTokens { reason: String },

    #[error("PG_ERR_104: Malformed price: {reason}")]
    MalformedPrice { reason: String },

    #[error("PG_ERR_105: Malformed volume: {reason}")]
    MalformedVolume { reason: String },

    #[error("PG_ERR_106: Malformed minimum volume: {reason}")]
    MalformedMinimumVolume { reason: String },

    #[error("PG_ERR_107: Malformed ciphertext: {reason}")]
    MalformedCiphertext { reason: String },

    /// Any other fragment or request field failed validation.
    #[error("PG_ERR_108: Malformed order: {reason}")]
    MalformedOrder { reason: String },

    /// A mapping carries no fragments and so names no order.
    #[error("PG_ERR_109: Order fragment mapping is empty")]
    EmptyMapping,

    /// A mapping reports a different order than the request.
    #[error("PG_ERR_110: Order ID mismatch: expected {expected}, got {actual}")]
    OrderIdMismatch { expected: OrderId, actual: OrderId },

    /// The trader field is not a 20-byte base64 address.
    #[error("PG_ERR_111: Invalid address: {reason}")]
    InvalidAddress { reason: String },

    /// A signature field is not a 65-byte base64 value.
    #[error("PG_ERR_112: Malformed signature: {reason}")]
    MalformedSignature { reason: String },

    // =================================================================
    // Authentication Errors (2xx)
    // =================================================================
    /// Recovery failed or recovered a different signer.
    #[error("PG_ERR_200: Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    /// The trader failed the eligibility (KYC) check.
    #[error("PG_ERR_201: Unauthorized trader: {0}")]
    Unauthorized(Address),

    // =================================================================
    // Transient Infrastructure Errors (3xx)
    // =================================================================
    /// An outbound chain or swarm call exceeded the call timeout.
    #[error("PG_ERR_300: Timed out: {operation}")]
    Timeout { operation: String },

    /// The chain node rejected or failed a call.
    #[error("PG_ERR_301: Chain error: {0}")]
    Chain(String),

    /// The node rejected a transaction because its nonce was already used.
    #[error("PG_ERR_302: Transaction nonce too low: {nonce}")]
    NonceTooLow { nonce: u64 },

    /// A swarm peer was unreachable or rejected a push.
    #[error("PG_ERR_303: Swarm error: {0}")]
    Swarm(String),

    /// The request store failed.
    #[error("PG_ERR_304: Storage error: {0}")]
    Storage(String),

    /// A mapping names a pod that is not in the current topology.
    #[error("PG_ERR_305: Unknown pod: {0}")]
    UnknownPod(PodHash),

    /// No epoch has been synchronised yet.
    #[error("PG_ERR_306: Pod topology unavailable")]
    TopologyUnavailable,

    // =================================================================
    // Consistency Errors (4xx)
    // =================================================================
    /// A withdrawal signature no longer matches the on-chain nonce.
    #[error("PG_ERR_400: Withdrawal nonce mismatch: signed {signed}, on-chain {current}")]
    NonceMismatch { signed: u64, current: u64 },

    /// Fewer peers than the quorum threshold acknowledged a pod's fragments.
    #[error("PG_ERR_401: Quorum not reached for pod {pod}: {acks} of {required} acks")]
    QuorumNotReached {
        pod: PodHash,
        acks: usize,
        required: usize,
    },

    /// The order was cancelled on-chain before it could be opened.
    #[error("PG_ERR_402: Order canceled on-chain: {0}")]
    OrderCanceled(OrderId),

    // =================================================================
    // Request Lifecycle Errors (5xx)
    // =================================================================
    #[error("PG_ERR_500: Request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("PG_ERR_501: Invalid request transition: {from} -> {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// A request reached a terminal failure; published on the error channel.
    #[error("PG_ERR_502: Request {id} failed after {attempts} attempt(s): {reason}")]
    RequestFailed {
        id: RequestId,
        attempts: u32,
        reason: String,
    },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    #[error("PG_ERR_900: Internal error: {0}")]
    Internal(String),

    #[error("PG_ERR_901: Serialization error: {0}")]
    Serialization(String),

    #[error("PG_ERR_902: Configuration error: {0}")]
    Configuration(String),

    #[error("PG_ERR_903: I/O error: {0}")]
    Io(String),
}

impl IngressError {
    /// Whether the process loop should retry the attempt that produced this
    /// error. Quorum shortfall is retryable: peers may come back.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Chain(_)
                | Self::NonceTooLow { .. }
                | Self::Swarm(_)
                | Self::Storage(_)
                | Self::UnknownPod(_)
                | Self::TopologyUnavailable
                | Self::QuorumNotReached { .. }
                | Self::Io(_)
        )
    }

    /// The `PG_ERR_xxx` code of this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedPodHash { .. } => "PG_ERR_100",
            Self::MalformedFragmentId { .. } => "PG_ERR_101",
            Self::MalformedOrderId { .. } => "PG_ERR_102",
            Self::MalformedTokens { .. } => "PG_ERR_103",
            Self::MalformedPrice { .. } => "PG_ERR_104",
            Self::MalformedVolume { .. } => "PG_ERR_105",
            Self::MalformedMinimumVolume { .. } => "PG_ERR_106",
            Self::MalformedCiphertext { .. } => "PG_ERR_107",
            Self::MalformedOrder { .. } => "PG_ERR_108",
            Self::EmptyMapping => "PG_ERR_109",
            Self::OrderIdMismatch { .. } => "PG_ERR_110",
            Self::InvalidAddress { .. } => "PG_ERR_111",
            Self::MalformedSignature { .. } => "PG_ERR_112",
            Self::InvalidSignature { .. } => "PG_ERR_200",
            Self::Unauthorized(_) => "PG_ERR_201",
            Self::Timeout { .. } => "PG_ERR_300",
            Self::Chain(_) => "PG_ERR_301",
            Self::NonceTooLow { .. } => "PG_ERR_302",
            Self::Swarm(_) => "PG_ERR_303",
            Self::Storage(_) => "PG_ERR_304",
            Self::UnknownPod(_) => "PG_ERR_305",
            Self::TopologyUnavailable => "PG_ERR_306",
            Self::NonceMismatch { .. } => "PG_ERR_400",
            Self::QuorumNotReached { .. } => "PG_ERR_401",
            Self::OrderCanceled(_) => "PG_ERR_402",
            Self::RequestNotFound(_) => "PG_ERR_500",
            Self::InvalidTransition { .. } => "PG_ERR_501",
            Self::RequestFailed { .. } => "PG_ERR_502",
            Self::Internal(_) => "PG_ERR_900",
            Self::Serialization(_) => "PG_ERR_901",
            Self::Configuration(_) => "PG_ERR_902",
            Self::Io(_) => "PG_ERR_903",
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, IngressError>;

impl From<std::io::Error> for IngressError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for IngressError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
