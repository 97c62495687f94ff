//! # podgate-ingress
//!
//! **Ingress engine**: the trust boundary between trader clients and the
//! pod-sharded matching network.
//!
//! ## Architecture
//!
//! 1. **Codec**: wire mappings → typed [`OrderFragmentMapping`]s
//! 2. **Authenticator**: trader signatures over orders and withdrawals
//! 3. **Ingress**: signs acknowledgments and approvals, queues the work
//! 4. **RequestStore**: durable queue ([`MemoryRequestStore`], [`RedbRequestStore`])
//! 5. **Process loop**: opens orders on-chain, distributes fragments to pods
//! 6. **Sync loop**: keeps pod topology and trader eligibility current
//!
//! ## Request Flow
//!
//! ```text
//! JSON → IngressAdapter → codec → Authenticator → Ingress ─▶ RequestStore
//!                                                              │
//!        Binder.open_order ◀── process loop ◀──────────────────┘
//!        Distributor ──▶ Swarm.store_fragments (every pod peer)
//! ```
//!
//! [`ContractBackend`] and [`Swarm`] are the seams to the chain and the peer
//! network; both are provided by the embedding process.
//!
//! [`OrderFragmentMapping`]: podgate_types::OrderFragmentMapping

pub mod adapter;
pub mod auth;
pub mod binder;
pub mod codec;
pub mod crypto;
pub mod distribution;
pub mod durable;
pub mod eligibility;
pub mod ingress;
mod process;
pub mod store;
pub mod swarm;
mod sync;
pub mod topology;

pub use adapter::{
    ApproveWithdrawalRequest, ErrorResponse, IngressAdapter, MatchDetailsResponse,
    OpenOrderRequest, OrderStatusResponse, SignatureResponse,
};
pub use auth::Authenticator;
pub use binder::{Binder, ContractBackend, MatchDetails, OpenOrderTransaction, OrderState};
pub use crypto::GatewayKey;
pub use distribution::{DistributionReport, Distributor};
pub use durable::RedbRequestStore;
pub use eligibility::EligibilityCache;
pub use ingress::{Ingress, OrderStatus};
pub use store::{InsertOutcome, MemoryRequestStore, RequestStore};
pub use swarm::Swarm;
pub use topology::TopologyCache;
