//! # podgate-types
//!
//! Shared types, errors, and configuration for the **podgate** ingress gateway.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`Address`], [`OrderId`], [`FragmentId`], [`PodHash`], [`EpochHash`], [`PeerId`], [`RequestId`], [`Signature`]
//! - **Fragment model**: [`OrderFragment`], [`OrderFragmentMapping`], [`OrderFragmentMappings`], [`CoExpShare`]
//! - **Topology**: [`Pod`], [`Epoch`]
//! - **Pending work**: [`PendingRequest`], [`RequestKind`], [`RequestStatus`]
//! - **Configuration**: [`IngressConfig`], [`ProcessConfig`], [`RetryPolicy`], [`QuorumPolicy`]
//! - **Errors**: [`IngressError`] with `PG_ERR_` prefix codes
//! - **Constants**: defaults and signing domains

pub mod config;
pub mod constants;
pub mod error;
pub mod fragment;
pub mod ids;
pub mod pod;
pub mod request;

pub use config::*;
pub use error::*;
pub use fragment::*;
pub use ids::*;
pub use pod::*;
pub use request::*;

// Constants are accessed via `podgate_types::constants::FOO`
// (not re-exported to avoid name collisions).
