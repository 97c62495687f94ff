//! System-wide constants for the podgate ingress gateway.

/// Default interval between sync loop ticks in milliseconds.
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 4000;

/// Default bound on every outbound chain or swarm call in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Default process loop idle poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default number of requests the process loop attempts at once.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 16;

/// Default retries before a request is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 8;

/// Default first retry delay in milliseconds (doubles per retry).
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Default cap on the retry delay in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;

/// Default capacity of the error channels returned by the loops.
pub const DEFAULT_ERROR_CHANNEL_CAPACITY: usize = 256;

/// Default minimum KYC token balance for withdrawal eligibility.
pub const DEFAULT_MIN_KYC_BALANCE: u64 = 1;

/// Settlement layer orders are opened for.
pub const DEFAULT_SETTLEMENT_ID: u64 = 1;

/// Default path of the durable request queue.
pub const DEFAULT_QUEUE_PATH: &str = "data/requests.redb";

/// Domain separator of the gateway's open-order acknowledgment.
pub const OPEN_ORDER_DOMAIN: &[u8] = b"podgate:open:v1:";

/// Domain separator of a trader's order authorization.
pub const ORDER_AUTH_DOMAIN: &[u8] = b"podgate:order:v1:";

/// Domain separator of withdrawal approvals.
pub const WITHDRAWAL_DOMAIN: &[u8] = b"podgate:withdraw:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gateway name.
pub const GATEWAY_NAME: &str = "podgate";
