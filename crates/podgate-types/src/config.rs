//! Configuration for a podgate gateway.
//!
//! Loaded from a JSON file at start-up. Every field has a default, so a
//! config file only needs to name what differs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Address, IngressError, MultiAddress, Result, constants};

/// Which chain the gateway reconciles against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
    Local,
}

/// Bounded exponential backoff for the process loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt before a request is marked failed.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: constants::DEFAULT_MAX_RETRIES,
            base_delay_ms: constants::DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: constants::DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retries + 1`: `base * 2^retries`, capped.
    #[must_use]
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 1u64.checked_shl(retries).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Whether a request that has already been retried `retries` times may be
    /// retried again.
    #[must_use]
    pub fn allows_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

/// Process loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Sleep between polls when the queue has nothing due.
    pub poll_interval_ms: u64,
    /// Requests attempted at once.
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            max_concurrent: constants::DEFAULT_MAX_CONCURRENT_REQUESTS,
            retry: RetryPolicy::default(),
        }
    }
}

impl ProcessConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How many peer acknowledgments a pod needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumPolicy {
    /// Fixed acknowledgment count. `None` uses each pod's reconstruction
    /// threshold.
    pub min_acks: Option<usize>,
}

impl QuorumPolicy {
    /// Acks required from a pod of `size` peers with the given threshold.
    /// Never more than the pod has peers.
    #[must_use]
    pub fn required(&self, size: usize, threshold: usize) -> usize {
        self.min_acks.unwrap_or(threshold).min(size)
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub network: Network,
    /// Peers added to the swarm when it does not know them yet.
    pub bootstrap_peers: Vec<MultiAddress>,
    /// Traders allowed to withdraw without a KYC balance.
    pub approved_traders: Vec<Address>,
    /// Minimum KYC token balance for withdrawal eligibility.
    pub min_kyc_balance: u64,
    /// Reject open-order requests that carry no trader signature.
    pub require_order_signatures: bool,
    /// Open orders on-chain before distributing their fragments.
    pub open_orders_on_chain: bool,
    pub settlement_id: u64,
    pub sync_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub error_channel_capacity: usize,
    /// Path of the `redb` request queue.
    pub queue_path: String,
    pub process: ProcessConfig,
    pub quorum: QuorumPolicy,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            bootstrap_peers: Vec::new(),
            approved_traders: Vec::new(),
            min_kyc_balance: constants::DEFAULT_MIN_KYC_BALANCE,
            require_order_signatures: false,
            open_orders_on_chain: true,
            settlement_id: constants::DEFAULT_SETTLEMENT_ID,
            sync_interval_ms: constants::DEFAULT_SYNC_INTERVAL_MS,
            call_timeout_ms: constants::DEFAULT_CALL_TIMEOUT_MS,
            error_channel_capacity: constants::DEFAULT_ERROR_CHANNEL_CAPACITY,
            queue_path: constants::DEFAULT_QUEUE_PATH.to_string(),
            process: ProcessConfig::default(),
            quorum: QuorumPolicy::default(),
        }
    }
}

impl IngressConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| IngressError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            IngressError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Reject settings that would stall the loops.
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_ms == 0 {
            return Err(IngressError::Configuration(
                "sync_interval_ms must be > 0".into(),
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(IngressError::Configuration(
                "call_timeout_ms must be > 0".into(),
            ));
        }
        if self.error_channel_capacity == 0 {
            return Err(IngressError::Configuration(
                "error_channel_capacity must be > 0".into(),
            ));
        }
        if self.process.max_concurrent == 0 {
            return Err(IngressError::Configuration(
                "process.max_concurrent must be > 0".into(),
            ));
        }
        if self.process.poll_interval_ms == 0 {
            return Err(IngressError::Configuration(
                "process.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.process.retry.base_delay_ms > self.process.retry.max_delay_ms {
            return Err(IngressError::Configuration(
                "process.retry.base_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        if self.quorum.min_acks == Some(0) {
            return Err(IngressError::Configuration(
                "quorum.min_acks must be > 0".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerId;

    #[test]
    fn defaults_are_valid() {
        let cfg = IngressConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sync_interval(), Duration::from_secs(4));
        assert!(cfg.open_orders_on_chain);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = IngressConfig::from_json_str(
            r#"{ "network": "mainnet", "process": { "max_concurrent": 2 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.network, Network::Mainnet);
        assert_eq!(cfg.process.max_concurrent, 2);
        assert_eq!(cfg.process.retry, RetryPolicy::default());
    }

    #[test]
    fn zero_interval_rejected() {
        let err = IngressConfig::from_json_str(r#"{ "sync_interval_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, IngressError::Configuration(_)));
    }

    #[test]
    fn unknown_network_rejected() {
        assert!(IngressConfig::from_json_str(r#"{ "network": "moon" }"#).is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff(70), Duration::from_millis(1000));
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
    }

    #[test]
    fn quorum_never_exceeds_pod_size() {
        let fixed = QuorumPolicy { min_acks: Some(10) };
        assert_eq!(fixed.required(4, 3), 4);
        assert_eq!(QuorumPolicy::default().required(24, 16), 16);
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = IngressConfig {
            bootstrap_peers: vec![MultiAddress::new(PeerId([4; 20]), "/ip4/127.0.0.1/tcp/18514")],
            approved_traders: vec![Address([5; 20])],
            ..IngressConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back = IngressConfig::from_json_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
