//! Shared fixtures: an in-process chain and swarm, and a gateway wired to
//! them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use k256::ecdsa::SigningKey;
use podgate_ingress::{
    Binder, ContractBackend, GatewayKey, Ingress, MatchDetails, MemoryRequestStore,
    OpenOrderTransaction, OrderState, RequestStore, Swarm,
};
use podgate_types::{
    Address, Epoch, EpochHash, IngressConfig, IngressError, MultiAddress, OrderFragment, OrderId,
    PeerId, Pod, PodHash, ProcessConfig, Result, RetryPolicy, TxHash,
};

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn random_key() -> GatewayKey {
    GatewayKey::from_signing_key(SigningKey::random(&mut rand::thread_rng()))
}

pub fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// A pod of `size` random peers.
pub fn random_pod(size: usize) -> Pod {
    Pod::from_peers((0..size).map(|_| PeerId(rand::random())).collect())
}

pub fn epoch(tag: u8, pods: Vec<Pod>) -> Epoch {
    Epoch {
        hash: EpochHash([tag; 32]),
        block_number: u64::from(tag),
        pods,
    }
}

/// Fast loops and retries for tests.
pub fn test_config() -> IngressConfig {
    IngressConfig {
        sync_interval_ms: 20,
        call_timeout_ms: 500,
        process: ProcessConfig {
            poll_interval_ms: 10,
            max_concurrent: 4,
            retry: RetryPolicy {
                max_retries: 3,
                base_delay_ms: 20,
                max_delay_ms: 100,
            },
        },
        ..IngressConfig::default()
    }
}

// ---------------------------------------------------------------------------
// MockContracts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ChainState {
    pub withdrawal_nonces: HashMap<Address, u64>,
    /// Added to a trader's withdrawal nonce after every read of it.
    pub withdrawal_nonce_step: u64,
    pub kyc_balances: HashMap<Address, u64>,
    pub orders: HashMap<OrderId, (OrderState, Address)>,
    pub match_details: HashMap<OrderId, MatchDetails>,
    pub epoch: Option<Epoch>,
    pub tx_nonce: u64,
    pub submitted: Vec<OpenOrderTransaction>,
    pub fail_epoch: bool,
}

/// In-process chain. Submitting an open-order transaction opens the order.
#[derive(Default)]
pub struct MockContracts {
    pub state: Mutex<ChainState>,
}

impl MockContracts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_epoch(&self, epoch: Epoch) {
        self.state.lock().unwrap().epoch = Some(epoch);
    }

    pub fn set_kyc_balance(&self, trader: Address, balance: u64) {
        self.state.lock().unwrap().kyc_balances.insert(trader, balance);
    }

    pub fn set_withdrawal_nonce(&self, trader: Address, nonce: u64) {
        self.state.lock().unwrap().withdrawal_nonces.insert(trader, nonce);
    }

    pub fn set_order(&self, order_id: OrderId, state: OrderState, trader: Address) {
        self.state.lock().unwrap().orders.insert(order_id, (state, trader));
    }

    pub fn submitted(&self) -> Vec<OpenOrderTransaction> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl ContractBackend for MockContracts {
    async fn trader_withdrawal_nonce(&self, trader: Address) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let step = state.withdrawal_nonce_step;
        let nonce = state.withdrawal_nonces.entry(trader).or_insert(0);
        let current = *nonce;
        *nonce += step;
        Ok(current)
    }

    async fn kyc_balance_of(&self, trader: Address) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .kyc_balances
            .get(&trader)
            .copied()
            .unwrap_or(0))
    }

    async fn order_trader(&self, order_id: OrderId) -> Result<Address> {
        self.state
            .lock()
            .unwrap()
            .orders
            .get(&order_id)
            .map(|(_, trader)| *trader)
            .ok_or_else(|| IngressError::Chain(format!("order {order_id} not found")))
    }

    async fn order_state(&self, order_id: OrderId) -> Result<OrderState> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .orders
            .get(&order_id)
            .map_or(OrderState::Undefined, |(state, _)| *state))
    }

    async fn match_details(&self, order_id: OrderId) -> Result<MatchDetails> {
        self.state
            .lock()
            .unwrap()
            .match_details
            .get(&order_id)
            .cloned()
            .ok_or_else(|| IngressError::Chain(format!("order {order_id} not matched")))
    }

    async fn current_epoch(&self) -> Result<Epoch> {
        let state = self.state.lock().unwrap();
        if state.fail_epoch {
            return Err(IngressError::Chain("registry unavailable".into()));
        }
        state.epoch.clone().ok_or(IngressError::TopologyUnavailable)
    }

    async fn pending_transaction_nonce(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().tx_nonce)
    }

    async fn submit_open_order(&self, tx: OpenOrderTransaction) -> Result<TxHash> {
        let mut state = self.state.lock().unwrap();
        if tx.nonce < state.tx_nonce {
            return Err(IngressError::NonceTooLow { nonce: tx.nonce });
        }
        state.tx_nonce = tx.nonce + 1;
        state
            .orders
            .insert(tx.order_id, (OrderState::Open, Address([0; 20])));
        state.submitted.push(tx);
        Ok(TxHash(rand::random()))
    }
}

// ---------------------------------------------------------------------------
// MockSwarm
// ---------------------------------------------------------------------------

/// In-process swarm. Peers upsert fragments by `(order_id, index)`.
#[derive(Default)]
pub struct MockSwarm {
    pub known: Mutex<Vec<MultiAddress>>,
    /// `(peer, order_id, index)` → fragment
    pub stored: Mutex<HashMap<(PeerId, OrderId, i64), OrderFragment>>,
    /// Pushes still to fail before pushes start succeeding.
    pub fail_pushes: AtomicUsize,
    pub pushes: AtomicUsize,
    /// Each push waits this long before answering.
    pub push_delay_ms: AtomicU64,
    pub fail_peers: Mutex<bool>,
}

impl MockSwarm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` pushes.
    pub fn fail_next_pushes(&self, n: usize) {
        self.fail_pushes.store(n, Ordering::SeqCst);
    }

    pub fn delay_pushes(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap();
        self.push_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Peers of `pod` holding fragment `index` of `order_id`.
    pub fn holders(&self, pod: &Pod, order_id: OrderId, index: i64) -> usize {
        let stored = self.stored.lock().unwrap();
        pod.peers
            .iter()
            .filter(|p| stored.contains_key(&(**p, order_id, index)))
            .count()
    }
}

#[async_trait]
impl Swarm for MockSwarm {
    async fn peers(&self) -> Result<Vec<MultiAddress>> {
        if *self.fail_peers.lock().unwrap() {
            return Err(IngressError::Swarm("dht unavailable".into()));
        }
        Ok(self.known.lock().unwrap().clone())
    }

    async fn add_peer(&self, address: MultiAddress) -> Result<()> {
        self.known.lock().unwrap().push(address);
        Ok(())
    }

    async fn store_fragments(
        &self,
        peer: PeerId,
        _pod: PodHash,
        fragments: &[OrderFragment],
    ) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let delay = self.push_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let failing = self
            .fail_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(IngressError::Swarm(format!("{peer} unreachable")));
        }
        let mut stored = self.stored.lock().unwrap();
        for fragment in fragments {
            stored.insert((peer, fragment.order_id, fragment.index), fragment.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct Harness {
    pub contracts: Arc<MockContracts>,
    pub swarm: Arc<MockSwarm>,
    pub ingress: Arc<Ingress>,
}

pub async fn harness(config: IngressConfig) -> Harness {
    harness_with_store(config, Arc::new(MemoryRequestStore::new())).await
}

pub async fn harness_with_store(config: IngressConfig, store: Arc<dyn RequestStore>) -> Harness {
    init_tracing();
    let contracts = MockContracts::new();
    let swarm = MockSwarm::new();
    let binder = Binder::connect(
        contracts.clone(),
        config.settlement_id,
        config.call_timeout(),
    )
    .await
    .unwrap();
    let ingress = Arc::new(Ingress::new(
        config,
        random_key(),
        Arc::new(binder),
        swarm.clone(),
        store,
    ));
    Harness {
        contracts,
        swarm,
        ingress,
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
