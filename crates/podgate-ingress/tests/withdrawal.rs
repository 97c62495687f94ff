//! Withdrawal approvals: eligibility, nonce binding and deduplication.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{b64, eventually, harness, random_key, test_config};
use podgate_ingress::crypto::{recover_address, withdrawal_digest};
use podgate_ingress::{ApproveWithdrawalRequest, IngressAdapter};
use podgate_types::{
    Address, IngressConfig, IngressError, RequestStatus, Signature, TokenPair,
};
use tokio_util::sync::CancellationToken;

fn decode_signature(encoded: &str) -> Signature {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    Signature::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap()
}

#[tokio::test]
async fn approval_signed_at_current_nonce() {
    let h = harness(test_config()).await;
    let trader = Address([1; 20]);
    h.contracts.set_kyc_balance(trader, 10);
    h.contracts.set_withdrawal_nonce(trader, 5);

    let signature = h
        .ingress
        .approve_withdrawal(trader, TokenPair::REN)
        .await
        .unwrap();
    let signer =
        recover_address(&withdrawal_digest(&trader, TokenPair::REN, 5), &signature).unwrap();
    assert_eq!(signer, h.ingress.address());

    let record = h
        .ingress
        .store()
        .get_by_key(&format!("withdraw:{trader}:{}:5", TokenPair::REN))
        .unwrap()
        .expect("approval recorded");
    assert_eq!(record.status, RequestStatus::Accepted);
}

#[tokio::test]
async fn concurrent_approvals_return_identical_signatures() {
    let h = harness(test_config()).await;
    let trader = Address([2; 20]);
    h.contracts.set_kyc_balance(trader, 1);
    h.contracts.set_withdrawal_nonce(trader, 9);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let ingress = Arc::clone(&h.ingress);
        tasks.spawn(async move { ingress.approve_withdrawal(trader, TokenPair::ETH).await });
    }
    let mut signatures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        signatures.push(joined.unwrap().unwrap());
    }

    assert_eq!(signatures.len(), 8);
    assert!(signatures.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(
        h.ingress.store().count_by_status(RequestStatus::Accepted).unwrap(),
        1
    );
    assert_eq!(h.ingress.accepted_count(), 0, "withdrawals are not orders");
}

#[tokio::test]
async fn new_nonce_yields_new_approval() {
    let h = harness(test_config()).await;
    let trader = Address([3; 20]);
    h.contracts.set_kyc_balance(trader, 1);

    let first = h.ingress.approve_withdrawal(trader, 1).await.unwrap();
    h.contracts.set_withdrawal_nonce(trader, 1);
    let second = h.ingress.approve_withdrawal(trader, 1).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(
        h.ingress.store().count_by_status(RequestStatus::Accepted).unwrap(),
        2
    );
}

#[tokio::test]
async fn trader_without_kyc_balance_unauthorized() {
    let h = harness(test_config()).await;
    let trader = Address([4; 20]);

    let err = h.ingress.approve_withdrawal(trader, 1).await.unwrap_err();
    assert!(matches!(err, IngressError::Unauthorized(t) if t == trader));
    assert_eq!(
        h.ingress.store().count_by_status(RequestStatus::Accepted).unwrap(),
        0
    );

    // Completing KYC is picked up without waiting for a sync tick.
    h.contracts.set_kyc_balance(trader, 1);
    h.ingress.approve_withdrawal(trader, 1).await.unwrap();
}

#[tokio::test]
async fn approved_trader_needs_no_balance() {
    let trader = Address([5; 20]);
    let config = IngressConfig {
        approved_traders: vec![trader],
        ..test_config()
    };
    let h = harness(config).await;

    h.ingress.approve_withdrawal(trader, 1).await.unwrap();
    assert!(h.ingress.approve_withdrawal(Address([6; 20]), 1).await.is_err());
}

#[tokio::test]
async fn revoked_balance_applies_after_sync() {
    let h = harness(test_config()).await;
    let trader = Address([7; 20]);
    h.contracts.set_kyc_balance(trader, 3);
    h.ingress.approve_withdrawal(trader, 1).await.unwrap();

    h.contracts.set_kyc_balance(trader, 0);
    h.contracts.set_withdrawal_nonce(trader, 1);
    // The cached balance still admits the trader until the next refresh.
    h.ingress.approve_withdrawal(trader, 1).await.unwrap();

    let shutdown = CancellationToken::new();
    let _errors = h.ingress.sync(shutdown.clone());
    h.contracts.set_withdrawal_nonce(trader, 2);
    let ingress = Arc::clone(&h.ingress);
    let mut refused = false;
    for _ in 0..100 {
        if matches!(
            ingress.approve_withdrawal(trader, 1).await,
            Err(IngressError::Unauthorized(_))
        ) {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    assert!(refused, "sync refresh should revoke eligibility");
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn adapter_verifies_trader_signature() {
    let h = harness(test_config()).await;
    let adapter = IngressAdapter::new(Arc::clone(&h.ingress));
    let trader = random_key();
    h.contracts.set_kyc_balance(trader.address(), 1);
    h.contracts.set_withdrawal_nonce(trader.address(), 4);

    let stale = trader
        .sign(&withdrawal_digest(&trader.address(), 1, 3))
        .unwrap();
    let err = adapter
        .approve_withdrawal(&ApproveWithdrawalRequest {
            trader: b64(trader.address().as_bytes()),
            token_id: 1,
            signature: b64(stale.as_bytes()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, IngressError::InvalidSignature { .. }));

    let current = trader
        .sign(&withdrawal_digest(&trader.address(), 1, 4))
        .unwrap();
    let response = adapter
        .approve_withdrawal(&ApproveWithdrawalRequest {
            trader: b64(trader.address().as_bytes()),
            token_id: 1,
            signature: b64(current.as_bytes()),
        })
        .await
        .unwrap();
    assert!(!response.signature.is_empty());
}

#[tokio::test]
async fn adapter_approval_bound_to_verified_nonce() {
    let h = harness(test_config()).await;
    let adapter = IngressAdapter::new(Arc::clone(&h.ingress));
    let trader = random_key();
    h.contracts.set_kyc_balance(trader.address(), 1);
    // Every read advances the on-chain nonce.
    h.contracts.state.lock().unwrap().withdrawal_nonce_step = 1;

    let signed = trader
        .sign(&withdrawal_digest(&trader.address(), TokenPair::ETH, 0))
        .unwrap();
    let response = adapter
        .approve_withdrawal(&ApproveWithdrawalRequest {
            trader: b64(trader.address().as_bytes()),
            token_id: TokenPair::ETH,
            signature: b64(signed.as_bytes()),
        })
        .await
        .unwrap();

    let approval = decode_signature(&response.signature);
    let digest = withdrawal_digest(&trader.address(), TokenPair::ETH, 0);
    assert_eq!(recover_address(&digest, &approval).unwrap(), h.ingress.address());
    let store = h.ingress.store();
    let key = format!("withdraw:{}:{}:", trader.address(), TokenPair::ETH);
    assert!(store.get_by_key(&format!("{key}0")).unwrap().is_some());
    assert!(store.get_by_key(&format!("{key}1")).unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Confirmation by the process loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approval_confirmed_by_process_loop() {
    let h = harness(test_config()).await;
    let trader = Address([8; 20]);
    h.contracts.set_kyc_balance(trader, 1);
    h.contracts.set_withdrawal_nonce(trader, 2);
    h.ingress.approve_withdrawal(trader, 1).await.unwrap();

    let shutdown = CancellationToken::new();
    let _errors = h.ingress.process_requests(shutdown.clone());
    let store = Arc::clone(h.ingress.store());
    assert!(
        eventually(Duration::from_secs(2), || {
            store.count_by_status(RequestStatus::Succeeded).unwrap() == 1
        })
        .await
    );
    shutdown.cancel();
}

#[tokio::test]
async fn nonce_moved_backwards_fails_request() {
    let h = harness(test_config()).await;
    let trader = Address([9; 20]);
    h.contracts.set_kyc_balance(trader, 1);
    h.contracts.set_withdrawal_nonce(trader, 6);
    h.ingress.approve_withdrawal(trader, 1).await.unwrap();
    h.contracts.set_withdrawal_nonce(trader, 2);

    let shutdown = CancellationToken::new();
    let mut errors = h.ingress.process_requests(shutdown.clone());
    let err = tokio::time::timeout(Duration::from_secs(2), errors.recv())
        .await
        .unwrap()
        .unwrap();
    shutdown.cancel();

    match err {
        IngressError::RequestFailed {
            attempts, reason, ..
        } => {
            assert_eq!(attempts, 1);
            assert!(reason.starts_with("PG_ERR_400"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        h.ingress.store().count_by_status(RequestStatus::Failed).unwrap(),
        1
    );
}
