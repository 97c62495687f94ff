//! Accepted work survives a gateway restart on the `redb` queue.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{epoch, eventually, harness_with_store, random_pod, test_config};
use podgate_ingress::{RedbRequestStore, RequestStore};
use podgate_types::{Address, OrderFragment, OrderFragmentMapping, RequestStatus};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(3);

fn open_store(path: &std::path::Path) -> Arc<dyn RequestStore> {
    Arc::new(RedbRequestStore::open(path).unwrap())
}

#[tokio::test]
async fn accepted_order_processed_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue").join("requests.redb");
    let pod = random_pod(4);
    let fragments = OrderFragment::dummy_split(4);
    let order_id = fragments[0].order_id;
    let mappings = vec![OrderFragmentMapping::dummy_single_pod(pod.hash, fragments)];
    let trader = Address([1; 20]);

    let first_ack = {
        let h = harness_with_store(test_config(), open_store(&path)).await;
        let ack = h
            .ingress
            .open_order(trader, order_id, mappings.clone())
            .await
            .unwrap();
        // A crashed attempt: claimed but never recorded.
        let claimed = h.ingress.store().claim_next(Utc::now()).unwrap().unwrap();
        assert_eq!(claimed.status, RequestStatus::InFlight);
        ack
    };

    let h = harness_with_store(test_config(), open_store(&path)).await;
    let store = Arc::clone(h.ingress.store());
    assert_eq!(store.count_by_status(RequestStatus::InFlight).unwrap(), 1);

    // The queue still deduplicates after restart.
    let again = h
        .ingress
        .open_order(trader, order_id, mappings)
        .await
        .unwrap();
    assert_eq!(again, first_ack);
    assert_eq!(h.ingress.accepted_count(), 0);

    h.contracts.set_epoch(epoch(1, vec![pod.clone()]));
    let shutdown = CancellationToken::new();
    let _sync = h.ingress.sync(shutdown.clone());
    let _errors = h.ingress.process_requests(shutdown.clone());

    assert!(
        eventually(WAIT, || {
            store.count_by_status(RequestStatus::Succeeded).unwrap() == 1
        })
        .await
    );
    shutdown.cancel();

    assert_eq!(store.count_by_status(RequestStatus::InFlight).unwrap(), 0);
    for index in 0..4 {
        assert_eq!(h.swarm.holders(&pod, order_id, index), 4);
    }
}

#[tokio::test]
async fn withdrawal_approvals_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.redb");
    let trader = Address([2; 20]);

    {
        let h = harness_with_store(test_config(), open_store(&path)).await;
        h.contracts.set_kyc_balance(trader, 1);
        h.ingress.approve_withdrawal(trader, 1).await.unwrap();
        h.ingress.approve_withdrawal(trader, 1).await.unwrap();
    }

    let store = open_store(&path);
    assert_eq!(store.count_by_status(RequestStatus::Accepted).unwrap(), 1);
    let record = store
        .get_by_key(&format!("withdraw:{trader}:1:0"))
        .unwrap()
        .expect("approval survived restart");
    assert_eq!(record.kind.trader(), trader);
}
