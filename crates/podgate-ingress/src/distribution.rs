//! # Distribution pipeline
//!
//! Pushes an order's fragments to the pods named by its mappings.
//!
//! ```text
//! mappings ─┬─ mapping 0 ─┬─ pod A ─┬─ peer 1 ┐
//!           │             │         ├─ peer 2 ├─ acks >= required ?
//!           │             │         └─ peer n ┘
//!           │             └─ pod B ─ ...
//!           └─ mapping 1 ─ ...
//! ```
//!
//! - Each pod receives its whole fragment bundle on every one of its peers,
//!   concurrently, each push under the call timeout.
//! - A pod succeeds at `quorum.min_acks` acknowledgments if configured, else
//!   at the pod's reconstruction threshold.
//! - A mapping succeeds when all of its pods succeed. Pods with no fragments
//!   are skipped.
//! - Mappings are judged independently. Every mapping must reach quorum on
//!   its own; one that falls short does not undo the others, and a retry
//!   pushes only the mappings still missing.
//!
//! Pushes are idempotent (peers upsert by `(order_id, index)`), so a retried
//! request may safely push to pods that already hold its fragments.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use podgate_types::{
    IngressError, OrderFragment, OrderFragmentMapping, PodHash, QuorumPolicy, Result,
};

use crate::binder::with_timeout;
use crate::swarm::Swarm;
use crate::topology::TopologyCache;

/// Outcome of one distribution pass over an order's mappings.
#[derive(Debug, Clone, Default)]
pub struct DistributionReport {
    /// Mappings that reached quorum in this pass.
    pub distributed: BTreeSet<usize>,
    /// Mappings that fell short, with the reason.
    pub failed: BTreeMap<usize, IngressError>,
    /// Acknowledgments per pod that reached quorum.
    pub acks: BTreeMap<PodHash, usize>,
}

impl DistributionReport {
    /// Every mapping of the order has now reached quorum.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The error of the lowest-indexed mapping that fell short.
    #[must_use]
    pub fn first_failure(&self) -> Option<&IngressError> {
        self.failed.values().next()
    }
}

#[derive(Clone)]
pub struct Distributor {
    swarm: Arc<dyn Swarm>,
    topology: Arc<TopologyCache>,
    quorum: QuorumPolicy,
    call_timeout: Duration,
}

impl Distributor {
    pub fn new(
        swarm: Arc<dyn Swarm>,
        topology: Arc<TopologyCache>,
        quorum: QuorumPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            swarm,
            topology,
            quorum,
            call_timeout,
        }
    }

    /// Distribute every mapping of one order not listed in `done`.
    ///
    /// # Errors
    /// `EmptyMapping` if there are no mappings at all. Mappings that fall
    /// short are reported in [`DistributionReport::failed`].
    pub async fn distribute(
        &self,
        mappings: &[OrderFragmentMapping],
        done: &BTreeSet<usize>,
    ) -> Result<DistributionReport> {
        if mappings.is_empty() {
            return Err(IngressError::EmptyMapping);
        }
        let mut report = DistributionReport::default();

        for (index, mapping) in mappings.iter().enumerate() {
            if done.contains(&index) {
                continue;
            }
            match self.distribute_mapping(mapping).await {
                Ok(acks) => {
                    report.distributed.insert(index);
                    report.acks.extend(acks);
                }
                Err(err) => {
                    tracing::warn!(
                        order_id = %mapping.order_id.short(),
                        mapping = index,
                        error = %err,
                        "mapping distribution failed"
                    );
                    report.failed.insert(index, err);
                }
            }
        }
        Ok(report)
    }

    async fn distribute_mapping(
        &self,
        mapping: &OrderFragmentMapping,
    ) -> Result<BTreeMap<PodHash, usize>> {
        let mut acks = BTreeMap::new();
        for (pod, fragments) in mapping.pods.iter().filter(|(_, f)| !f.is_empty()) {
            let count = self.push_to_pod(*pod, fragments).await?;
            acks.insert(*pod, count);
        }
        Ok(acks)
    }

    /// Push `fragments` to every peer of `pod_hash`. Returns the ack count.
    async fn push_to_pod(&self, pod_hash: PodHash, fragments: &[OrderFragment]) -> Result<usize> {
        let pod = match self.topology.pod(&pod_hash).await {
            Ok(pod) => pod,
            Err(err) => {
                tracing::warn!(pod = %pod_hash.short(), error = %err, "pod not in topology");
                return Err(err);
            }
        };

        let pushes = pod.peers.iter().map(|peer| async move {
            let result = with_timeout(
                self.call_timeout,
                "store_fragments",
                self.swarm.store_fragments(*peer, pod_hash, fragments),
            )
            .await;
            if let Err(err) = &result {
                tracing::debug!(
                    pod = %pod_hash.short(),
                    peer = %peer.short(),
                    error = %err,
                    "push failed"
                );
            }
            result
        });
        let acks = join_all(pushes).await.iter().filter(|r| r.is_ok()).count();

        // A pod with no peers can hold nothing.
        let required = self.quorum.required(pod.size(), pod.threshold()).max(1);
        tracing::debug!(
            pod = %pod_hash.short(),
            acks,
            required,
            fragments = fragments.len(),
            "pod push complete"
        );
        if acks < required {
            return Err(IngressError::QuorumNotReached {
                pod: pod_hash,
                acks,
                required,
            });
        }
        Ok(acks)
    }
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor")
            .field("quorum", &self.quorum)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use podgate_types::{Epoch, EpochHash, MultiAddress, PeerId, Pod};

    use super::*;

    /// Swarm whose listed peers refuse every push.
    #[derive(Default)]
    struct PartialSwarm {
        down: HashSet<PeerId>,
        stored: Mutex<Vec<(PeerId, PodHash, usize)>>,
    }

    #[async_trait]
    impl Swarm for PartialSwarm {
        async fn peers(&self) -> Result<Vec<MultiAddress>> {
            Ok(Vec::new())
        }
        async fn add_peer(&self, _address: MultiAddress) -> Result<()> {
            Ok(())
        }
        async fn store_fragments(
            &self,
            peer: PeerId,
            pod: PodHash,
            fragments: &[OrderFragment],
        ) -> Result<()> {
            if self.down.contains(&peer) {
                return Err(IngressError::Swarm(format!("{peer} unreachable")));
            }
            self.stored.lock().unwrap().push((peer, pod, fragments.len()));
            Ok(())
        }
    }

    fn pod(tag: u8, size: u8) -> Pod {
        let base = tag.wrapping_mul(31);
        Pod::from_peers((0..size).map(|i| PeerId([base.wrapping_add(i); 20])).collect())
    }

    async fn distributor(
        swarm: Arc<PartialSwarm>,
        pods: Vec<Pod>,
        quorum: QuorumPolicy,
    ) -> Distributor {
        let topology = Arc::new(TopologyCache::new());
        topology
            .update(Epoch {
                hash: EpochHash([1; 32]),
                block_number: 1,
                pods,
            })
            .await;
        Distributor::new(swarm, topology, quorum, Duration::from_secs(1))
    }

    fn none() -> BTreeSet<usize> {
        BTreeSet::new()
    }

    fn mapping_for(pods: &[&Pod]) -> OrderFragmentMapping {
        let fragments = OrderFragment::dummy_split(pods.len() * 2);
        let order_id = fragments[0].order_id;
        let pods = pods
            .iter()
            .zip(fragments.chunks(2))
            .map(|(p, chunk)| (p.hash, chunk.to_vec()))
            .collect();
        OrderFragmentMapping { order_id, pods }
    }

    #[tokio::test]
    async fn every_peer_receives_the_bundle() {
        let swarm = Arc::new(PartialSwarm::default());
        let p = pod(1, 5);
        let d = distributor(swarm.clone(), vec![p.clone()], QuorumPolicy::default()).await;

        let report = d.distribute(&[mapping_for(&[&p])], &none()).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.distributed, BTreeSet::from([0]));
        assert_eq!(report.acks[&p.hash], 5);
        let stored = swarm.stored.lock().unwrap();
        assert_eq!(stored.len(), 5);
        assert!(stored.iter().all(|(_, pod, n)| *pod == p.hash && *n == 2));
    }

    #[tokio::test]
    async fn threshold_tolerates_minority_down() {
        let p = pod(2, 5);
        // threshold(5) = 4
        let swarm = Arc::new(PartialSwarm {
            down: p.peers[..1].iter().copied().collect(),
            ..PartialSwarm::default()
        });
        let d = distributor(swarm, vec![p.clone()], QuorumPolicy::default()).await;
        let report = d.distribute(&[mapping_for(&[&p])], &none()).await.unwrap();
        assert_eq!(report.acks[&p.hash], 4);
    }

    #[tokio::test]
    async fn shortfall_is_retryable() {
        let p = pod(3, 5);
        let swarm = Arc::new(PartialSwarm {
            down: p.peers[..2].iter().copied().collect(),
            ..PartialSwarm::default()
        });
        let d = distributor(swarm, vec![p.clone()], QuorumPolicy::default()).await;
        let report = d.distribute(&[mapping_for(&[&p])], &none()).await.unwrap();
        assert!(!report.is_complete());
        let err = report.first_failure().unwrap();
        assert!(matches!(
            err,
            IngressError::QuorumNotReached { acks: 3, required: 4, .. }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn configured_min_acks_overrides_threshold() {
        let p = pod(4, 5);
        let swarm = Arc::new(PartialSwarm {
            down: p.peers[..3].iter().copied().collect(),
            ..PartialSwarm::default()
        });
        let d = distributor(swarm, vec![p.clone()], QuorumPolicy { min_acks: Some(2) }).await;
        let report = d.distribute(&[mapping_for(&[&p])], &none()).await.unwrap();
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn unknown_pod_fails_mapping() {
        let known = pod(5, 3);
        let unknown = pod(6, 3);
        let swarm = Arc::new(PartialSwarm::default());
        let d = distributor(swarm, vec![known.clone()], QuorumPolicy::default()).await;
        let report = d
            .distribute(&[mapping_for(&[&known, &unknown])], &none())
            .await
            .unwrap();
        assert!(matches!(
            report.first_failure(),
            Some(IngressError::UnknownPod(h)) if *h == unknown.hash
        ));
    }

    #[tokio::test]
    async fn pod_without_fragments_is_skipped() {
        let known = pod(11, 3);
        let swarm = Arc::new(PartialSwarm::default());
        let d = distributor(swarm, vec![known.clone()], QuorumPolicy::default()).await;

        let mut mapping = mapping_for(&[&known]);
        mapping.pods.insert(PodHash([0xAB; 32]), Vec::new());
        let report = d.distribute(&[mapping], &none()).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.acks.len(), 1);
    }

    #[tokio::test]
    async fn failed_backup_mapping_is_reported_alone() {
        let good = pod(7, 3);
        let dead = pod(8, 3);
        let swarm = Arc::new(PartialSwarm {
            down: dead.peers.iter().copied().collect(),
            ..PartialSwarm::default()
        });
        let pods = vec![good.clone(), dead.clone()];
        let d = distributor(swarm, pods, QuorumPolicy::default()).await;

        let report = d
            .distribute(&[mapping_for(&[&good]), mapping_for(&[&dead])], &none())
            .await
            .unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.distributed, BTreeSet::from([0]));
        assert!(matches!(
            report.failed.get(&1),
            Some(IngressError::QuorumNotReached { acks: 0, .. })
        ));
        assert!(!report.acks.contains_key(&dead.hash));
    }

    #[tokio::test]
    async fn done_mappings_are_not_pushed_again() {
        let first = pod(9, 3);
        let second = pod(10, 3);
        let swarm = Arc::new(PartialSwarm::default());
        let pods = vec![first.clone(), second.clone()];
        let d = distributor(swarm.clone(), pods, QuorumPolicy::default()).await;

        let report = d
            .distribute(
                &[mapping_for(&[&first]), mapping_for(&[&second])],
                &BTreeSet::from([0]),
            )
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.distributed, BTreeSet::from([1]));
        let stored = swarm.stored.lock().unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|(_, pod, _)| *pod == second.hash));
    }

    #[tokio::test]
    async fn no_mappings_is_an_error() {
        let swarm = Arc::new(PartialSwarm::default());
        let d = distributor(swarm, Vec::new(), QuorumPolicy::default()).await;
        assert!(matches!(
            d.distribute(&[], &none()).await,
            Err(IngressError::EmptyMapping)
        ));
    }
}
