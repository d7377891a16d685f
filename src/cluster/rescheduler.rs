//! Re-placement of pods that lost their node
//!
//! Runs inside the caller's critical section. Pods are handled in creation
//! order because every placement changes the free CPU the next pod sees.
//! A pod that fits nowhere stays Pending; that is never an error.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::node::{NodeId, PodId};
use super::scheduler::select_node;
use super::store::{ClusterStore, EvictedPod};

/// A pod placed by the rescheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub pod_id: PodId,
    pub node_id: NodeId,
}

/// Outcome of one rescheduling pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RescheduleReport {
    /// Pods that found a new node
    pub rescheduled: Vec<Placement>,
    /// Pods left Pending
    pub pending: Vec<PodId>,
}

impl RescheduleReport {
    pub fn is_empty(&self) -> bool {
        self.rescheduled.is_empty() && self.pending.is_empty()
    }
}

/// Try to place each pod on the best-fit Active node
///
/// Pods that no longer exist (removed concurrently) are skipped, as are
/// duplicates. Anything that cannot be placed is left Pending.
pub fn reschedule(store: &mut ClusterStore, mut pods: Vec<EvictedPod>) -> RescheduleReport {
    pods.sort_by_key(|p| p.seq);
    pods.dedup_by_key(|p| p.id);

    let mut report = RescheduleReport::default();

    for pod in pods {
        if store.get_pod(pod.id).is_err() {
            continue;
        }

        let Some(node_id) = select_node(pod.cpu, &store.node_loads()) else {
            warn!(
                "Pod {} ({} CPU) left pending: no active node has room",
                pod.id, pod.cpu
            );
            report.pending.push(pod.id);
            continue;
        };

        match store.place_pod(node_id, pod.id) {
            Ok(()) => {
                info!("Pod {} rescheduled to node {}", pod.id, node_id);
                report.rescheduled.push(Placement {
                    pod_id: pod.id,
                    node_id,
                });
            }
            Err(e) => {
                error!("Failed to place pod {} on node {}: {}", pod.id, node_id, e);
                report.pending.push(pod.id);
            }
        }
    }

    report
}
