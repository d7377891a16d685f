//! Shared, serialised access to the cluster tables
//!
//! `ClusterState` is the single mutual-exclusion domain of the control
//! plane. Every mutation takes the write lock exactly once, so
//! select-then-place and fail-evict-reschedule are atomic with respect to
//! each other, to heartbeats and to the failure detector. Readers share
//! the read lock and always see a consistent copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::node::{Node, NodeId, NodeStatus, Pod, PodId};
use super::rescheduler::{reschedule, RescheduleReport};
use super::scheduler::select_node;
use super::store::{validate_cpu, ClusterError, ClusterResult, ClusterStore, ClusterSummary};
use crate::provision::ProvisionHandle;

/// Why a node was failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    HeartbeatTimeout,
    Manual,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            FailureReason::Manual => write!(f, "manual"),
        }
    }
}

/// Result of failing a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub node_id: NodeId,
    pub reason: FailureReason,
    /// Where the evicted (and previously pending) pods ended up
    #[serde(flatten)]
    pub outcome: RescheduleReport,
    /// Handle to release once the transition is committed
    #[serde(skip)]
    pub provision_handle: Option<ProvisionHandle>,
}

/// Consistent copy of the whole cluster
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    pub nodes: Vec<Node>,
    pub pods: BTreeMap<PodId, Pod>,
    pub taken_at: DateTime<Utc>,
}

impl ClusterSnapshot {
    /// CPU used on a node in this snapshot
    pub fn used_cpu(&self, node: &Node) -> f64 {
        node.assigned_pods
            .iter()
            .filter_map(|id| self.pods.get(id))
            .map(|p| p.cpu_requirement)
            .sum()
    }
}

/// Thread-safe handle to the cluster tables
#[derive(Clone, Default)]
pub struct ClusterState {
    store: Arc<RwLock<ClusterStore>>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` under the write lock
    fn write<R>(&self, f: impl FnOnce(&mut ClusterStore) -> R) -> R {
        let mut store = self.store.write();
        let result = f(&mut store);
        debug_assert!(
            store.invariant_violations().is_empty(),
            "cluster invariants broken: {:?}",
            store.invariant_violations()
        );
        result
    }

    /// Run `f` under the read lock
    pub fn read<R>(&self, f: impl FnOnce(&ClusterStore) -> R) -> R {
        f(&self.store.read())
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub fn reserve_node_id(&self) -> NodeId {
        self.write(|s| s.reserve_node_id())
    }

    /// Add an unprovisioned node
    pub fn add_node(&self, capacity_cpu: f64, affinity: Option<String>) -> ClusterResult<NodeId> {
        self.write(|s| s.add_node(capacity_cpu, affinity, Utc::now()))
    }

    /// Add a node under a reserved id once its provisioning has succeeded
    pub fn insert_node(
        &self,
        id: NodeId,
        capacity_cpu: f64,
        affinity: Option<String>,
        handle: Option<ProvisionHandle>,
    ) -> ClusterResult<()> {
        self.write(|s| s.insert_node(id, capacity_cpu, affinity, handle, Utc::now()))
    }

    pub fn get_node(&self, id: NodeId) -> ClusterResult<Node> {
        self.read(|s| s.get_node(id).cloned())
    }

    pub fn list_nodes(&self) -> Vec<Node> {
        self.read(|s| s.nodes().cloned().collect())
    }

    pub fn record_heartbeat(&self, id: NodeId) -> ClusterResult<NodeStatus> {
        self.record_heartbeat_at(id, Utc::now())
    }

    pub fn record_heartbeat_at(&self, id: NodeId, now: DateTime<Utc>) -> ClusterResult<NodeStatus> {
        self.write(|s| s.record_heartbeat(id, now))
    }

    /// Fail a node, evict its pods and reschedule them, in one transaction
    ///
    /// Pods that were already Pending join the evicted ones, so a failure
    /// is also a retry for earlier casualties.
    pub fn fail_node(&self, id: NodeId, reason: FailureReason) -> ClusterResult<FailureReport> {
        self.write(|s| fail_locked(s, id, reason))
    }

    /// Fail every Active node whose heartbeat is older than `timeout`
    ///
    /// Candidates come from a read snapshot; staleness is checked again
    /// under the write lock so a heartbeat that lands in between wins.
    pub fn fail_stale_nodes(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<FailureReport> {
        let candidates: Vec<NodeId> = self.read(|s| {
            s.nodes()
                .filter(|n| n.is_active() && n.is_stale(now, timeout))
                .map(|n| n.id)
                .collect()
        });

        candidates
            .into_iter()
            .filter_map(|id| {
                self.write(|s| {
                    let still_stale = s
                        .get_node(id)
                        .map(|n| n.is_active() && n.is_stale(now, timeout))
                        .unwrap_or(false);
                    if !still_stale {
                        debug!("Node {} recovered before it could be failed", id);
                        return None;
                    }
                    fail_locked(s, id, FailureReason::HeartbeatTimeout).ok()
                })
            })
            .collect()
    }

    // =========================================================================
    // Pods
    // =========================================================================

    /// Create a pod on the best-fit node
    ///
    /// Fails with `Unschedulable` and leaves the cluster untouched when no
    /// node has room.
    pub fn request_pod(&self, cpu: f64) -> ClusterResult<(PodId, NodeId)> {
        validate_cpu(cpu, "cpu_cores")?;
        self.write(|s| {
            let node_id =
                select_node(cpu, &s.node_loads()).ok_or(ClusterError::Unschedulable { cpu })?;
            let pod_id = s.create_pod(cpu, Utc::now())?;
            if let Err(e) = s.place_pod(node_id, pod_id) {
                let _ = s.remove_pod(pod_id);
                return Err(e);
            }
            Ok((pod_id, node_id))
        })
    }

    pub fn get_pod(&self, id: PodId) -> ClusterResult<Pod> {
        self.read(|s| s.get_pod(id).cloned())
    }

    pub fn list_pods(&self) -> Vec<Pod> {
        self.read(|s| s.pods().cloned().collect())
    }

    pub fn remove_pod(&self, id: PodId) -> ClusterResult<Pod> {
        self.write(|s| s.remove_pod(id))
    }

    /// Retry placement of every Pending pod
    pub fn reschedule_pending(&self) -> RescheduleReport {
        self.write(|s| {
            let pending = s.pending_pods();
            if pending.is_empty() {
                return RescheduleReport::default();
            }
            reschedule(s, pending)
        })
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn summary(&self) -> ClusterSummary {
        self.read(|s| s.summary())
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        self.read(|s| ClusterSnapshot {
            nodes: s.nodes().cloned().collect(),
            pods: s.pods().map(|p| (p.id, p.clone())).collect(),
            taken_at: Utc::now(),
        })
    }
}

fn fail_locked(
    store: &mut ClusterStore,
    id: NodeId,
    reason: FailureReason,
) -> ClusterResult<FailureReport> {
    store.mark_failed(id)?;
    let mut evicted = store.evict_all_pods(id)?;
    warn!(
        "Node {} failed ({}), {} pod(s) evicted",
        id,
        reason,
        evicted.len()
    );

    evicted.extend(store.pending_pods());
    let outcome = reschedule(store, evicted);
    let provision_handle = store.get_node(id)?.provision_handle.clone();

    Ok(FailureReport {
        node_id: id,
        reason,
        outcome,
        provision_handle,
    })
}
