//! Authoritative node and pod tables
//!
//! `ClusterStore` owns the raw tables and implements every primitive
//! mutation. Each method either applies fully or returns an error without
//! touching the tables. It is not synchronised: all access goes through
//! [`ClusterState`](super::state::ClusterState), which serialises it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::node::{Node, NodeId, NodeStatus, Pod, PodId, PodStatus};
use super::scheduler::{NodeLoad, CPU_EPSILON};
use crate::provision::{ProvisionError, ProvisionHandle};

/// Errors that can occur in cluster operations
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Pod '{0}' not found")]
    PodNotFound(String),

    #[error("Node '{0}' has already failed")]
    AlreadyFailed(NodeId),

    #[error("Node '{0}' is not active")]
    NodeNotActive(NodeId),

    #[error("Capacity exceeded on node '{node}': requested {requested} CPU, {available} available")]
    CapacityExceeded {
        node: NodeId,
        requested: f64,
        available: f64,
    },

    #[error("No node has {cpu} CPU cores available")]
    Unschedulable { cpu: f64 },

    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Check that a CPU amount is a positive, finite number
pub fn validate_cpu(value: f64, what: &str) -> ClusterResult<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ClusterError::Validation(format!(
            "{} must be a positive number, got {}",
            what, value
        )));
    }
    Ok(value)
}

/// A pod taken off a node (or still waiting for one)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvictedPod {
    pub id: PodId,
    pub cpu: f64,
    pub seq: u64,
}

impl From<&Pod> for EvictedPod {
    fn from(pod: &Pod) -> Self {
        Self {
            id: pod.id,
            cpu: pod.cpu_requirement,
            seq: pod.seq,
        }
    }
}

/// Aggregate view of the cluster, derived on every call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub active_nodes: usize,
    pub failed_nodes: usize,
    pub total_pods: usize,
    pub running_pods: usize,
    pub pending_pods: usize,
    pub total_cpu: f64,
    pub used_cpu: f64,
    pub available_cpu: f64,
    pub utilization_percentage: f64,
}

/// The node and pod tables
#[derive(Debug, Default)]
pub struct ClusterStore {
    nodes: BTreeMap<NodeId, Node>,
    pods: BTreeMap<PodId, Pod>,
    last_node_id: u64,
    last_pod_seq: u64,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Hand out the next node id; ids are never reused
    pub fn reserve_node_id(&mut self) -> NodeId {
        self.last_node_id += 1;
        NodeId::new(self.last_node_id)
    }

    /// Create an Active node under a fresh id
    pub fn add_node(
        &mut self,
        capacity_cpu: f64,
        affinity: Option<String>,
        now: DateTime<Utc>,
    ) -> ClusterResult<NodeId> {
        validate_cpu(capacity_cpu, "cpu_cores")?;
        let id = self.reserve_node_id();
        self.insert_node(id, capacity_cpu, affinity, None, now)?;
        Ok(id)
    }

    /// Create an Active node under an id obtained from [`Self::reserve_node_id`]
    pub fn insert_node(
        &mut self,
        id: NodeId,
        capacity_cpu: f64,
        affinity: Option<String>,
        handle: Option<ProvisionHandle>,
        now: DateTime<Utc>,
    ) -> ClusterResult<()> {
        validate_cpu(capacity_cpu, "cpu_cores")?;
        if id.get() == 0 || id.get() > self.last_node_id {
            return Err(ClusterError::Validation(format!(
                "node id '{}' was never reserved",
                id
            )));
        }
        if self.nodes.contains_key(&id) {
            return Err(ClusterError::Validation(format!(
                "node id '{}' is already in use",
                id
            )));
        }

        let node = Node::new(id, capacity_cpu, now)
            .with_affinity(affinity)
            .with_provision_handle(handle);
        self.nodes.insert(id, node);
        Ok(())
    }

    pub fn get_node(&self, id: NodeId) -> ClusterResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| ClusterError::NodeNotFound(id.to_string()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Refresh a node's heartbeat; a Failed node is left untouched
    pub fn record_heartbeat(&mut self, id: NodeId, now: DateTime<Utc>) -> ClusterResult<NodeStatus> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ClusterError::NodeNotFound(id.to_string()))?;
        if node.status == NodeStatus::Active {
            node.last_heartbeat = now;
        }
        Ok(node.status)
    }

    /// Move an Active node to Failed
    pub fn mark_failed(&mut self, id: NodeId) -> ClusterResult<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ClusterError::NodeNotFound(id.to_string()))?;
        if node.status == NodeStatus::Failed {
            return Err(ClusterError::AlreadyFailed(id));
        }
        node.status = NodeStatus::Failed;
        Ok(())
    }

    /// Take every pod off a node
    ///
    /// The evicted pods become Pending with no node, so no pod is left
    /// pointing at the node. Returned in creation order.
    pub fn evict_all_pods(&mut self, id: NodeId) -> ClusterResult<Vec<EvictedPod>> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ClusterError::NodeNotFound(id.to_string()))?;
        let assigned = std::mem::take(&mut node.assigned_pods);

        let mut evicted = Vec::with_capacity(assigned.len());
        for pod_id in assigned {
            if let Some(pod) = self.pods.get_mut(&pod_id) {
                pod.node_id = None;
                pod.status = PodStatus::Pending;
                evicted.push(EvictedPod::from(&*pod));
            }
        }
        evicted.sort_by_key(|p| p.seq);
        Ok(evicted)
    }

    /// CPU used on a node, summed over its assigned pods
    pub fn used_cpu(&self, node: &Node) -> f64 {
        node.assigned_pods
            .iter()
            .filter_map(|id| self.pods.get(id))
            .map(|p| p.cpu_requirement)
            .sum()
    }

    /// Per-node CPU load for the scheduler, in id order
    pub fn node_loads(&self) -> Vec<NodeLoad> {
        self.nodes
            .values()
            .map(|n| NodeLoad {
                id: n.id,
                status: n.status,
                capacity_cpu: n.capacity_cpu,
                used_cpu: self.used_cpu(n),
            })
            .collect()
    }

    // =========================================================================
    // Pods
    // =========================================================================

    /// Create a Pending pod; the caller places it
    pub fn create_pod(&mut self, cpu: f64, now: DateTime<Utc>) -> ClusterResult<PodId> {
        validate_cpu(cpu, "cpu_cores")?;
        self.last_pod_seq += 1;
        let pod = Pod::new(cpu, self.last_pod_seq, now);
        let id = pod.id;
        self.pods.insert(id, pod);
        Ok(id)
    }

    pub fn get_pod(&self, id: PodId) -> ClusterResult<&Pod> {
        self.pods
            .get(&id)
            .ok_or_else(|| ClusterError::PodNotFound(id.to_string()))
    }

    pub fn pods(&self) -> impl Iterator<Item = &Pod> {
        self.pods.values()
    }

    /// Pending pods, in creation order
    pub fn pending_pods(&self) -> Vec<EvictedPod> {
        let mut pending: Vec<EvictedPod> = self
            .pods
            .values()
            .filter(|p| p.status == PodStatus::Pending)
            .map(EvictedPod::from)
            .collect();
        pending.sort_by_key(|p| p.seq);
        pending
    }

    /// Place an existing pod on an Active node
    ///
    /// Re-validates the capacity invariant even though the scheduler already
    /// checked it.
    pub fn place_pod(&mut self, node_id: NodeId, pod_id: PodId) -> ClusterResult<()> {
        let cpu = self.get_pod(pod_id)?.cpu_requirement;
        let node = self.get_node(node_id)?;
        if !node.is_active() {
            return Err(ClusterError::NodeNotActive(node_id));
        }

        let previous = self.pods.get(&pod_id).and_then(|p| p.node_id);
        if previous == Some(node_id) {
            return Ok(());
        }
        let available = node.capacity_cpu - self.used_cpu(node);
        if cpu > available + CPU_EPSILON {
            return Err(ClusterError::CapacityExceeded {
                node: node_id,
                requested: cpu,
                available,
            });
        }

        if let Some(old) = previous.and_then(|id| self.nodes.get_mut(&id)) {
            old.assigned_pods.remove(&pod_id);
        }
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.assigned_pods.insert(pod_id);
        }
        if let Some(pod) = self.pods.get_mut(&pod_id) {
            pod.node_id = Some(node_id);
            pod.status = PodStatus::Running;
        }
        Ok(())
    }

    /// Delete a pod and detach it from its node
    pub fn remove_pod(&mut self, id: PodId) -> ClusterResult<Pod> {
        let pod = self
            .pods
            .remove(&id)
            .ok_or_else(|| ClusterError::PodNotFound(id.to_string()))?;
        if let Some(node) = pod.node_id.and_then(|n| self.nodes.get_mut(&n)) {
            node.assigned_pods.remove(&id);
        }
        Ok(pod)
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Derive the cluster summary; CPU figures cover Active nodes only
    pub fn summary(&self) -> ClusterSummary {
        let mut summary = ClusterSummary::default();

        for node in self.nodes.values() {
            match node.status {
                NodeStatus::Active => {
                    summary.active_nodes += 1;
                    summary.total_cpu += node.capacity_cpu;
                    summary.used_cpu += self.used_cpu(node);
                }
                NodeStatus::Failed => summary.failed_nodes += 1,
            }
        }

        summary.total_pods = self.pods.len();
        summary.running_pods = self.pods.values().filter(|p| p.is_running()).count();
        summary.pending_pods = summary.total_pods - summary.running_pods;
        summary.available_cpu = summary.total_cpu - summary.used_cpu;
        summary.utilization_percentage = if summary.total_cpu > 0.0 {
            summary.used_cpu / summary.total_cpu * 100.0
        } else {
            0.0
        };

        summary
    }

    /// List every broken invariant; empty when the tables are consistent
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for node in self.nodes.values() {
            if node.is_active() {
                let used = self.used_cpu(node);
                if used > node.capacity_cpu + CPU_EPSILON {
                    violations.push(format!(
                        "node {} uses {} of {} CPU",
                        node.id, used, node.capacity_cpu
                    ));
                }
            } else if !node.assigned_pods.is_empty() {
                violations.push(format!("failed node {} still has pods", node.id));
            }

            for pod_id in &node.assigned_pods {
                match self.pods.get(pod_id) {
                    Some(pod) if pod.node_id == Some(node.id) => {}
                    _ => violations.push(format!(
                        "node {} lists pod {} which does not point back",
                        node.id, pod_id
                    )),
                }
            }
        }

        for pod in self.pods.values() {
            match (pod.status, pod.node_id) {
                (PodStatus::Running, Some(node_id)) => match self.nodes.get(&node_id) {
                    Some(node) if node.is_active() && node.assigned_pods.contains(&pod.id) => {}
                    _ => violations.push(format!(
                        "running pod {} is not held by active node {}",
                        pod.id, node_id
                    )),
                },
                (PodStatus::Pending, None) => {}
                (status, node_id) => violations.push(format!(
                    "pod {} is {} with node {:?}",
                    pod.id, status, node_id
                )),
            }
        }

        violations
    }
}
