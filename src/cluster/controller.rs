//! Cluster Controller - request-level operations on the cluster
//!
//! The controller is responsible for:
//! - Validating requests before any state is touched
//! - Provisioning node compute outside the state lock, with rollback
//! - Applying pod requests, removals and node failures to `ClusterState`
//! - Releasing the compute of failed nodes

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use regex::Regex;
use tracing::{debug, error, info, warn};

use super::node::{NodeId, NodeStatus, Pod, PodId};
use super::rescheduler::RescheduleReport;
use super::state::{ClusterSnapshot, ClusterState, FailureReason, FailureReport};
use super::store::{validate_cpu, ClusterError, ClusterResult, ClusterSummary};
use crate::provision::{ProvisionRequest, Provisioner, SimulatedProvisioner};

/// Outcome of a manual failure request
#[derive(Debug, Clone, PartialEq)]
pub enum FailNodeOutcome {
    Failed(FailureReport),
    AlreadyFailed,
}

const CPUSET_PATTERN: &str = r"^\d+(-\d+)?(,\d+(-\d+)?)*$";

/// Check that an affinity hint is a cpuset list such as `0-3,6`
pub fn validate_affinity(affinity: Option<&str>) -> ClusterResult<Option<String>> {
    let Some(raw) = affinity.map(str::trim).filter(|a| !a.is_empty()) else {
        return Ok(None);
    };
    let cpuset = Regex::new(CPUSET_PATTERN)
        .map_err(|e| ClusterError::Validation(format!("Invalid cpuset pattern: {}", e)))?;
    if !cpuset.is_match(raw) {
        return Err(ClusterError::Validation(format!(
            "cpu_affinity '{}' is not a cpuset list (e.g. \"0-3,6\")",
            raw
        )));
    }
    Ok(Some(raw.to_string()))
}

/// The cluster controller ties state, scheduling and provisioning together
#[derive(Clone)]
pub struct ClusterController {
    state: ClusterState,
    provisioner: Arc<dyn Provisioner>,
}

impl ClusterController {
    /// Create a controller backed by the simulated provisioner
    pub fn new() -> Self {
        Self::with_provisioner(Arc::new(SimulatedProvisioner::new()))
    }

    pub fn with_provisioner(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            state: ClusterState::new(),
            provisioner,
        }
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn provisioner_name(&self) -> &'static str {
        self.provisioner.name()
    }

    // =========================================================================
    // Node Management
    // =========================================================================

    /// Provision and register a new node
    ///
    /// Nothing is stored unless provisioning succeeds.
    pub async fn add_node(
        &self,
        capacity_cpu: f64,
        affinity: Option<&str>,
    ) -> ClusterResult<NodeId> {
        let capacity_cpu = validate_cpu(capacity_cpu, "cpu_cores")?;
        let affinity = validate_affinity(affinity)?;

        let node_id = self.state.reserve_node_id();
        let request = ProvisionRequest {
            node_id,
            cpu: capacity_cpu,
            affinity: affinity.clone(),
        };

        let handle = match self.provisioner.provision(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    "Provisioning node {} via {} failed, node not added: {}",
                    node_id,
                    self.provisioner.name(),
                    e
                );
                return Err(e.into());
            }
        };

        if let Err(e) =
            self.state
                .insert_node(node_id, capacity_cpu, affinity, Some(handle.clone()))
        {
            warn!("Rolling back provisioning of node {}: {}", node_id, e);
            if let Err(release) = self.provisioner.deprovision(&handle).await {
                error!("Failed to release {} during rollback: {}", handle, release);
            }
            return Err(e);
        }

        info!(
            "Node {} added with {} CPU cores ({})",
            node_id,
            capacity_cpu,
            handle
        );
        Ok(node_id)
    }

    /// Record a heartbeat; returns the node's status
    pub fn heartbeat(&self, node_id: NodeId) -> ClusterResult<NodeStatus> {
        let status = self.state.record_heartbeat(node_id)?;
        if status == NodeStatus::Failed {
            debug!("Heartbeat from failed node {} ignored", node_id);
        }
        Ok(status)
    }

    /// Fail a node by hand and reschedule its pods immediately
    pub async fn fail_node(&self, node_id: NodeId) -> ClusterResult<FailNodeOutcome> {
        match self.state.fail_node(node_id, FailureReason::Manual) {
            Ok(report) => {
                self.release(&report).await;
                Ok(FailNodeOutcome::Failed(report))
            }
            Err(ClusterError::AlreadyFailed(_)) => Ok(FailNodeOutcome::AlreadyFailed),
            Err(e) => Err(e),
        }
    }

    /// Fail every node whose heartbeat is older than `timeout`
    pub async fn fail_stale_nodes(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<FailureReport> {
        let reports = self.state.fail_stale_nodes(now, timeout);
        for report in &reports {
            self.release(report).await;
        }
        reports
    }

    /// Release a failed node's compute, outside the state lock
    async fn release(&self, report: &FailureReport) {
        let Some(handle) = &report.provision_handle else {
            return;
        };
        if let Err(e) = self.provisioner.deprovision(handle).await {
            warn!(
                "Failed to release compute of node {} ({}): {}",
                report.node_id, handle, e
            );
        }
    }

    // =========================================================================
    // Pod Management
    // =========================================================================

    /// Place a new pod on the best-fit node
    pub fn request_pod(&self, cpu: f64) -> ClusterResult<(PodId, NodeId)> {
        match self.state.request_pod(cpu) {
            Ok((pod_id, node_id)) => {
                info!("Pod {} ({} CPU) scheduled on node {}", pod_id, cpu, node_id);
                Ok((pod_id, node_id))
            }
            Err(e @ ClusterError::CapacityExceeded { .. }) => {
                error!("Internal consistency fault while placing pod: {}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn remove_pod(&self, pod_id: PodId) -> ClusterResult<Pod> {
        let pod = self.state.remove_pod(pod_id)?;
        info!("Pod {} removed", pod_id);
        Ok(pod)
    }

    /// Retry placement of every Pending pod
    pub fn reschedule_pending(&self) -> RescheduleReport {
        self.state.reschedule_pending()
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn summary(&self) -> ClusterSummary {
        self.state.summary()
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        self.state.snapshot()
    }

    /// Release the compute of every node that still holds it
    pub async fn shutdown(&self) {
        let live: Vec<_> = self
            .state
            .list_nodes()
            .into_iter()
            .filter(|n| n.is_active())
            .filter_map(|n| n.provision_handle)
            .collect();
        if live.is_empty() {
            return;
        }

        info!("Releasing compute of {} node(s)", live.len());
        let results = join_all(live.iter().map(|h| self.provisioner.deprovision(h))).await;
        for (handle, result) in live.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to release {}: {}", handle, e);
            }
        }
    }
}

impl Default for ClusterController {
    fn default() -> Self {
        Self::new()
    }
}
