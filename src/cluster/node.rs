//! Node and Pod resources
//!
//! A Node is a unit of CPU capacity that can host pods. Each Node:
//! - Is created with a fixed CPU capacity (and an optional cpuset hint)
//! - Tracks the pods placed on it
//! - Records the last heartbeat received from its agent
//! - Moves from Active to Failed exactly once, and is never deleted
//!
//! A Pod is a workload unit with a fixed CPU requirement. It is Running
//! while placed on an Active node, and Pending otherwise.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::provision::ProvisionHandle;

/// Identifier of a node, rendered as `N<n>`
///
/// Ids come from a monotonically increasing counter, so their numeric
/// order is creation order. That order is the scheduler's tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('N')
            .and_then(|n| n.parse::<u64>().ok())
            .map(NodeId)
            .ok_or_else(|| format!("invalid node id '{}'", s))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a pod (UUIDv4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodId(Uuid);

impl PodId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PodId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PodId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(PodId)
            .map_err(|_| format!("invalid pod id '{}'", s))
    }
}

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Node is accepting and running pods
    Active,
    /// Node missed its heartbeat deadline or was failed by hand (terminal)
    Failed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle status of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodStatus {
    /// Placed on an Active node
    Running,
    /// Waiting for a node with enough free CPU
    Pending,
}

impl fmt::Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodStatus::Running => write!(f, "running"),
            PodStatus::Pending => write!(f, "pending"),
        }
    }
}

/// A node in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,

    /// CPU cores offered by this node, fixed at creation
    pub capacity_cpu: f64,

    /// Opaque cpuset hint, only passed to the provisioner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_affinity: Option<String>,

    pub status: NodeStatus,

    /// Pods currently placed on this node
    #[serde(default)]
    pub assigned_pods: BTreeSet<PodId>,

    pub last_heartbeat: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    /// Handle returned by the provisioner, if the node was provisioned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provision_handle: Option<ProvisionHandle>,
}

impl Node {
    /// Create an Active node with no pods; its heartbeat clock starts now
    pub fn new(id: NodeId, capacity_cpu: f64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            capacity_cpu,
            cpu_affinity: None,
            status: NodeStatus::Active,
            assigned_pods: BTreeSet::new(),
            last_heartbeat: now,
            created_at: now,
            provision_handle: None,
        }
    }

    pub fn with_affinity(mut self, affinity: Option<String>) -> Self {
        self.cpu_affinity = affinity;
        self
    }

    pub fn with_provision_handle(mut self, handle: Option<ProvisionHandle>) -> Self {
        self.provision_handle = handle;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Seconds since the last heartbeat
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> f64 {
        let age = now - self.last_heartbeat;
        (age.num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    /// Check if the node has gone longer than `timeout` without a heartbeat
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_heartbeat > timeout
    }
}

/// A pod in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: PodId,

    /// CPU cores required, fixed at creation
    pub cpu_requirement: f64,

    /// Host node while Running
    pub node_id: Option<NodeId>,

    pub status: PodStatus,

    pub created_at: DateTime<Utc>,

    /// Creation sequence number, used to order rescheduling
    pub seq: u64,
}

impl Pod {
    /// Create a Pending pod that is not placed anywhere yet
    pub fn new(cpu_requirement: f64, seq: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: PodId::new(),
            cpu_requirement,
            node_id: None,
            status: PodStatus::Pending,
            created_at: now,
            seq,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == PodStatus::Running
    }

    /// Creation time as fractional unix seconds
    pub fn created_at_unix(&self) -> f64 {
        self.created_at.timestamp_millis() as f64 / 1000.0
    }
}
