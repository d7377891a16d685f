//! # Cluster Control Plane
//!
//! Tracks nodes with a CPU capacity, places pods on them, detects node
//! failure by heartbeat timeout and reschedules the pods a failed node
//! was running.
//!
//! ## Core Resources
//!
//! - **Node**: a unit of CPU capacity, Active until it fails (terminal)
//! - **Pod**: a workload with a CPU requirement, Running on an Active
//!   node or Pending
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    kubesim control plane                     │
//! │                       (kubesim serve)                        │
//! │  ┌──────────────┐  ┌───────────────────┐  ┌──────────────┐   │
//! │  │ API Server   │─▶│ ClusterController │◀─│ Failure      │   │
//! │  │ :5000        │  │  (+ Provisioner)  │  │ Detector     │   │
//! │  └──────────────┘  └─────────┬─────────┘  └──────────────┘   │
//! │                              ▼                               │
//! │              ClusterState (single RwLock)                    │
//! │        scheduler::select_node · rescheduler::reschedule      │
//! └──────────────────────────────────────────────────────────────┘
//!         ▲                    ▲                    ▲
//!   ┌───────────┐        ┌───────────┐        ┌───────────┐
//!   │  agent N1 │        │  agent N2 │        │  agent N3 │
//!   └───────────┘        └───────────┘        └───────────┘
//!            POST /node/heartbeat/{node_id}
//! ```

pub mod api;
pub mod controller;
pub mod detector;
pub mod heartbeat;
pub mod node;
pub mod rescheduler;
pub mod scheduler;
pub mod state;
pub mod store;

pub use api::{create_control_plane_router, ControlPlaneState};
pub use controller::{ClusterController, FailNodeOutcome};
pub use detector::{spawn_detector, DetectorConfig, FailureDetector};
pub use heartbeat::{spawn_heartbeat, HeartbeatClient, HeartbeatConfig};
pub use node::{Node, NodeId, NodeStatus, Pod, PodId, PodStatus};
pub use rescheduler::{Placement, RescheduleReport};
pub use scheduler::{select_node, NodeLoad};
pub use state::{ClusterSnapshot, ClusterState, FailureReason, FailureReport};
pub use store::{ClusterError, ClusterResult, ClusterStore, ClusterSummary};

/// Default control plane port
pub const DEFAULT_CONTROL_PLANE_PORT: u16 = 5000;

/// Default period between failure detector passes (seconds)
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 5;

/// Default heartbeat age after which a node is failed (seconds)
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 15;

/// Default interval between agent heartbeats (seconds)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;
