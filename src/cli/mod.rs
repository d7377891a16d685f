//! CLI module for kubesim
//!
//! Provides kubectl-like subcommands:
//! - `kubesim serve` - Run the control plane
//! - `kubesim agent` - Send heartbeats on behalf of a node
//! - `kubesim get` - List nodes or pods
//! - `kubesim status` - Show the cluster summary
//! - `kubesim node` - Add, fail or heartbeat a node
//! - `kubesim pod` - Request, remove or reschedule pods

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

use crate::cluster::{NodeId, PodId, DEFAULT_CONTROL_PLANE_PORT, HEARTBEAT_INTERVAL_SECS};
use crate::config::{ClusterConfig, ProvisionerKind};

/// Control plane URL used by client commands when none is given
pub fn default_control_plane_url() -> String {
    format!("http://localhost:{}", DEFAULT_CONTROL_PLANE_PORT)
}

#[derive(Parser, Debug)]
#[command(name = "kubesim")]
#[command(about = "A small container-orchestrator control plane")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.kubesim/config.yaml)
    #[arg(long, global = true, env = "KUBESIM_CONFIG")]
    pub config: Option<String>,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    /// Control plane URL for client commands
    #[arg(long, global = true, env = "KUBESIM_URL", default_value_t = default_control_plane_url())]
    pub url: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane server and failure detector
    Serve(ServeArgs),

    /// Send periodic heartbeats for a node
    Agent(AgentArgs),

    /// Get/list resources
    Get(GetArgs),

    /// Show cluster status
    Status,

    /// Manage nodes
    Node(NodeArgs),

    /// Manage pods
    Pod(PodArgs),
}

/// Arguments for the serve command
///
/// Every flag overrides the matching config file field.
#[derive(Parser, Debug, Default)]
pub struct ServeArgs {
    /// Bind address for the server
    #[arg(long, env = "KUBESIM_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Port to listen on (default: 5000)
    #[arg(short, long, env = "KUBESIM_PORT")]
    pub port: Option<u16>,

    /// Seconds between failure detector passes
    #[arg(long, env = "KUBESIM_CHECK_INTERVAL")]
    pub check_interval: Option<u64>,

    /// Heartbeat age in seconds after which a node is failed
    #[arg(long, env = "KUBESIM_HEARTBEAT_TIMEOUT")]
    pub heartbeat_timeout: Option<u64>,

    /// How node compute is provisioned
    #[arg(long, value_enum, env = "KUBESIM_PROVISIONER")]
    pub provisioner: Option<ProvisionerKind>,

    /// Image for docker-provisioned nodes
    #[arg(long, env = "KUBESIM_DOCKER_IMAGE")]
    pub docker_image: Option<String>,
}

impl ServeArgs {
    /// Apply the flags that were given on top of `config`
    pub fn apply(&self, config: &mut ClusterConfig) {
        if let Some(bind_addr) = &self.bind_addr {
            config.bind_addr = bind_addr.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.check_interval {
            config.check_interval_secs = secs;
        }
        if let Some(secs) = self.heartbeat_timeout {
            config.heartbeat_timeout_secs = secs;
        }
        if let Some(kind) = self.provisioner {
            config.provisioner = kind;
        }
        if let Some(image) = &self.docker_image {
            config.docker.image = image.clone();
        }
    }
}

/// Arguments for the agent command
#[derive(Parser, Debug)]
pub struct AgentArgs {
    /// Node to send heartbeats for (e.g. N1)
    #[arg(long)]
    pub node_id: NodeId,

    /// Heartbeat interval in seconds
    #[arg(long, default_value_t = HEARTBEAT_INTERVAL_SECS)]
    pub interval: u64,
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Resource type to list
    #[command(subcommand)]
    pub resource: GetResource,
}

#[derive(Subcommand, Debug)]
pub enum GetResource {
    /// List nodes
    #[command(name = "nodes", visible_alias = "node", visible_alias = "no")]
    Nodes,

    /// List pods
    #[command(name = "pods", visible_alias = "pod", visible_alias = "po")]
    Pods,
}

/// Arguments for the node command
#[derive(Parser, Debug)]
pub struct NodeArgs {
    #[command(subcommand)]
    pub action: NodeAction,
}

#[derive(Subcommand, Debug)]
pub enum NodeAction {
    /// Add a node with the given CPU capacity
    Add {
        /// CPU cores
        #[arg(long)]
        cpu: f64,

        /// cpuset hint, e.g. "0-3"
        #[arg(long)]
        affinity: Option<String>,
    },

    /// Mark a node as failed and reschedule its pods
    Fail {
        /// Node id
        node_id: NodeId,
    },

    /// Send a single heartbeat for a node
    Heartbeat {
        /// Node id
        node_id: NodeId,
    },
}

/// Arguments for the pod command
#[derive(Parser, Debug)]
pub struct PodArgs {
    #[command(subcommand)]
    pub action: PodAction,
}

#[derive(Subcommand, Debug)]
pub enum PodAction {
    /// Request a pod with the given CPU requirement
    Request {
        /// CPU cores
        #[arg(long)]
        cpu: f64,
    },

    /// Remove a pod
    Remove {
        /// Pod id
        pod_id: PodId,
    },

    /// Retry placement of pending pods
    Reschedule,
}
