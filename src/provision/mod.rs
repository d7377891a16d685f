//! Node provisioning collaborator
//!
//! The control plane does not care how a node's compute comes to exist. It
//! calls a [`Provisioner`] outside its critical section when a node is
//! added, and stores only the opaque [`ProvisionHandle`] it gets back.
//!
//! Two implementations ship with the crate:
//! - [`SimulatedProvisioner`]: in-memory bookkeeping only (the default)
//! - [`DockerProvisioner`]: one detached container per node

pub mod docker;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cluster::NodeId;

pub use docker::{DockerConfig, DockerProvisioner};

/// Errors reported by a provisioner
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Provisioner unavailable: {0}")]
    Unavailable(String),

    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Unknown handle: {0}")]
    UnknownHandle(String),
}

/// Opaque reference to provisioned compute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionHandle(String);

impl ProvisionHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProvisionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a node needs from its provisioner
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub node_id: NodeId,
    pub cpu: f64,
    pub affinity: Option<String>,
}

/// Brings node compute into existence and tears it down again
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn provision(&self, request: &ProvisionRequest)
        -> Result<ProvisionHandle, ProvisionError>;

    async fn deprovision(&self, handle: &ProvisionHandle) -> Result<(), ProvisionError>;
}

/// Provisioner that only records which handles are live
#[derive(Debug, Default)]
pub struct SimulatedProvisioner {
    live: DashMap<ProvisionHandle, NodeId>,
    fail_next: AtomicBool,
}

impl SimulatedProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `provision` call fail
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of handles provisioned and not yet released
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, handle: &ProvisionHandle) -> bool {
        self.live.contains_key(handle)
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionHandle, ProvisionError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ProvisionError::LaunchFailed(format!(
                "simulated failure for node {}",
                request.node_id
            )));
        }

        let handle = ProvisionHandle::new(format!("sim-{}", request.node_id));
        debug!("Simulated node {} provisioned as {}", request.node_id, handle);
        self.live.insert(handle.clone(), request.node_id);
        Ok(handle)
    }

    async fn deprovision(&self, handle: &ProvisionHandle) -> Result<(), ProvisionError> {
        self.live
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| ProvisionError::UnknownHandle(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(n: u64) -> ProvisionRequest {
        ProvisionRequest {
            node_id: NodeId::new(n),
            cpu: 2.0,
            affinity: None,
        }
    }

    #[tokio::test]
    async fn test_simulated_provision_and_release() {
        let provisioner = SimulatedProvisioner::new();

        let handle = provisioner.provision(&request(1)).await.unwrap();
        assert_eq!(handle.as_str(), "sim-N1");
        assert!(provisioner.is_live(&handle));

        provisioner.deprovision(&handle).await.unwrap();
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn test_simulated_fail_next_only_once() {
        let provisioner = SimulatedProvisioner::new();
        provisioner.fail_next();

        let first = provisioner.provision(&request(1)).await;
        assert!(matches!(first, Err(ProvisionError::LaunchFailed(_))));

        let second = provisioner.provision(&request(2)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_deprovision_unknown_handle() {
        let provisioner = SimulatedProvisioner::new();
        let result = provisioner
            .deprovision(&ProvisionHandle::new("sim-N9"))
            .await;
        assert!(matches!(result, Err(ProvisionError::UnknownHandle(_))));
    }
}
