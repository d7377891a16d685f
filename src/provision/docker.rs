//! Docker-backed node provisioning
//!
//! Each node is a detached, idle container whose CPU quota matches the
//! node's capacity. Argument generation is kept pure so it can be tested
//! without a Docker daemon.

use std::process::Stdio;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ProvisionError, ProvisionHandle, ProvisionRequest, Provisioner};

/// Docker provisioner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Image every node container runs
    #[serde(default = "default_image")]
    pub image: String,

    /// Container name prefix; the node id is appended
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Docker CLI binary
    #[serde(default = "default_binary")]
    pub binary: String,
}

fn default_image() -> String {
    "python:3.8-slim".to_string()
}

fn default_name_prefix() -> String {
    "node_".to_string()
}

fn default_binary() -> String {
    "docker".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            name_prefix: default_name_prefix(),
            binary: default_binary(),
        }
    }
}

impl DockerConfig {
    /// Container name for a node
    pub fn container_name(&self, request: &ProvisionRequest) -> String {
        format!("{}{}", self.name_prefix, request.node_id)
    }
}

/// Generate `docker run` arguments for a node container
pub fn generate_run_args(config: &DockerConfig, request: &ProvisionRequest) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-dit".to_string(),
        "--name".to_string(),
        config.container_name(request),
        "--cpus".to_string(),
        request.cpu.to_string(),
    ];

    if let Some(affinity) = &request.affinity {
        args.push("--cpuset-cpus".to_string());
        args.push(affinity.clone());
    }

    args.push(config.image.clone());
    args.push("bash".to_string());
    args
}

/// Generate `docker rm -f` arguments
pub fn generate_rm_args(container: &str) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), container.to_string()]
}

/// Provisioner that launches one container per node
pub struct DockerProvisioner {
    config: DockerConfig,
    /// Container id -> container name
    containers: DashMap<String, String>,
}

impl DockerProvisioner {
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config,
            containers: DashMap::new(),
        }
    }

    async fn docker(&self, args: &[String]) -> Result<std::process::Output, ProvisionError> {
        debug!("{} {:?}", self.config.binary, args);
        Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ProvisionError::Unavailable(format!("failed to run {}: {}", self.config.binary, e))
            })
    }
}

#[async_trait]
impl Provisioner for DockerProvisioner {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionHandle, ProvisionError> {
        let name = self.config.container_name(request);
        let output = self.docker(&generate_run_args(&self.config, request)).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::LaunchFailed(format!(
                "docker run {} failed: {}",
                name,
                stderr.trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(ProvisionError::LaunchFailed(format!(
                "docker run {} returned no container id",
                name
            )));
        }

        info!("Started container {} ({}) for node {}", name, container_id, request.node_id);
        self.containers.insert(container_id.clone(), name);
        Ok(ProvisionHandle::new(container_id))
    }

    async fn deprovision(&self, handle: &ProvisionHandle) -> Result<(), ProvisionError> {
        let target = self
            .containers
            .remove(handle.as_str())
            .map(|(_, name)| name)
            .unwrap_or_else(|| handle.to_string());

        let output = self.docker(&generate_rm_args(&target)).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("docker rm {} failed: {}", target, stderr.trim());
            return Err(ProvisionError::LaunchFailed(stderr.trim().to_string()));
        }

        info!("Removed container {}", target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeId;

    fn request(affinity: Option<&str>) -> ProvisionRequest {
        ProvisionRequest {
            node_id: NodeId::new(4),
            cpu: 2.5,
            affinity: affinity.map(str::to_string),
        }
    }

    #[test]
    fn test_run_args_without_affinity() {
        let args = generate_run_args(&DockerConfig::default(), &request(None));
        assert_eq!(
            args,
            vec![
                "run",
                "-dit",
                "--name",
                "node_N4",
                "--cpus",
                "2.5",
                "python:3.8-slim",
                "bash"
            ]
        );
    }

    #[test]
    fn test_run_args_with_affinity() {
        let args = generate_run_args(&DockerConfig::default(), &request(Some("0-1")));
        let pos = args.iter().position(|a| a == "--cpuset-cpus").unwrap();
        assert_eq!(args[pos + 1], "0-1");
        assert_eq!(args.last().map(String::as_str), Some("bash"));
    }

    #[test]
    fn test_rm_args() {
        assert_eq!(generate_rm_args("node_N1"), vec!["rm", "-f", "node_N1"]);
    }

    #[test]
    fn test_config_defaults_from_empty_yaml() {
        let config: DockerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, DockerConfig::default());
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let provisioner = DockerProvisioner::new(DockerConfig {
            binary: "/nonexistent/kubesim-docker".to_string(),
            ..DockerConfig::default()
        });

        let result = provisioner.provision(&request(None)).await;
        assert!(matches!(result, Err(ProvisionError::Unavailable(_))));
    }
}
