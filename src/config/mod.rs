//! Control plane configuration
//!
//! Read from a YAML file (default `~/.kubesim/config.yaml`). A missing
//! file means defaults; command-line flags and `KUBESIM_*` variables are
//! applied on top by the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{
    DetectorConfig, DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_CONTROL_PLANE_PORT,
    DEFAULT_HEARTBEAT_TIMEOUT_SECS,
};
use crate::provision::{DockerConfig, DockerProvisioner, Provisioner, SimulatedProvisioner};

/// Default config file location: ~/.kubesim/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kubesim")
        .join("config.yaml")
}

/// Expand `~` and `$VAR` in a user-supplied path
pub fn expand_path(raw: &str) -> Result<PathBuf, ConfigError> {
    shellexpand::full(raw)
        .map(|p| PathBuf::from(p.as_ref()))
        .map_err(|e| ConfigError::Invalid(format!("cannot expand '{}': {}", raw, e)))
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How node compute is provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionerKind {
    #[default]
    Simulated,
    Docker,
}

/// The complete configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_bind_address")]
    pub bind_addr: String,

    #[serde(default = "default_control_plane_port")]
    pub port: u16,

    /// Seconds between failure detector passes
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Heartbeat age in seconds after which a node is failed
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default)]
    pub provisioner: ProvisionerKind,

    #[serde(default)]
    pub docker: DockerConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_address(),
            port: DEFAULT_CONTROL_PLANE_PORT,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            provisioner: ProvisionerKind::default(),
            docker: DockerConfig::default(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_control_plane_port() -> u16 {
    DEFAULT_CONTROL_PLANE_PORT
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_heartbeat_timeout() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_SECS
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "check_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if chrono::Duration::from_std(Duration::from_secs(self.heartbeat_timeout_secs)).is_err() {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_timeout_secs {} is out of range",
                self.heartbeat_timeout_secs
            )));
        }
        if self.docker.image.trim().is_empty() {
            return Err(ConfigError::Invalid("docker.image must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Build the configured provisioner
    pub fn build_provisioner(&self) -> Arc<dyn Provisioner> {
        match self.provisioner {
            ProvisionerKind::Simulated => Arc::new(SimulatedProvisioner::new()),
            ProvisionerKind::Docker => Arc::new(DockerProvisioner::new(self.docker.clone())),
        }
    }
}

// ============================================================================
// Pure parsing
// ============================================================================

/// Parse and validate config from a YAML string
pub fn parse_config(content: &str) -> Result<ClusterConfig, ConfigError> {
    let config: ClusterConfig =
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from the default location
pub fn load_config() -> Result<ClusterConfig, ConfigError> {
    load_config_from(&default_config_path())
}

/// Load config from a specific path; a missing file yields defaults
pub fn load_config_from(path: &Path) -> Result<ClusterConfig, ConfigError> {
    if !path.exists() {
        return Ok(ClusterConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.check_interval_secs, 5);
        assert_eq!(config.heartbeat_timeout_secs, 15);
        assert_eq!(config.provisioner, ProvisionerKind::Simulated);
        assert_eq!(config.docker.image, "python:3.8-slim");
        assert_eq!(config.listen_addr(), "0.0.0.0:5000");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = parse_config("port: 6000\nprovisioner: docker\ndocker:\n  image: alpine\n").unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.provisioner, ProvisionerKind::Docker);
        assert_eq!(config.docker.image, "alpine");
        assert_eq!(config.docker.name_prefix, "node_");
        assert_eq!(config.heartbeat_timeout_secs, 15);
    }

    #[test]
    fn test_zero_durations_rejected() {
        assert!(matches!(
            parse_config("check_interval_secs: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("heartbeat_timeout_secs: 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_out_of_range_heartbeat_timeout_rejected() {
        let config = ClusterConfig {
            heartbeat_timeout_secs: u64::MAX,
            ..ClusterConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ClusterConfig {
            heartbeat_timeout_secs: 86_400 * 365,
            ..ClusterConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_provisioner_is_a_parse_error() {
        assert!(matches!(
            parse_config("provisioner: kubernetes"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let file = create_temp_file("heartbeat_timeout_secs: 30\n");
        let config = load_config_from(file.path()).unwrap();

        assert_eq!(config.heartbeat_timeout_secs, 30);
        assert_eq!(
            config.detector_config().heartbeat_timeout,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config_from(Path::new("/nonexistent/kubesim.yaml")).unwrap();
        assert_eq!(config, ClusterConfig::default());
    }

    #[test]
    fn test_expand_path() {
        let expanded = expand_path("/tmp/kubesim.yaml").unwrap();
        assert_eq!(expanded, PathBuf::from("/tmp/kubesim.yaml"));
    }

    #[test]
    fn test_build_provisioner() {
        let mut config = ClusterConfig::default();
        assert_eq!(config.build_provisioner().name(), "simulated");

        config.provisioner = ProvisionerKind::Docker;
        assert_eq!(config.build_provisioner().name(), "docker");
    }
}
