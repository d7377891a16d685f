//! Heartbeat agent for nodes
//!
//! A background task that periodically tells the control plane a node is
//! still alive. The control plane only consumes the timestamp; this agent
//! exists so a node's liveness can be driven from outside the server.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::api::MessageResponse;
use super::node::NodeId;
use super::HEARTBEAT_INTERVAL_SECS;

/// Configuration for the heartbeat agent
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Control plane URL (e.g., "http://localhost:5000")
    pub control_plane_url: String,

    /// Node this agent speaks for
    pub node_id: NodeId,

    /// Heartbeat interval in seconds
    pub interval_secs: u64,

    /// Consecutive failures before errors are logged at error level
    pub max_retries: u32,
}

impl HeartbeatConfig {
    pub fn new(control_plane_url: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            control_plane_url: control_plane_url.into(),
            node_id,
            interval_secs: HEARTBEAT_INTERVAL_SECS,
            max_retries: 3,
        }
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    fn heartbeat_url(&self) -> String {
        format!(
            "{}/node/heartbeat/{}",
            self.control_plane_url.trim_end_matches('/'),
            self.node_id
        )
    }
}

/// Errors that can occur during heartbeat
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Node {0} is unknown to the control plane")]
    UnknownNode(NodeId),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },
}

/// Heartbeat client that runs as a background task
pub struct HeartbeatClient {
    config: HeartbeatConfig,
    http_client: Client,
}

impl HeartbeatClient {
    pub fn new(config: HeartbeatConfig) -> Result<Self, HeartbeatError> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Run the heartbeat loop until shutdown or until the node is unknown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_secs);
        let mut consecutive_failures = 0u32;

        info!(
            "Starting heartbeat agent: node={}, control_plane={}, interval={}s",
            self.config.node_id, self.config.control_plane_url, self.config.interval_secs
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.send_heartbeat().await {
                        Ok(message) => {
                            if consecutive_failures > 0 {
                                info!("Heartbeat recovered after {} failures", consecutive_failures);
                            }
                            consecutive_failures = 0;
                            debug!("{}", message);
                        }
                        Err(HeartbeatError::UnknownNode(id)) => {
                            error!("Node {} is not registered, stopping heartbeat agent", id);
                            break;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            if consecutive_failures >= self.config.max_retries {
                                error!(
                                    "Heartbeat failed {} consecutive times: {}",
                                    consecutive_failures, e
                                );
                            } else {
                                warn!("Heartbeat failed (attempt {}): {}", consecutive_failures, e);
                            }
                        }
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("Heartbeat agent shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Send a single heartbeat; returns the control plane's message
    pub async fn send_heartbeat(&self) -> Result<String, HeartbeatError> {
        let response = self
            .http_client
            .post(self.config.heartbeat_url())
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let body: MessageResponse = response.json().await?;
                Ok(body.message)
            }
            StatusCode::NOT_FOUND => Err(HeartbeatError::UnknownNode(self.config.node_id)),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(HeartbeatError::ServerError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

/// Spawn the heartbeat agent as a background task
///
/// Returns a shutdown sender that can be used to stop the loop.
pub fn spawn_heartbeat(config: HeartbeatConfig) -> Result<watch::Sender<bool>, HeartbeatError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let client = HeartbeatClient::new(config)?;

    tokio::spawn(async move {
        client.run(shutdown_rx).await;
    });

    Ok(shutdown_tx)
}
