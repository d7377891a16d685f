//! Command implementations for the CLI
//!
//! SBIO pattern: the client returns typed Results, printing is handled by
//! the caller.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::cluster::api::{
    AddNodeRequest, AddNodeResponse, CpuValue, ErrorResponse, MessageResponse, NodesResponse,
    PodRequest, PodRequestResponse, PodsResponse, RescheduleResponse,
};
use crate::cluster::{ClusterSummary, NodeId, PodId};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error: {0}")]
    Server(String),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

/// HTTP client for the control plane API
pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, &url)
    }

    /// Send a request and decode the body, turning `{"error"}` bodies into
    /// `CommandError::Server`
    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> CommandResult<T> {
        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&bytes)
                .map(|e| e.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return Err(CommandError::Server(format!("{} ({})", message, status)));
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> CommandResult<T> {
        self.send(self.build_request(reqwest::Method::GET, path))
            .await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> CommandResult<T> {
        let mut req = self.build_request(reqwest::Method::POST, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        self.send(req).await
    }

    /// Get cluster status
    pub async fn status(&self) -> CommandResult<ClusterSummary> {
        self.get("/cluster/status").await
    }

    pub async fn list_nodes(&self) -> CommandResult<NodesResponse> {
        self.get("/nodes").await
    }

    pub async fn list_pods(&self) -> CommandResult<PodsResponse> {
        self.get("/pods").await
    }

    pub async fn add_node(
        &self,
        cpu: f64,
        affinity: Option<String>,
    ) -> CommandResult<AddNodeResponse> {
        let body = AddNodeRequest {
            cpu_cores: Some(CpuValue::from(cpu)),
            cpu_affinity: affinity,
        };
        self.post("/node/add", Some(&body)).await
    }

    pub async fn fail_node(&self, node_id: NodeId) -> CommandResult<RescheduleResponse> {
        self.post::<(), _>(&format!("/node/fail/{}", node_id), None)
            .await
    }

    pub async fn heartbeat(&self, node_id: NodeId) -> CommandResult<MessageResponse> {
        self.post::<(), _>(&format!("/node/heartbeat/{}", node_id), None)
            .await
    }

    pub async fn request_pod(&self, cpu: f64) -> CommandResult<PodRequestResponse> {
        let body = PodRequest {
            cpu_cores: Some(CpuValue::from(cpu)),
        };
        self.post("/pod/request", Some(&body)).await
    }

    pub async fn remove_pod(&self, pod_id: PodId) -> CommandResult<MessageResponse> {
        self.send(self.build_request(reqwest::Method::DELETE, &format!("/pod/remove/{}", pod_id)))
            .await
    }

    pub async fn reschedule(&self) -> CommandResult<RescheduleResponse> {
        self.post::<(), _>("/pods/reschedule", None).await
    }
}
