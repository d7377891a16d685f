//! Control Plane API Server
//!
//! Provides REST endpoints for managing the cluster:
//! - Nodes: add, list, heartbeat, fail
//! - Pods: request, list, remove, reschedule pending
//! - Status: cluster summary and liveness
//!
//! Request and response bodies are public so the CLI client can reuse them.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::controller::{ClusterController, FailNodeOutcome};
use super::node::{Node, NodeId, NodeStatus, PodId, PodStatus};
use super::rescheduler::{Placement, RescheduleReport};
use super::store::{ClusterError, ClusterSummary};

/// Shared state for the control plane API
#[derive(Clone)]
pub struct ControlPlaneState {
    pub controller: Arc<ClusterController>,
}

impl ControlPlaneState {
    pub fn new() -> Self {
        Self {
            controller: Arc::new(ClusterController::new()),
        }
    }

    pub fn with_controller(controller: Arc<ClusterController>) -> Self {
        Self { controller }
    }
}

impl Default for ControlPlaneState {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the control plane router
pub fn create_control_plane_router(state: ControlPlaneState) -> Router {
    Router::new()
        // Liveness
        .route("/", get(index))
        .route("/health", get(health_check))
        // Nodes
        .route("/node/add", post(add_node))
        .route("/nodes", get(list_nodes))
        .route("/node/heartbeat/{node_id}", post(node_heartbeat))
        .route("/node/fail/{node_id}", post(fail_node))
        // Pods
        .route("/pod/request", post(request_pod))
        .route("/pod/remove/{pod_id}", delete(remove_pod))
        .route("/pods", get(list_pods))
        .route("/pods/reschedule", post(reschedule_pods))
        // Status
        .route("/cluster/status", get(cluster_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Error body returned by every failing route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ClusterError {
    fn into_response(self) -> Response {
        let status = match &self {
            ClusterError::Validation(_) | ClusterError::Unschedulable { .. } => {
                StatusCode::BAD_REQUEST
            }
            ClusterError::NodeNotFound(_) | ClusterError::PodNotFound(_) => StatusCode::NOT_FOUND,
            ClusterError::AlreadyFailed(_) | ClusterError::NodeNotActive(_) => StatusCode::CONFLICT,
            ClusterError::CapacityExceeded { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ClusterError::Provision(_) => StatusCode::BAD_GATEWAY,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ClusterError> {
    body.map(|Json(value)| value)
        .map_err(|e| ClusterError::Validation(e.body_text()))
}

fn parse_node_id(raw: &str) -> Result<NodeId, ClusterError> {
    raw.parse()
        .map_err(|_| ClusterError::NodeNotFound(raw.to_string()))
}

fn parse_pod_id(raw: &str) -> Result<PodId, ClusterError> {
    raw.parse()
        .map_err(|_| ClusterError::PodNotFound(raw.to_string()))
}

// ============================================================================
// Wire Types
// ============================================================================

/// A CPU amount sent either as a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CpuValue {
    Number(f64),
    Text(String),
}

impl CpuValue {
    pub fn to_cpu(&self) -> Result<f64, ClusterError> {
        match self {
            CpuValue::Number(n) => Ok(*n),
            CpuValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                ClusterError::Validation(format!("cpu_cores '{}' is not a number", s))
            }),
        }
    }
}

impl From<f64> for CpuValue {
    fn from(value: f64) -> Self {
        CpuValue::Number(value)
    }
}

fn required_cpu(value: Option<&CpuValue>) -> Result<f64, ClusterError> {
    value
        .ok_or_else(|| ClusterError::Validation("CPU core count is required".to_string()))?
        .to_cpu()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddNodeRequest {
    #[serde(default, alias = "cpu", skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<CpuValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_affinity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNodeResponse {
    pub message: String,
    pub node_id: NodeId,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodRequest {
    #[serde(default, alias = "cpu", skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<CpuValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRequestResponse {
    pub message: String,
    pub pod_id: PodId,
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// A pod as listed under its node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePodEntry {
    pub pod_id: PodId,
    pub cpu_cores: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    pub container_id: Option<String>,
    pub cpu_cores: f64,
    pub cpu_affinity: Option<String>,
    pub status: NodeStatus,
    pub pods: Vec<NodePodEntry>,
    /// Seconds since the last heartbeat
    pub heartbeat_age: f64,
    pub used_cpu: f64,
    pub available_cpu: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: BTreeMap<NodeId, NodeView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodView {
    pub node_id: Option<NodeId>,
    pub cpu_cores: f64,
    pub status: PodStatus,
    /// Unix seconds
    pub created_at: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodsResponse {
    pub pods: BTreeMap<PodId, PodView>,
}

/// Result of a failure transition or an explicit reschedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleResponse {
    pub message: String,
    pub rescheduled: Vec<Placement>,
    pub pending: Vec<PodId>,
}

impl RescheduleResponse {
    fn new(message: String, report: RescheduleReport) -> Self {
        Self {
            message,
            rescheduled: report.rescheduled,
            pending: report.pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub status: String,
    pub message: String,
}

// ============================================================================
// Health & Status
// ============================================================================

async fn index(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(IndexResponse {
        status: "ok".to_string(),
        message: format!(
            "kubesim control plane ({} provisioner)",
            state.controller.provisioner_name()
        ),
    })
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn cluster_status(State(state): State<ControlPlaneState>) -> Json<ClusterSummary> {
    Json(state.controller.summary())
}

// ============================================================================
// Node Endpoints
// ============================================================================

async fn add_node(
    State(state): State<ControlPlaneState>,
    body: Result<Json<AddNodeRequest>, JsonRejection>,
) -> Result<Json<AddNodeResponse>, ClusterError> {
    let request = parse_body(body)?;
    let cpu = required_cpu(request.cpu_cores.as_ref())?;

    let node_id = state
        .controller
        .add_node(cpu, request.cpu_affinity.as_deref())
        .await?;

    Ok(Json(AddNodeResponse {
        message: format!("Node {} added successfully", node_id),
        node_id,
        status: NodeStatus::Active,
    }))
}

async fn list_nodes(State(state): State<ControlPlaneState>) -> Json<NodesResponse> {
    let snapshot = state.controller.snapshot();
    let now = snapshot.taken_at;

    let nodes = snapshot
        .nodes
        .iter()
        .map(|node| {
            let used_cpu = snapshot.used_cpu(node);
            let view = node_view(node, &snapshot.pods, used_cpu, now);
            (node.id, view)
        })
        .collect();

    Json(NodesResponse { nodes })
}

fn node_view(
    node: &Node,
    pods: &BTreeMap<PodId, super::node::Pod>,
    used_cpu: f64,
    now: chrono::DateTime<Utc>,
) -> NodeView {
    NodeView {
        container_id: node.provision_handle.as_ref().map(|h| h.to_string()),
        cpu_cores: node.capacity_cpu,
        cpu_affinity: node.cpu_affinity.clone(),
        status: node.status,
        pods: node
            .assigned_pods
            .iter()
            .filter_map(|id| pods.get(id))
            .map(|pod| NodePodEntry {
                pod_id: pod.id,
                cpu_cores: pod.cpu_requirement,
            })
            .collect(),
        heartbeat_age: node.heartbeat_age(now),
        used_cpu,
        available_cpu: (node.capacity_cpu - used_cpu).max(0.0),
    }
}

async fn node_heartbeat(
    State(state): State<ControlPlaneState>,
    Path(node_id): Path<String>,
) -> Result<Json<MessageResponse>, ClusterError> {
    let node_id = parse_node_id(&node_id)?;

    let message = match state.controller.heartbeat(node_id)? {
        NodeStatus::Active => format!("Heartbeat received from node {}", node_id),
        NodeStatus::Failed => format!("Node {} has failed; heartbeat ignored", node_id),
    };
    Ok(Json(MessageResponse { message }))
}

async fn fail_node(
    State(state): State<ControlPlaneState>,
    Path(node_id): Path<String>,
) -> Result<Json<RescheduleResponse>, ClusterError> {
    let node_id = parse_node_id(&node_id)?;

    let response = match state.controller.fail_node(node_id).await? {
        FailNodeOutcome::Failed(report) => RescheduleResponse::new(
            format!("Node {} marked as failed", node_id),
            report.outcome,
        ),
        FailNodeOutcome::AlreadyFailed => RescheduleResponse::new(
            format!("Node {} already failed", node_id),
            RescheduleReport::default(),
        ),
    };
    Ok(Json(response))
}

// ============================================================================
// Pod Endpoints
// ============================================================================

async fn request_pod(
    State(state): State<ControlPlaneState>,
    body: Result<Json<PodRequest>, JsonRejection>,
) -> Result<Json<PodRequestResponse>, ClusterError> {
    let request = parse_body(body)?;
    let cpu = required_cpu(request.cpu_cores.as_ref())?;

    let (pod_id, node_id) = state.controller.request_pod(cpu)?;

    Ok(Json(PodRequestResponse {
        message: format!("Pod {} scheduled on node {}", pod_id, node_id),
        pod_id,
        node_id,
    }))
}

async fn remove_pod(
    State(state): State<ControlPlaneState>,
    Path(pod_id): Path<String>,
) -> Result<Json<MessageResponse>, ClusterError> {
    let pod_id = parse_pod_id(&pod_id)?;
    state.controller.remove_pod(pod_id)?;

    Ok(Json(MessageResponse {
        message: format!("Pod {} removed", pod_id),
    }))
}

async fn list_pods(State(state): State<ControlPlaneState>) -> Json<PodsResponse> {
    let pods = state
        .controller
        .state()
        .list_pods()
        .into_iter()
        .map(|pod| {
            let view = PodView {
                node_id: pod.node_id,
                cpu_cores: pod.cpu_requirement,
                status: pod.status,
                created_at: pod.created_at_unix(),
            };
            (pod.id, view)
        })
        .collect();

    Json(PodsResponse { pods })
}

async fn reschedule_pods(State(state): State<ControlPlaneState>) -> Json<RescheduleResponse> {
    let report = state.controller.reschedule_pending();
    let message = format!(
        "{} pod(s) rescheduled, {} still pending",
        report.rescheduled.len(),
        report.pending.len()
    );
    Json(RescheduleResponse::new(message, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::provision::SimulatedProvisioner;

    fn create_failing_app() -> (Router, Arc<SimulatedProvisioner>) {
        let provisioner = Arc::new(SimulatedProvisioner::new());
        let controller = Arc::new(ClusterController::with_provisioner(provisioner.clone()));
        let app = create_control_plane_router(ControlPlaneState::with_controller(controller));
        (app, provisioner)
    }

    fn create_test_app() -> (Router, Arc<ClusterController>) {
        let controller = Arc::new(ClusterController::new());
        let app = create_control_plane_router(ControlPlaneState::with_controller(
            controller.clone(),
        ));
        (app, controller)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_index_reports_ok() {
        let (app, _) = create_test_app();
        let (status, body) = send(&app, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_add_node_accepts_number_and_string() {
        let (app, _) = create_test_app();

        let (status, body) = send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 4}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "N1");
        assert_eq!(body["status"], "active");

        let (status, body) = send(&app, "POST", "/node/add", Some(json!({"cpu": "2.5"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "N2");
    }

    #[tokio::test]
    async fn test_add_node_validation() {
        let (app, controller) = create_test_app();

        for bad in [json!({}), json!({"cpu_cores": 0}), json!({"cpu_cores": "lots"})] {
            let (status, body) = send(&app, "POST", "/node/add", Some(bad)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].is_string());
        }
        assert!(controller.state().list_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_add_node_provision_failure_is_bad_gateway() {
        let (app, provisioner) = create_failing_app();
        provisioner.fail_next();

        let (status, body) = send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 4}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].is_string());

        let (_, nodes) = send(&app, "GET", "/nodes", None).await;
        assert!(nodes["nodes"].as_object().unwrap().is_empty());

        let (status, body) = send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 4}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "N2");
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_validation_error() {
        let (app, _) = create_test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/pod/request")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_nodes_shape() {
        let (app, _) = create_test_app();
        send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 4, "cpu_affinity": "0-3"}))).await;
        let (_, pod) = send(&app, "POST", "/pod/request", Some(json!({"cpu_cores": 1.5}))).await;

        let (status, body) = send(&app, "GET", "/nodes", None).await;
        assert_eq!(status, StatusCode::OK);

        let node = &body["nodes"]["N1"];
        assert_eq!(node["container_id"], "sim-N1");
        assert_eq!(node["cpu_cores"], 4.0);
        assert_eq!(node["cpu_affinity"], "0-3");
        assert_eq!(node["status"], "active");
        assert_eq!(node["used_cpu"], 1.5);
        assert_eq!(node["available_cpu"], 2.5);
        assert_eq!(node["pods"][0]["pod_id"], pod["pod_id"]);
        assert!(node["heartbeat_age"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_pod_request_unschedulable() {
        let (app, controller) = create_test_app();
        send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 2}))).await;

        let (status, body) = send(&app, "POST", "/pod/request", Some(json!({"cpu_cores": 3}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("3"));
        assert!(controller.state().list_pods().is_empty());
    }

    #[tokio::test]
    async fn test_list_pods_shape() {
        let (app, _) = create_test_app();
        send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 2}))).await;
        let (_, created) = send(&app, "POST", "/pod/request", Some(json!({"cpu_cores": 1}))).await;

        let (_, body) = send(&app, "GET", "/pods", None).await;
        let pod_id = created["pod_id"].as_str().unwrap();
        let pod = &body["pods"][pod_id];

        assert_eq!(pod["node_id"], "N1");
        assert_eq!(pod["cpu_cores"], 1.0);
        assert_eq!(pod["status"], "running");
        assert!(pod["created_at"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_remove_pod() {
        let (app, _) = create_test_app();
        send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 2}))).await;
        let (_, created) = send(&app, "POST", "/pod/request", Some(json!({"cpu_cores": 1}))).await;
        let uri = format!("/pod/remove/{}", created["pod_id"].as_str().unwrap());

        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let (app, _) = create_test_app();

        let (status, _) = send(&app, "POST", "/node/heartbeat/N9", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "POST", "/node/fail/garbage", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "DELETE", "/pod/remove/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fail_node_reschedules() {
        let (app, _) = create_test_app();
        send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 4}))).await;
        send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 4}))).await;
        let (_, pod) = send(&app, "POST", "/pod/request", Some(json!({"cpu_cores": 2}))).await;
        assert_eq!(pod["node_id"], "N1");

        let (status, body) = send(&app, "POST", "/node/fail/N1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rescheduled"][0]["pod_id"], pod["pod_id"]);
        assert_eq!(body["rescheduled"][0]["node_id"], "N2");

        let (status, body) = send(&app, "POST", "/node/fail/N1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("already failed"));

        let (status, _) = send(&app, "POST", "/node/heartbeat/N1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, nodes) = send(&app, "GET", "/nodes", None).await;
        assert_eq!(nodes["nodes"]["N1"]["status"], "failed");
    }

    #[tokio::test]
    async fn test_reschedule_route_places_pending_pods() {
        let (app, _) = create_test_app();
        send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 2}))).await;
        send(&app, "POST", "/pod/request", Some(json!({"cpu_cores": 2}))).await;
        let (_, body) = send(&app, "POST", "/node/fail/N1", None).await;
        assert_eq!(body["pending"].as_array().unwrap().len(), 1);

        send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 2}))).await;
        let (status, body) = send(&app, "POST", "/pods/reschedule", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rescheduled"][0]["node_id"], "N2");
        assert!(body["pending"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cluster_status() {
        let (app, _) = create_test_app();
        send(&app, "POST", "/node/add", Some(json!({"cpu_cores": 4}))).await;
        send(&app, "POST", "/pod/request", Some(json!({"cpu_cores": 1}))).await;

        let (status, body) = send(&app, "GET", "/cluster/status", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active_nodes"], 1);
        assert_eq!(body["total_pods"], 1);
        assert_eq!(body["used_cpu"], 1.0);
        assert_eq!(body["available_cpu"], 3.0);
        assert_eq!(body["utilization_percentage"], 25.0);
    }
}
