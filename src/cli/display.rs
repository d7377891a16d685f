//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use crate::cluster::api::{NodesResponse, PodsResponse, RescheduleResponse};
use crate::cluster::ClusterSummary;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

fn format_cpu(cpu: f64) -> String {
    let rounded = format!("{:.2}", cpu);
    rounded
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Heartbeat freshness label: ok under 10 s, late under 15 s, stale after
pub fn heartbeat_health(age_secs: f64) -> &'static str {
    if age_secs < 10.0 {
        "ok"
    } else if age_secs < 15.0 {
        "late"
    } else {
        "stale"
    }
}

// ============================================================================
// Resource display
// ============================================================================

/// Format node list for display
pub fn format_node_list(response: &NodesResponse) -> String {
    let headers = &["ID", "STATUS", "CPU", "USED", "FREE", "PODS", "HEARTBEAT", "CONTAINER"];
    let rows = response
        .nodes
        .iter()
        .map(|(id, node)| {
            vec![
                id.to_string(),
                node.status.to_string(),
                format_cpu(node.cpu_cores),
                format_cpu(node.used_cpu),
                format_cpu(node.available_cpu),
                node.pods.len().to_string(),
                format!(
                    "{:.1}s ({})",
                    node.heartbeat_age,
                    heartbeat_health(node.heartbeat_age)
                ),
                node.container_id.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format pod list for display
pub fn format_pod_list(response: &PodsResponse) -> String {
    let headers = &["ID", "STATUS", "CPU", "NODE"];
    let rows = response
        .pods
        .iter()
        .map(|(id, pod)| {
            vec![
                id.to_string(),
                pod.status.to_string(),
                format_cpu(pod.cpu_cores),
                pod.node_id
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format the outcome of a failure or reschedule request
pub fn format_reschedule(response: &RescheduleResponse) -> String {
    let mut output = format!("{}\n", response.message);
    for placement in &response.rescheduled {
        output.push_str(&format!(
            "  rescheduled {} -> {}\n",
            placement.pod_id, placement.node_id
        ));
    }
    for pod in &response.pending {
        output.push_str(&format!("  pending     {}\n", pod));
    }
    output
}

// ============================================================================
// Cluster status display
// ============================================================================

/// Format cluster status for display
pub fn format_cluster_status(summary: &ClusterSummary) -> String {
    let mut output = String::new();

    output.push_str("Cluster Status\n");
    output.push_str("==============\n\n");
    output.push_str(&format!(
        "Nodes:       {} active, {} failed\n",
        summary.active_nodes, summary.failed_nodes
    ));
    output.push_str(&format!(
        "Pods:        {} total ({} running, {} pending)\n",
        summary.total_pods, summary.running_pods, summary.pending_pods
    ));
    output.push_str(&format!(
        "CPU:         {} / {} used, {} available\n",
        format_cpu(summary.used_cpu),
        format_cpu(summary.total_cpu),
        format_cpu(summary.available_cpu)
    ));
    output.push_str(&format!(
        "Utilization: {:.1}%\n",
        summary.utilization_percentage
    ));

    output
}
