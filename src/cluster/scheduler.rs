//! Best-fit pod placement
//!
//! Placement only decides; it never mutates. The caller applies the
//! decision with [`ClusterStore::place_pod`](super::store::ClusterStore::place_pod)
//! inside the same critical section in which it took the snapshot.
//!
//! Among Active nodes with enough free CPU, the one that would be left
//! with the least unused CPU wins. This packs pods tightly and keeps large
//! free blocks available on other nodes. Ties go to the lowest node id.

use serde::{Deserialize, Serialize};

use super::node::{NodeId, NodeStatus};

/// Tolerance applied to every CPU comparison
///
/// Requests such as 0.1 + 0.2 on a 0.3-core node must fit exactly.
pub const CPU_EPSILON: f64 = 1e-9;

/// CPU load of a single node, as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeLoad {
    pub id: NodeId,
    pub status: NodeStatus,
    pub capacity_cpu: f64,
    pub used_cpu: f64,
}

impl NodeLoad {
    /// Free CPU on this node
    pub fn available(&self) -> f64 {
        self.capacity_cpu - self.used_cpu
    }

    /// Check if a pod requiring `cpu` cores fits on this node
    pub fn fits(&self, cpu: f64) -> bool {
        self.status == NodeStatus::Active && self.available() + CPU_EPSILON >= cpu
    }
}

/// Select the best-fit node for a pod requiring `cpu` cores
///
/// Returns `None` when no Active node has enough free CPU. The result does
/// not depend on the order of `nodes`.
pub fn select_node(cpu: f64, nodes: &[NodeLoad]) -> Option<NodeId> {
    let mut best: Option<(f64, NodeId)> = None;

    for node in nodes.iter().filter(|n| n.fits(cpu)) {
        let leftover = node.available() - cpu;
        let better = match best {
            None => true,
            Some((best_leftover, best_id)) => {
                if (leftover - best_leftover).abs() <= CPU_EPSILON {
                    node.id < best_id
                } else {
                    leftover < best_leftover
                }
            }
        };
        if better {
            best = Some((leftover, node.id));
        }
    }

    best.map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(id: u64, capacity: f64, used: f64) -> NodeLoad {
        NodeLoad {
            id: NodeId::new(id),
            status: NodeStatus::Active,
            capacity_cpu: capacity,
            used_cpu: used,
        }
    }

    #[test]
    fn test_empty_cluster_has_no_candidate() {
        assert_eq!(select_node(1.0, &[]), None);
    }

    #[test]
    fn test_picks_tightest_fit() {
        let nodes = [load(1, 2.0, 0.0), load(2, 5.0, 0.0)];
        assert_eq!(select_node(2.0, &nodes), Some(NodeId::new(1)));
    }

    #[test]
    fn test_skips_nodes_without_room() {
        let nodes = [load(1, 4.0, 3.0), load(2, 8.0, 0.0)];
        assert_eq!(select_node(2.0, &nodes), Some(NodeId::new(2)));
    }

    #[test]
    fn test_skips_failed_nodes() {
        let mut failed = load(1, 2.0, 0.0);
        failed.status = NodeStatus::Failed;
        let nodes = [failed, load(2, 8.0, 0.0)];
        assert_eq!(select_node(2.0, &nodes), Some(NodeId::new(2)));
    }

    #[test]
    fn test_none_when_nothing_fits() {
        let nodes = [load(1, 4.0, 3.5), load(2, 2.0, 0.0)];
        assert_eq!(select_node(3.0, &nodes), None);
    }

    #[test]
    fn test_tie_goes_to_lowest_id_regardless_of_order() {
        let forward = [load(3, 4.0, 0.0), load(7, 4.0, 0.0), load(5, 4.0, 0.0)];
        let mut reversed = forward;
        reversed.reverse();

        assert_eq!(select_node(1.0, &forward), Some(NodeId::new(3)));
        assert_eq!(select_node(1.0, &reversed), Some(NodeId::new(3)));
    }

    #[test]
    fn test_repeated_calls_are_deterministic() {
        let nodes = [load(1, 6.0, 1.0), load(2, 3.0, 0.5), load(3, 9.0, 2.0)];
        let first = select_node(2.0, &nodes);
        for _ in 0..10 {
            assert_eq!(select_node(2.0, &nodes), first);
        }
        assert_eq!(first, Some(NodeId::new(2)));
    }

    #[test]
    fn test_exact_fractional_fill_is_accepted() {
        let nodes = [load(1, 0.3, 0.1)];
        assert_eq!(select_node(0.2, &nodes), Some(NodeId::new(1)));
    }
}
