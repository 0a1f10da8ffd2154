//! Election results: converged beliefs and derived port roles.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use stp_topology::{Link, NodeId, NodeRecord, PortNumber, PortStatus};

/// Role of one port at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortOutcome {
    pub port_number: PortNumber,
    pub target_id: NodeId,
    pub status: PortStatus,
}

/// One node's converged state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutcome {
    pub root_id: NodeId,
    pub hop_count: u32,
    pub next_hop: NodeId,
    /// Port the adopted path runs through; `None` on a root.
    pub root_port: Option<PortNumber>,
    /// Neighbor behind the root port.
    pub upstream: Option<NodeId>,
    /// Timer scheduling failed and the node stays self-as-root.
    pub degraded: bool,
    pub ports: Vec<PortOutcome>,
}

impl NodeOutcome {
    pub fn port_toward(&self, neighbor: NodeId) -> Option<&PortOutcome> {
        self.ports.iter().find(|p| p.target_id == neighbor)
    }
}

/// Per-node outcome of an election run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionResult {
    pub time_ms: u64,
    pub converged: bool,
    pub nodes: BTreeMap<NodeId, NodeOutcome>,
}

impl ElectionResult {
    pub fn node(&self, id: NodeId) -> Option<&NodeOutcome> {
        self.nodes.get(&id)
    }

    /// Distinct roots, one per converged component.
    pub fn roots(&self) -> BTreeSet<NodeId> {
        self.nodes.values().map(|n| n.root_id).collect()
    }

    /// Nodes that believe themselves root.
    pub fn root_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(id, n)| n.root_id == **id)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Edges from every node to its upstream neighbor.
    pub fn tree_edges(&self) -> BTreeSet<Link> {
        self.nodes
            .iter()
            .filter_map(|(id, n)| n.upstream.map(|up| Link::new(*id, up)))
            .collect()
    }

    /// How many ends of `link` are blocked.
    pub fn blocked_sides(&self, link: Link) -> usize {
        let side = |node: NodeId, peer: NodeId| {
            self.node(node)
                .and_then(|n| n.port_toward(peer))
                .is_some_and(|p| p.status == PortStatus::Blocked)
        };
        usize::from(side(link.source, link.target)) + usize::from(side(link.target, link.source))
    }

    /// Whether following upstream pointers from any node ends at a root.
    pub fn is_loop_free(&self) -> bool {
        self.nodes.keys().all(|start| {
            let mut current = *start;
            for _ in 0..=self.nodes.len() {
                match self.nodes.get(&current).and_then(|n| n.upstream) {
                    Some(up) => current = up,
                    None => return true,
                }
            }
            false
        })
    }

    /// Records for [`Topology::record_election`](stp_topology::Topology::record_election).
    pub fn records(&self) -> Vec<NodeRecord> {
        self.nodes
            .iter()
            .map(|(id, n)| NodeRecord {
                id: *id,
                root_id: n.root_id,
                hop_count: n.hop_count,
                next_hop: n.next_hop,
                port_statuses: n.ports.iter().map(|p| (p.port_number, p.status)).collect(),
            })
            .collect()
    }
}
