//! Nodes and their per-neighbor ports.

use std::fmt;

/// A bridge identifier.
///
/// Ids are totally ordered; the smallest id in a connected component wins
/// the root election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct NodeId(pub u32);

impl NodeId {
    /// Smallest id handed out by [`Topology::create_node`](crate::Topology::create_node).
    ///
    /// Id 1 is reserved and never auto-assigned.
    pub const FIRST_ASSIGNED: NodeId = NodeId(2);

    /// Raw integer value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

/// Port number local to one node, assigned in creation order.
pub type PortNumber = usize;

/// Forwarding role of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortStatus {
    /// Excluded from the spanning tree
    #[default]
    Blocked,
    /// Forwarding, role not yet derived
    Unblocked,
    /// Carries this node's path toward the root
    RootPort,
    /// Carries traffic toward the root for the neighbor on the other end
    DesignatedPort,
}

impl PortStatus {
    /// Whether traffic flows through a port in this state.
    pub const fn is_forwarding(self) -> bool {
        !matches!(self, PortStatus::Blocked)
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked => write!(f, "Blocked"),
            Self::Unblocked => write!(f, "Unblocked"),
            Self::RootPort => write!(f, "RootPort"),
            Self::DesignatedPort => write!(f, "DesignatedPort"),
        }
    }
}

/// One end of a link, owned by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Port {
    pub port_number: PortNumber,
    pub target_id: NodeId,
    pub status: PortStatus,
}

/// A node in the topology together with its last recorded election belief.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Node {
    pub id: NodeId,
    /// Canvas position, only used for rendering
    pub x: f64,
    pub y: f64,
    pub ports: Vec<Port>,
    pub root_id: NodeId,
    pub hop_count: u32,
    pub next_hop: NodeId,
    #[cfg_attr(feature = "serde", serde(skip))]
    next_port: PortNumber,
}

impl Node {
    /// A fresh node claiming itself as root.
    pub fn new(id: NodeId, x: f64, y: f64) -> Self {
        Self {
            id,
            x,
            y,
            ports: Vec::new(),
            root_id: id,
            hop_count: 0,
            next_hop: id,
            next_port: 0,
        }
    }

    /// The port facing `target`, if any.
    pub fn port_toward(&self, target: NodeId) -> Option<&Port> {
        self.ports.iter().find(|p| p.target_id == target)
    }

    /// Look up a port by number.
    pub fn port(&self, port_number: PortNumber) -> Option<&Port> {
        self.ports.iter().find(|p| p.port_number == port_number)
    }

    pub(crate) fn port_mut(&mut self, port_number: PortNumber) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.port_number == port_number)
    }

    /// Neighbor ids in port order.
    pub fn neighbors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ports.iter().map(|p| p.target_id)
    }

    /// Whether the node still holds its initial self-claim.
    pub fn claims_root(&self) -> bool {
        self.root_id == self.id
    }

    /// Find or create the port facing `target`. New ports start `Blocked`.
    ///
    /// Returns the port number and whether it was newly created.
    pub(crate) fn get_or_create_port(&mut self, target: NodeId) -> (PortNumber, bool) {
        if let Some(port) = self.port_toward(target) {
            return (port.port_number, false);
        }
        // Deserialized nodes lose the counter; never hand out a live number.
        let floor = self.ports.iter().map(|p| p.port_number + 1).max().unwrap_or(0);
        let port_number = self.next_port.max(floor);
        self.next_port = port_number + 1;
        self.ports.push(Port {
            port_number,
            target_id: target,
            status: PortStatus::Blocked,
        });
        (port_number, true)
    }

    /// Remove the port facing `target`, returning its number.
    pub(crate) fn remove_port_toward(&mut self, target: NodeId) -> Option<PortNumber> {
        let index = self.ports.iter().position(|p| p.target_id == target)?;
        Some(self.ports.remove(index).port_number)
    }
}
