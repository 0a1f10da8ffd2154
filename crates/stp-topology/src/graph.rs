//! The authoritative node/link graph.
//!
//! Every structural edit returns a [`TopologyChange`] and bumps the
//! generation counter. Election results written back through
//! [`Topology::record_election`] remember the generation they were computed
//! for, so a later election can tell whether those beliefs are still current.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Error, Result};
use crate::link::Link;
use crate::node::{Node, NodeId, PortNumber, PortStatus};

/// A structural edit applied to the topology.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum TopologyChange {
    /// A node was created
    NodeAdded { id: NodeId, x: f64, y: f64 },

    /// A node and every link touching it were removed
    NodeRemoved { id: NodeId, links: Vec<Link> },

    /// A link was created, with the port number on each side
    LinkAdded {
        link: Link,
        source_port: PortNumber,
        target_port: PortNumber,
    },

    /// A link and both of its ports were removed
    LinkRemoved {
        link: Link,
        source_port: PortNumber,
        target_port: PortNumber,
    },
}

/// Converged election state for one node, written back for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub root_id: NodeId,
    pub hop_count: u32,
    pub next_hop: NodeId,
    pub port_statuses: Vec<(PortNumber, PortStatus)>,
}

/// An undirected simple graph of nodes and links.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Topology {
    nodes: BTreeMap<NodeId, Node>,
    links: BTreeSet<Link>,
    generation: u64,
    recorded_generation: Option<u64>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest unused id ≥ 2.
    pub fn next_available_id(&self) -> Result<NodeId> {
        let mut candidate = NodeId::FIRST_ASSIGNED.0;
        // Keys are sorted, so a single pass finds the first gap.
        for id in self.nodes.keys().filter(|id| id.0 >= NodeId::FIRST_ASSIGNED.0) {
            if id.0 != candidate {
                break;
            }
            candidate = candidate.checked_add(1).ok_or(Error::IdSpaceExhausted)?;
        }
        Ok(NodeId(candidate))
    }

    /// Create a node at a canvas position with the smallest unused id.
    pub fn create_node(&mut self, x: f64, y: f64) -> Result<TopologyChange> {
        let id = self.next_available_id()?;
        self.insert_node(id, x, y)
    }

    /// Insert a node with an explicit id (topology imports).
    pub fn insert_node(&mut self, id: NodeId, x: f64, y: f64) -> Result<TopologyChange> {
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateNode(id));
        }
        self.nodes.insert(id, Node::new(id, x, y));
        self.generation += 1;
        Ok(TopologyChange::NodeAdded { id, x, y })
    }

    /// Link two nodes.
    ///
    /// Linking an already-linked pair reuses the existing ports and returns
    /// `Ok(None)`.
    pub fn create_link(&mut self, a: NodeId, b: NodeId) -> Result<Option<TopologyChange>> {
        if a == b {
            return Err(Error::SelfLoop(a));
        }
        self.require(a)?;
        self.require(b)?;

        let link = Link::new(a, b);
        let (source_port, source_new) = self.node_mut(link.source)?.get_or_create_port(link.target);
        let (target_port, target_new) = self.node_mut(link.target)?.get_or_create_port(link.source);
        let link_new = self.links.insert(link);
        debug_assert_eq!(source_new, target_new, "ports must be link-symmetric");

        if !(link_new || source_new || target_new) {
            return Ok(None);
        }
        self.generation += 1;
        Ok(Some(TopologyChange::LinkAdded {
            link,
            source_port,
            target_port,
        }))
    }

    /// Remove the link between two nodes and both of its ports.
    ///
    /// Removing a link that does not exist is a no-op.
    pub fn remove_link(&mut self, a: NodeId, b: NodeId) -> Result<Option<TopologyChange>> {
        self.require(a)?;
        self.require(b)?;

        let link = Link::new(a, b);
        if !self.links.remove(&link) {
            return Ok(None);
        }
        let source_port = self.node_mut(link.source)?.remove_port_toward(link.target);
        let target_port = self.node_mut(link.target)?.remove_port_toward(link.source);
        let (Some(source_port), Some(target_port)) = (source_port, target_port) else {
            unreachable!("link {link:?} had no ports");
        };
        self.generation += 1;
        Ok(Some(TopologyChange::LinkRemoved {
            link,
            source_port,
            target_port,
        }))
    }

    /// Delete a node, its ports, and every link touching it.
    pub fn delete_node(&mut self, id: NodeId) -> Result<TopologyChange> {
        let node = self.nodes.remove(&id).ok_or(Error::NotFound(id))?;

        let links: Vec<Link> = self.links.iter().filter(|l| l.touches(id)).copied().collect();
        for link in &links {
            self.links.remove(link);
        }
        for neighbor in node.neighbors() {
            if let Some(peer) = self.nodes.get_mut(&neighbor) {
                peer.remove_port_toward(id);
            }
        }
        self.generation += 1;
        Ok(TopologyChange::NodeRemoved { id, links })
    }

    /// Store converged beliefs and port roles for display.
    ///
    /// Records the current generation, so [`Topology::beliefs_current`]
    /// reports true until the next structural edit.
    pub fn record_election<I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = NodeRecord>,
    {
        let records: Vec<NodeRecord> = records.into_iter().collect();
        // Validate everything before touching any node.
        for record in &records {
            let node = self.nodes.get(&record.id).ok_or(Error::NotFound(record.id))?;
            for (port, _) in &record.port_statuses {
                if node.port(*port).is_none() {
                    return Err(Error::PortNotFound {
                        node: record.id,
                        port: *port,
                    });
                }
            }
        }
        for record in records {
            let node = self.node_mut(record.id)?;
            node.root_id = record.root_id;
            node.hop_count = record.hop_count;
            node.next_hop = record.next_hop;
            for (port, status) in record.port_statuses {
                if let Some(p) = node.port_mut(port) {
                    p.status = status;
                }
            }
        }
        self.recorded_generation = Some(self.generation);
        Ok(())
    }

    /// Whether stored beliefs were recorded for the current structure.
    pub fn beliefs_current(&self) -> bool {
        self.recorded_generation == Some(self.generation)
    }

    /// Structural edit counter.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All node ids in order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// All links in order.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn has_link(&self, a: NodeId, b: NodeId) -> bool {
        self.links.contains(&Link::new(a, b))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Neighbors of a node in port order.
    pub fn neighbors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.require(id)?.neighbors().collect())
    }

    /// Connected components, each as a sorted id set, ordered by smallest member.
    pub fn components(&self) -> Vec<BTreeSet<NodeId>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for &start in self.nodes.keys() {
            if seen.contains(&start) {
                continue;
            }
            let component: BTreeSet<NodeId> = self.hop_distances(start).into_keys().collect();
            seen.extend(component.iter().copied());
            components.push(component);
        }
        components
    }

    /// Breadth-first hop distance from `from` to every reachable node.
    pub fn hop_distances(&self, from: NodeId) -> BTreeMap<NodeId, u32> {
        let mut distances = BTreeMap::new();
        if !self.nodes.contains_key(&from) {
            return distances;
        }
        let mut queue = VecDeque::from([from]);
        distances.insert(from, 0);
        while let Some(current) = queue.pop_front() {
            let next = distances[&current] + 1;
            for neighbor in self.nodes[&current].neighbors() {
                if !distances.contains_key(&neighbor) {
                    distances.insert(neighbor, next);
                    queue.push_back(neighbor);
                }
            }
        }
        distances
    }

    /// Check that every port has exactly one mirror port and a backing link.
    pub fn ports_symmetric(&self) -> bool {
        self.nodes.values().all(|node| {
            node.ports.iter().all(|port| {
                self.links.contains(&Link::new(node.id, port.target_id))
                    && self.nodes.get(&port.target_id).is_some_and(|peer| {
                        peer.ports.iter().filter(|p| p.target_id == node.id).count() == 1
                    })
            })
        }) && self.links.iter().all(|link| {
            self.nodes
                .get(&link.source)
                .is_some_and(|n| n.port_toward(link.target).is_some())
        })
    }

    fn require(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(Error::NotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(Error::NotFound(id))
    }
}
