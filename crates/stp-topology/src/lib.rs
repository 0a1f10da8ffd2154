//! STP Sandbox Topology
//!
//! The authoritative graph the spanning-tree election runs over.
//!
//! # Model
//!
//! - **Nodes** get the smallest unused id ≥ 2 and start out claiming
//!   themselves as root.
//! - **Ports** exist once per (node, neighbor) pair and are link-symmetric:
//!   if A has a port toward B, B has exactly one port toward A.
//! - **Links** are unordered pairs. Re-linking a linked pair reuses the
//!   existing ports.
//!
//! The [`TopologyStore`] serializes edits against snapshot reads so an
//! election never starts from a half-updated graph.

mod error;
mod graph;
mod link;
mod node;
mod store;

pub use error::{Error, Result};
pub use graph::{NodeRecord, Topology, TopologyChange};
pub use link::Link;
pub use node::{Node, NodeId, Port, PortNumber, PortStatus};
pub use store::TopologyStore;
