//! Error types for topology edits.

use thiserror::Error;

use crate::node::{NodeId, PortNumber};

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the caller of a topology edit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The referenced node does not exist
    #[error("node {0} not found")]
    NotFound(NodeId),

    /// A node cannot be linked to itself
    #[error("node {0} cannot be linked to itself")]
    SelfLoop(NodeId),

    /// A node with this id already exists
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    /// The node has no port with this number
    #[error("node {node} has no port {port}")]
    PortNotFound { node: NodeId, port: PortNumber },

    /// Every id in the id space is taken
    #[error("no unused node id left")]
    IdSpaceExhausted,
}
