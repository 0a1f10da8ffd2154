//! Shared topology store.
//!
//! The UI edit path and the election share one [`Topology`]. Structural
//! mutations take the write lock, and snapshots are cloned under the read
//! lock, so an election is never spawned from a half-applied edit.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::graph::{NodeRecord, Topology, TopologyChange};
use crate::node::NodeId;

/// Single-writer store around the authoritative topology.
#[derive(Debug, Default)]
pub struct TopologyStore {
    inner: RwLock<Topology>,
}

impl TopologyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing topology.
    pub fn from_topology(topology: Topology) -> Self {
        Self {
            inner: RwLock::new(topology),
        }
    }

    /// Create a node, returning its assigned id and the change record.
    pub fn create_node(&self, x: f64, y: f64) -> Result<(NodeId, TopologyChange)> {
        let change = self.write().create_node(x, y)?;
        let TopologyChange::NodeAdded { id, .. } = change else {
            unreachable!("create_node always adds a node");
        };
        Ok((id, change))
    }

    pub fn insert_node(&self, id: NodeId, x: f64, y: f64) -> Result<TopologyChange> {
        self.write().insert_node(id, x, y)
    }

    pub fn create_link(&self, a: NodeId, b: NodeId) -> Result<Option<TopologyChange>> {
        self.write().create_link(a, b)
    }

    pub fn remove_link(&self, a: NodeId, b: NodeId) -> Result<Option<TopologyChange>> {
        self.write().remove_link(a, b)
    }

    pub fn delete_node(&self, id: NodeId) -> Result<TopologyChange> {
        self.write().delete_node(id)
    }

    /// Write converged election state back for display.
    pub fn record_election<I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = NodeRecord>,
    {
        self.write().record_election(records)
    }

    /// Replace the whole topology (bulk import).
    pub fn replace(&self, topology: Topology) {
        *self.write() = topology;
    }

    /// Consistent copy of the current topology.
    pub fn snapshot(&self) -> Topology {
        self.read().clone()
    }

    /// Run a read-only closure against the current topology.
    pub fn with<R>(&self, f: impl FnOnce(&Topology) -> R) -> R {
        f(&self.read())
    }

    fn read(&self) -> RwLockReadGuard<'_, Topology> {
        // A panicked writer cannot leave a half-applied edit: every mutation
        // validates before it changes anything.
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Topology> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
