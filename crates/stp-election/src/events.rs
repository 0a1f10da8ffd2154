//! Outbound election events for visualization.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stp_topology::{NodeId, PortNumber};

use crate::bpdu::Bpdu;

/// Virtual time in whole milliseconds, saturating.
pub(crate) fn millis(time: Duration) -> u64 {
    u64::try_from(time.as_millis()).unwrap_or(u64::MAX)
}

/// What happened at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// The node's belief changed
    StateChanged,
    /// The node put a BPDU on a port
    PacketSent,
    /// The node took a BPDU from its inbox
    PacketReceived,
}

/// One entry of the event stream.
///
/// `seq` is global and strictly increasing, so a node's own events always
/// appear in the order it produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionEvent {
    pub seq: u64,
    pub time_ms: u64,
    pub node_id: NodeId,
    pub event: EventKind,
    pub root_id: NodeId,
    pub hop_count: u32,
    pub next_hop: NodeId,
    pub port_number: Option<PortNumber>,
}

impl ElectionEvent {
    /// The BPDU fields carried by this event.
    pub fn bpdu(&self) -> Bpdu {
        Bpdu {
            root_id: self.root_id,
            hop_count: self.hop_count,
            next_hop: self.next_hop,
        }
    }
}

/// One node's belief as reconstructed from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeBelief {
    pub node_id: NodeId,
    pub root_id: NodeId,
    pub hop_count: u32,
    pub next_hop: NodeId,
    pub changes: u64,
}

/// Election state at a point in the event log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionSnapshot {
    pub time_ms: u64,
    pub beliefs: Vec<NodeBelief>,
    pub roots: Vec<NodeId>,
    pub packets_sent: u64,
    pub packets_received: u64,
}

impl ElectionSnapshot {
    /// Rebuild beliefs from events up to (but not including) the given index.
    ///
    /// A node's belief is its seed claim until its first `StateChanged`.
    pub fn from_events(events: &[ElectionEvent], up_to_event: usize) -> Self {
        let mut snapshot = Self::default();
        snapshot.fold(events.iter().take(up_to_event));
        snapshot
    }

    /// Play further events on top of this snapshot.
    pub fn fold<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a ElectionEvent>,
    {
        let mut beliefs: BTreeMap<NodeId, NodeBelief> =
            self.beliefs.drain(..).map(|b| (b.node_id, b)).collect();

        for event in events {
            self.time_ms = event.time_ms;
            let entry = beliefs.entry(event.node_id).or_insert(NodeBelief {
                node_id: event.node_id,
                root_id: event.node_id,
                hop_count: 0,
                next_hop: event.node_id,
                changes: 0,
            });
            match event.event {
                EventKind::StateChanged => {
                    entry.root_id = event.root_id;
                    entry.hop_count = event.hop_count;
                    entry.next_hop = event.next_hop;
                    entry.changes += 1;
                }
                EventKind::PacketSent => self.packets_sent += 1,
                EventKind::PacketReceived => self.packets_received += 1,
            }
        }

        self.beliefs = beliefs.into_values().collect();
        self.roots = self.beliefs.iter().map(|b| b.root_id).collect();
        self.roots.sort_unstable();
        self.roots.dedup();
    }

    pub fn belief(&self, node: NodeId) -> Option<&NodeBelief> {
        self.beliefs.iter().find(|b| b.node_id == node)
    }
}
