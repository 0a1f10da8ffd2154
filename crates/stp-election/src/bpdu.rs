//! Bridge Protocol Data Units.
//!
//! A BPDU carries a node's claimed `(root_id, hop_count, next_hop)` and is
//! the only message exchanged between agents. On the wire its fields are
//! plain JSON integers; [`WireBpdu`] is that form and converts into a
//! validated [`Bpdu`].

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use stp_topology::NodeId;
use thiserror::Error;

/// A root claim as exchanged between neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bpdu {
    pub root_id: NodeId,
    pub hop_count: u32,
    pub next_hop: NodeId,
}

impl Bpdu {
    /// "I am root": the claim every bridge starts with.
    pub const fn claim(id: NodeId) -> Self {
        Self {
            root_id: id,
            hop_count: 0,
            next_hop: id,
        }
    }

    /// The path this claim offers one hop further away.
    #[must_use]
    pub const fn relayed(&self) -> Self {
        Self {
            root_id: self.root_id,
            hop_count: self.hop_count.saturating_add(1),
            next_hop: self.next_hop,
        }
    }

    /// Structural checks that need no knowledge of the receiver.
    pub fn validate(&self) -> Result<(), MalformedBpdu> {
        if self.hop_count == u32::MAX {
            return Err(MalformedBpdu::HopCountOutOfRange(i64::from(self.hop_count)));
        }
        if self.hop_count == 0 && self.next_hop != self.root_id {
            return Err(MalformedBpdu::InconsistentClaim {
                root_id: self.root_id,
                next_hop: self.next_hop,
            });
        }
        Ok(())
    }

    /// Compare two claims as advertised by `self_id` and `other_id`.
    ///
    /// The lexicographic `(root_id, hop_count, next_hop, bridge id)` order
    /// decides which side of a link is designated; the bridge id only
    /// breaks exact ties.
    pub fn priority_cmp(&self, self_id: NodeId, other: &Bpdu, other_id: NodeId) -> Ordering {
        (self.root_id, self.hop_count, self.next_hop, self_id).cmp(&(
            other.root_id,
            other.hop_count,
            other.next_hop,
            other_id,
        ))
    }
}

/// Why a BPDU was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedBpdu {
    #[error("field `{field}` is negative ({value})")]
    NegativeField { field: &'static str, value: i64 },

    #[error("field `{field}` is out of range ({value})")]
    FieldOutOfRange { field: &'static str, value: i64 },

    #[error("hop count {0} cannot be incremented")]
    HopCountOutOfRange(i64),

    #[error("root claim for {root_id} names next hop {next_hop}")]
    InconsistentClaim { root_id: NodeId, next_hop: NodeId },

    #[error("next hop {0} is the receiving node")]
    SelfReferentialNextHop(NodeId),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("no port {0} on the receiving node")]
    UnknownPort(usize),
}

/// BPDU as it arrives from an untrusted peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBpdu {
    pub root_id: i64,
    pub hop_count: i64,
    pub next_hop: i64,
}

impl From<Bpdu> for WireBpdu {
    fn from(bpdu: Bpdu) -> Self {
        Self {
            root_id: i64::from(bpdu.root_id.0),
            hop_count: i64::from(bpdu.hop_count),
            next_hop: i64::from(bpdu.next_hop.0),
        }
    }
}

impl TryFrom<WireBpdu> for Bpdu {
    type Error = MalformedBpdu;

    fn try_from(wire: WireBpdu) -> Result<Self, Self::Error> {
        let bpdu = Bpdu {
            root_id: NodeId(field_u32("rootId", wire.root_id)?),
            hop_count: field_u32("hopCount", wire.hop_count)?,
            next_hop: NodeId(field_u32("nextHop", wire.next_hop)?),
        };
        bpdu.validate()?;
        Ok(bpdu)
    }
}

fn field_u32(field: &'static str, value: i64) -> Result<u32, MalformedBpdu> {
    if value < 0 {
        return Err(MalformedBpdu::NegativeField { field, value });
    }
    u32::try_from(value).map_err(|_| MalformedBpdu::FieldOutOfRange { field, value })
}
