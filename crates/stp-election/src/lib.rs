//! STP Root Election
//!
//! Distributed spanning-tree root election over a [`stp_topology::Topology`].
//!
//! Every node runs its own [`NodeAgent`]: a private belief
//! `(root_id, hop_count, next_hop)`, a port table and an inbox. Agents share
//! nothing; they exchange [`Bpdu`]s over per-link FIFO channels. The
//! [`Election`] coordinator spawns the agents, drives virtual time, and
//! reports convergence and the derived port roles.
//!
//! # Comparison rule
//!
//! An inbound BPDU offers the path `(root_id, hop_count + 1, next_hop)`.
//! The agent adopts it if the root is smaller, or the root is equal and the
//! path is shorter, or both are equal and the next hop is smaller. An equal
//! offer confirms the current belief and restarts the re-election timer.
//! Anything else is discarded.
//!
//! Since the comparison is a total order on integer tuples, every connected
//! component converges on its minimum id as root, and the root ports form a
//! spanning tree of that component.
//!
//! # Port roles
//!
//! - the port the adopted path runs through is the **root port**;
//! - on any other port, the side whose `(root_id, hop_count, next_hop, id)`
//!   is smaller is **designated**, the other side is **blocked**.

mod agent;
mod bpdu;
mod channel;
mod config;
mod coordinator;
mod error;
mod events;
mod result;

pub use agent::{AgentMessage, AgentOutput, AgentState, AgentTimers, NodeAgent};
pub use bpdu::{Bpdu, MalformedBpdu, WireBpdu};
pub use channel::{Delivery, LinkChannel, PacketInFlight};
pub use config::ElectionConfig;
pub use coordinator::Election;
pub use error::{Error, Result};
pub use events::{ElectionEvent, ElectionSnapshot, EventKind, NodeBelief};
pub use result::{ElectionResult, NodeOutcome, PortOutcome};
