//! Election Coordinator - runs one election over a topology snapshot.
//!
//! The coordinator is a single-threaded cooperative scheduler. Each
//! [`Election::step`] advances virtual time by one tick and then:
//!
//! 1. drains every link channel of the BPDUs whose transit delay elapsed,
//!    handing each to the receiving agent's inbox;
//! 2. services every agent in id order (inbox first, then timers);
//! 3. routes the agents' outputs into channels and the event log.
//!
//! The same topology and config always produce the same event log.
//!
//! # Example
//!
//! ```
//! use stp_election::{Election, ElectionConfig};
//! use stp_topology::{NodeId, Topology};
//!
//! let mut topo = Topology::new();
//! for id in [2, 3, 4] {
//!     topo.insert_node(NodeId(id), 0.0, 0.0).unwrap();
//! }
//! topo.create_link(NodeId(2), NodeId(3)).unwrap();
//! topo.create_link(NodeId(3), NodeId(4)).unwrap();
//!
//! let mut election = Election::start(&topo, ElectionConfig::fast()).unwrap();
//! election.run_until_converged(10_000).unwrap();
//!
//! let result = election.result();
//! assert_eq!(result.node(NodeId(4)).unwrap().hop_count, 2);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use stp_topology::{Link, NodeId, PortNumber, Topology, TopologyChange};
use tracing::{debug, info, trace, warn};

use crate::agent::{AgentMessage, AgentOutput, AgentTimers, NodeAgent};
use crate::bpdu::{Bpdu, MalformedBpdu, WireBpdu};
use crate::channel::{LinkChannel, PacketInFlight};
use crate::config::ElectionConfig;
use crate::error::{Error, Result};
use crate::events::{millis, ElectionEvent, EventKind};
use crate::result::ElectionResult;

/// A running election.
#[derive(Debug)]
pub struct Election {
    config: ElectionConfig,
    timers: AgentTimers,
    now: Duration,
    ticks: u64,
    agents: BTreeMap<NodeId, NodeAgent>,
    channels: BTreeMap<Link, LinkChannel>,
    events: Vec<ElectionEvent>,
    next_seq: u64,
    last_change: Duration,
    quiet_ticks: u64,
}

impl Election {
    /// Spawn one agent per node and one channel per link, then seed every
    /// agent's initial claim.
    ///
    /// Agents resume from the beliefs stored in `topology` when those were
    /// recorded for its current structure, and start from self-claims
    /// otherwise.
    pub fn start(topology: &Topology, config: ElectionConfig) -> Result<Self> {
        config.validate()?;
        let timers = AgentTimers::from(&config);
        let resume = topology.beliefs_current();

        let agents: BTreeMap<NodeId, NodeAgent> = topology
            .nodes()
            .map(|node| (node.id, NodeAgent::new(node, timers, resume)))
            .collect();

        let mut channels = BTreeMap::new();
        for link in topology.links() {
            let source_port = port_between(topology, link.source, link.target)?;
            let target_port = port_between(topology, link.target, link.source)?;
            channels.insert(*link, LinkChannel::new(*link, source_port, target_port));
        }

        info!(
            nodes = agents.len(),
            links = channels.len(),
            resume,
            hello = ?timers.hello,
            reelection = ?timers.reelection,
            "Election started"
        );

        let mut election = Self {
            config,
            timers,
            now: Duration::ZERO,
            ticks: 0,
            agents,
            channels,
            events: Vec::new(),
            next_seq: 0,
            last_change: Duration::ZERO,
            quiet_ticks: 0,
        };
        for agent in election.agents.values_mut() {
            agent.deliver(AgentMessage::Seed);
        }
        election.service();
        Ok(election)
    }

    #[must_use]
    pub const fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Virtual time since the run started.
    #[must_use]
    pub const fn now(&self) -> Duration {
        self.now
    }

    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub fn agent(&self, id: NodeId) -> Option<&NodeAgent> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &NodeAgent> {
        self.agents.values()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.agents.len()
    }

    /// Advance one tick.
    ///
    /// Returns true if any agent changed its belief.
    pub fn step(&mut self) -> bool {
        self.ticks += 1;
        self.now = self.now.saturating_add(self.config.tick_interval);

        for channel in self.channels.values_mut() {
            for delivery in channel.drain_due(self.now) {
                match self.agents.get_mut(&delivery.to) {
                    Some(agent) => agent.deliver(AgentMessage::Bpdu {
                        port: delivery.port,
                        bpdu: delivery.bpdu,
                    }),
                    None => trace!(to = %delivery.to, "Dropping BPDU for departed node"),
                }
            }
        }

        let changed = self.service();
        if changed {
            self.quiet_ticks = 0;
        } else {
            self.quiet_ticks += 1;
        }
        changed
    }

    /// Run `n` ticks.
    pub fn run_ticks(&mut self, n: u64) {
        for _ in 0..n {
            self.step();
        }
    }

    /// Step until [`Election::is_converged`] or the budget runs out.
    ///
    /// Returns the number of ticks taken.
    pub fn run_until_converged(&mut self, max_ticks: u64) -> Result<u64> {
        let mut taken = 0;
        while !self.is_converged() {
            if taken >= max_ticks {
                warn!(ticks = max_ticks, time_ms = millis(self.now), "Election did not converge");
                return Err(Error::NotConverged { ticks: max_ticks });
            }
            self.step();
            taken += 1;
        }
        info!(
            ticks = taken,
            time_ms = millis(self.now),
            roots = ?self.result().root_nodes(),
            "Election converged"
        );
        Ok(taken)
    }

    /// No belief has changed within the quiescence window.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.now.saturating_sub(self.last_change) >= self.config.effective_quiescence()
    }

    /// Consecutive ticks without a belief change.
    #[must_use]
    pub const fn quiet_ticks(&self) -> u64 {
        self.quiet_ticks
    }

    /// No belief has changed for `ticks` consecutive ticks.
    #[must_use]
    pub const fn is_quiescent_for(&self, ticks: u64) -> bool {
        self.quiet_ticks >= ticks
    }

    /// Converged beliefs and port roles of every agent.
    #[must_use]
    pub fn result(&self) -> ElectionResult {
        ElectionResult {
            time_ms: millis(self.now),
            converged: self.is_converged(),
            nodes: self
                .agents
                .iter()
                .map(|(id, agent)| (*id, agent.outcome()))
                .collect(),
        }
    }

    /// Events produced so far that have not been drained.
    #[must_use]
    pub fn events(&self) -> &[ElectionEvent] {
        &self.events
    }

    /// Take the buffered events.
    pub fn drain_events(&mut self) -> Vec<ElectionEvent> {
        std::mem::take(&mut self.events)
    }

    /// BPDUs currently on the wire.
    #[must_use]
    pub fn in_flight(&self) -> Vec<PacketInFlight> {
        self.channels.values().flat_map(LinkChannel::packets).collect()
    }

    /// Apply a structural edit to the running election.
    ///
    /// An edit restarts the quiescence clock.
    pub fn apply(&mut self, change: &TopologyChange) {
        self.mark_changed();
        match change {
            TopologyChange::NodeAdded { id, x, y } => self.add_node(*id, *x, *y),
            TopologyChange::NodeRemoved { id, links } => self.remove_node(*id, links),
            TopologyChange::LinkAdded {
                link,
                source_port,
                target_port,
            } => self.add_link(*link, *source_port, *target_port),
            TopologyChange::LinkRemoved { link, .. } => self.remove_link(*link),
        }
    }

    fn add_node(&mut self, id: NodeId, x: f64, y: f64) {
        if self.agents.contains_key(&id) {
            return;
        }
        let node = stp_topology::Node::new(id, x, y);
        let mut agent = NodeAgent::new(&node, self.timers, false);
        agent.deliver(AgentMessage::Seed);
        self.agents.insert(id, agent);
        debug!(node = %id, "Agent joined");
    }

    fn add_link(&mut self, link: Link, source_port: PortNumber, target_port: PortNumber) {
        if self.channels.contains_key(&link) {
            return;
        }
        self.channels
            .insert(link, LinkChannel::new(link, source_port, target_port));
        for (node, port, neighbor) in [
            (link.source, source_port, link.target),
            (link.target, target_port, link.source),
        ] {
            if let Some(agent) = self.agents.get_mut(&node) {
                agent.deliver(AgentMessage::PortUp { port, neighbor });
            }
        }
        debug!(source = %link.source, target = %link.target, "Link up");
    }

    /// Close both directions and tell both ends before returning.
    fn remove_link(&mut self, link: Link) {
        let Some(mut channel) = self.channels.remove(&link) else {
            return;
        };
        let dropped = channel.close();
        debug!(source = %link.source, target = %link.target, dropped, "Link down");

        for node in [link.source, link.target] {
            let Some(port) = channel.port_of(node) else {
                continue;
            };
            let outputs = match self.agents.get_mut(&node) {
                Some(agent) => agent.notify(AgentMessage::NeighborLost { port }, self.now),
                None => continue,
            };
            if self.route(node, outputs) {
                self.mark_changed();
            }
        }
    }

    /// Drop the agent with its timers and inbox, then its links.
    fn remove_node(&mut self, id: NodeId, links: &[Link]) {
        if self.agents.remove(&id).is_some() {
            debug!(node = %id, "Agent removed");
        }
        for link in links {
            self.remove_link(*link);
        }
        // Links the change record did not list.
        let stale: Vec<Link> = self
            .channels
            .keys()
            .filter(|l| l.touches(id))
            .copied()
            .collect();
        for link in stale {
            self.remove_link(link);
        }
    }

    /// Deliver a BPDU from outside the engine, as a peer would send it.
    ///
    /// Malformed BPDUs are rejected with a warning and never reach the agent.
    pub fn inject(&mut self, to: NodeId, port: PortNumber, wire: WireBpdu) -> Result<()> {
        let checked = self.check_inbound(to, port, wire);
        match checked {
            Ok(bpdu) => {
                if let Some(agent) = self.agents.get_mut(&to) {
                    agent.deliver(AgentMessage::Bpdu { port, bpdu });
                }
                Ok(())
            }
            Err(error) => {
                warn!(node = %to, port, ?wire, %error, "Discarding injected BPDU");
                Err(error.into())
            }
        }
    }

    fn check_inbound(
        &self,
        to: NodeId,
        port: PortNumber,
        wire: WireBpdu,
    ) -> std::result::Result<Bpdu, MalformedBpdu> {
        let bpdu = Bpdu::try_from(wire)?;
        let agent = self.agents.get(&to).ok_or(MalformedBpdu::UnknownNode(to))?;
        if agent.neighbor_on(port).is_none() {
            return Err(MalformedBpdu::UnknownPort(port));
        }
        for id in [bpdu.root_id, bpdu.next_hop] {
            if !self.agents.contains_key(&id) {
                return Err(MalformedBpdu::UnknownNode(id));
            }
        }
        Ok(bpdu)
    }

    /// Step every agent once and route what they produce.
    fn service(&mut self) -> bool {
        let ids: Vec<NodeId> = self.agents.keys().copied().collect();
        let mut changed = false;
        for id in ids {
            let outputs = match self.agents.get_mut(&id) {
                Some(agent) => agent.step(self.now),
                None => continue,
            };
            changed |= self.route(id, outputs);
        }
        if changed {
            self.mark_changed();
        }
        changed
    }

    fn mark_changed(&mut self) {
        self.last_change = self.now;
        self.quiet_ticks = 0;
    }

    fn route(&mut self, from: NodeId, outputs: Vec<AgentOutput>) -> bool {
        let mut changed = false;
        for output in outputs {
            match output {
                AgentOutput::Send {
                    port,
                    neighbor,
                    bpdu,
                } => {
                    let link = Link::new(from, neighbor);
                    let Some(channel) = self.channels.get_mut(&link) else {
                        warn!(node = %from, port, neighbor = %neighbor, "No channel for port, dropping BPDU");
                        continue;
                    };
                    let deliver_at = self.now.saturating_add(self.config.transit_delay);
                    channel.send(from, bpdu, deliver_at);
                    trace!(node = %from, port, to = %neighbor, ?bpdu, "Sent BPDU");
                    self.record(from, EventKind::PacketSent, bpdu, Some(port));
                }
                AgentOutput::Received { port, bpdu } => {
                    self.record(from, EventKind::PacketReceived, bpdu, port);
                }
                AgentOutput::StateChanged { belief, port } => {
                    changed = true;
                    self.record(from, EventKind::StateChanged, belief, port);
                }
            }
        }
        changed
    }

    fn record(&mut self, node: NodeId, event: EventKind, bpdu: Bpdu, port: Option<PortNumber>) {
        self.events.push(ElectionEvent {
            seq: self.next_seq,
            time_ms: millis(self.now),
            node_id: node,
            event,
            root_id: bpdu.root_id,
            hop_count: bpdu.hop_count,
            next_hop: bpdu.next_hop,
            port_number: port,
        });
        self.next_seq += 1;
    }
}

fn port_between(topology: &Topology, node: NodeId, neighbor: NodeId) -> Result<PortNumber> {
    topology
        .node(node)
        .ok_or(stp_topology::Error::NotFound(node))?
        .port_toward(neighbor)
        .map(|p| p.port_number)
        .ok_or_else(|| stp_topology::Error::NotFound(neighbor).into())
}
