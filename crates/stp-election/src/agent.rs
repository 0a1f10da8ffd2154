//! Node Agent - one bridge's private view of the root election.
//!
//! An agent owns its belief `(root_id, hop_count, next_hop)`, its port
//! table and an inbox. Nothing outside the agent writes to those fields:
//! the coordinator hands it [`AgentMessage`]s and routes the
//! [`AgentOutput`]s it returns.
//!
//! # Timers
//!
//! Timers are deadlines in virtual time, re-armed on every state change and
//! checked by [`NodeAgent::step`]:
//!
//! - **Hello**: while the agent believes itself root it re-advertises its
//!   claim on every port each hello interval.
//! - **Re-election**: while following another root, the agent expects a
//!   confirming BPDU within the re-election interval. If none arrives it
//!   re-broadcasts itself as root.
//!
//! Inbox messages are handled before timers within a step, so a confirming
//! BPDU that lands in the same tick as the deadline wins the race.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use stp_topology::{Node, NodeId, PortNumber, PortStatus};
use tracing::{debug, trace, warn};

use crate::bpdu::{Bpdu, MalformedBpdu};
use crate::config::ElectionConfig;
use crate::result::{NodeOutcome, PortOutcome};

/// Inputs an agent reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMessage {
    /// Start of a run: advertise the current belief on every port.
    Seed,
    /// A BPDU delivered on one of the agent's ports.
    Bpdu { port: PortNumber, bpdu: Bpdu },
    /// A link came up on a new port.
    PortUp { port: PortNumber, neighbor: NodeId },
    /// The link behind a port was removed.
    NeighborLost { port: PortNumber },
}

impl AgentMessage {
    fn port(&self) -> Option<PortNumber> {
        match self {
            Self::Seed => None,
            Self::Bpdu { port, .. } | Self::PortUp { port, .. } | Self::NeighborLost { port } => {
                Some(*port)
            }
        }
    }
}

/// What an agent asks the coordinator to do or record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutput {
    /// Put a BPDU on the link behind `port`.
    Send {
        port: PortNumber,
        neighbor: NodeId,
        bpdu: Bpdu,
    },
    /// A BPDU was taken from the inbox. `port` is `None` for the seed claim.
    Received { port: Option<PortNumber>, bpdu: Bpdu },
    /// The belief or root port changed. `port` names where it was learned,
    /// if anywhere.
    StateChanged { belief: Bpdu, port: Option<PortNumber> },
}

/// Coarse role of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Believes itself root.
    Root,
    /// Follows another root through its root port.
    Following,
    /// Timer scheduling failed; permanently self-as-root.
    Degraded,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "Root"),
            Self::Following => write!(f, "Following"),
            Self::Degraded => write!(f, "Degraded"),
        }
    }
}

/// The two timer periods an agent runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentTimers {
    pub hello: Duration,
    pub reelection: Duration,
}

impl From<&ElectionConfig> for AgentTimers {
    fn from(config: &ElectionConfig) -> Self {
        Self {
            hello: config.effective_hello(),
            reelection: config.effective_reelection(),
        }
    }
}

#[derive(Debug, Clone)]
struct AgentPort {
    number: PortNumber,
    neighbor: NodeId,
    /// Latest valid advertisement heard from the neighbor
    heard: Option<Bpdu>,
}

/// One bridge's election state machine.
#[derive(Debug)]
pub struct NodeAgent {
    id: NodeId,
    belief: Bpdu,
    ports: Vec<AgentPort>,
    root_port: Option<PortNumber>,
    inbox: VecDeque<AgentMessage>,
    timers: AgentTimers,
    hello_deadline: Option<Duration>,
    reelection_deadline: Option<Duration>,
    degraded: bool,
    outbox: Vec<AgentOutput>,
}

impl NodeAgent {
    /// Create an agent for `node`.
    ///
    /// With `resume`, the agent starts from the node's recorded belief and
    /// root port; otherwise it starts from its self-claim. A recorded belief
    /// without a usable root port falls back to the self-claim.
    pub fn new(node: &Node, timers: AgentTimers, resume: bool) -> Self {
        let ports: Vec<AgentPort> = node
            .ports
            .iter()
            .map(|p| AgentPort {
                number: p.port_number,
                neighbor: p.target_id,
                heard: None,
            })
            .collect();

        let mut belief = Bpdu::claim(node.id);
        let mut root_port = None;
        if resume && node.root_id != node.id {
            let recorded = Bpdu {
                root_id: node.root_id,
                hop_count: node.hop_count,
                next_hop: node.next_hop,
            };
            let port = node
                .ports
                .iter()
                .find(|p| p.status == PortStatus::RootPort)
                .map(|p| p.port_number);
            if port.is_some() && recorded.validate().is_ok() && recorded.hop_count > 0 && recorded.next_hop != node.id {
                belief = recorded;
                root_port = port;
            } else {
                debug!(node = %node.id, "Recorded belief unusable, starting from self-claim");
            }
        }

        let agent = Self {
            id: node.id,
            belief,
            ports,
            root_port,
            inbox: VecDeque::new(),
            timers,
            hello_deadline: None,
            reelection_deadline: None,
            degraded: false,
            outbox: Vec::new(),
        };
        agent.check_invariants();
        agent
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Current belief.
    #[must_use]
    pub const fn belief(&self) -> Bpdu {
        self.belief
    }

    #[must_use]
    pub const fn root_port(&self) -> Option<PortNumber> {
        self.root_port
    }

    #[must_use]
    pub fn state(&self) -> AgentState {
        if self.degraded {
            AgentState::Degraded
        } else if self.is_root() {
            AgentState::Root
        } else {
            AgentState::Following
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.belief.root_id == self.id
    }

    /// Neighbor reached through the root port.
    #[must_use]
    pub fn upstream(&self) -> Option<NodeId> {
        self.root_port
            .and_then(|p| self.port_entry(p))
            .map(|p| p.neighbor)
    }

    /// Neighbor behind `port`.
    #[must_use]
    pub fn neighbor_on(&self, port: PortNumber) -> Option<NodeId> {
        self.port_entry(port).map(|p| p.neighbor)
    }

    #[must_use]
    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    /// Next virtual time at which a timer fires.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        match (self.hello_deadline, self.reelection_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Queue a message for the next step.
    pub fn deliver(&mut self, message: AgentMessage) {
        self.inbox.push_back(message);
    }

    /// Drain the inbox, then fire due timers.
    pub fn step(&mut self, now: Duration) -> Vec<AgentOutput> {
        while let Some(message) = self.inbox.pop_front() {
            self.handle(message, now);
        }
        self.tick(now);
        std::mem::take(&mut self.outbox)
    }

    /// Handle one message immediately, bypassing the inbox.
    ///
    /// Used for link teardown, which must reach the agent before the
    /// coordinator returns.
    pub fn notify(&mut self, message: AgentMessage, now: Duration) -> Vec<AgentOutput> {
        self.handle(message, now);
        std::mem::take(&mut self.outbox)
    }

    /// Fire due timers.
    pub fn tick(&mut self, now: Duration) {
        if self.degraded {
            return;
        }
        if self.reelection_deadline.is_some_and(|d| now >= d) {
            debug!(node = %self.id, root = %self.belief.root_id, "Re-election timer expired, claiming root");
            self.become_root(now);
            return;
        }
        if self.hello_deadline.is_some_and(|d| now >= d) {
            trace!(node = %self.id, "Hello");
            self.flood(None);
            self.hello_deadline = self.arm(now, self.timers.hello);
        }
    }

    /// Derive port roles from the current belief and what each neighbor
    /// last advertised.
    #[must_use]
    pub fn port_roles(&self) -> Vec<PortOutcome> {
        self.ports
            .iter()
            .map(|port| {
                let status = if Some(port.number) == self.root_port {
                    PortStatus::RootPort
                } else {
                    match port.heard {
                        None => PortStatus::Unblocked,
                        Some(heard) => {
                            if self.belief.priority_cmp(self.id, &heard, port.neighbor).is_lt() {
                                PortStatus::DesignatedPort
                            } else {
                                PortStatus::Blocked
                            }
                        }
                    }
                };
                PortOutcome {
                    port_number: port.number,
                    target_id: port.neighbor,
                    status,
                }
            })
            .collect()
    }

    /// Snapshot of this agent for the election result.
    #[must_use]
    pub fn outcome(&self) -> NodeOutcome {
        NodeOutcome {
            root_id: self.belief.root_id,
            hop_count: self.belief.hop_count,
            next_hop: self.belief.next_hop,
            root_port: self.root_port,
            upstream: self.upstream(),
            degraded: self.degraded,
            ports: self.port_roles(),
        }
    }

    fn handle(&mut self, message: AgentMessage, now: Duration) {
        match message {
            AgentMessage::Seed => self.seed(now),
            AgentMessage::Bpdu { port, bpdu } => self.on_receive(port, bpdu, now),
            AgentMessage::PortUp { port, neighbor } => self.on_port_up(port, neighbor),
            AgentMessage::NeighborLost { port } => self.on_neighbor_lost(port, now),
        }
    }

    fn seed(&mut self, now: Duration) {
        self.outbox.push(AgentOutput::Received {
            port: None,
            bpdu: self.belief,
        });
        self.flood(None);
        if self.degraded {
            return;
        }
        if self.is_root() {
            self.hello_deadline = self.arm(now, self.timers.hello);
        } else {
            self.reelection_deadline = self.arm(now, self.timers.reelection);
        }
    }

    /// Apply the election comparison rules to an inbound BPDU.
    fn on_receive(&mut self, port: PortNumber, bpdu: Bpdu, now: Duration) {
        let Some(index) = self.ports.iter().position(|p| p.number == port) else {
            warn!(node = %self.id, port, error = %MalformedBpdu::UnknownPort(port), "Discarding BPDU");
            return;
        };
        if let Err(error) = self.screen(&bpdu) {
            warn!(node = %self.id, port, ?bpdu, %error, "Discarding BPDU");
            return;
        }

        self.ports[index].heard = Some(bpdu);
        self.outbox.push(AgentOutput::Received {
            port: Some(port),
            bpdu,
        });
        if self.degraded {
            return;
        }

        // `screen` rejects u32::MAX, so this cannot overflow.
        let offered = bpdu.relayed();
        let current = self.belief;

        if offered.root_id < current.root_id {
            self.adopt(port, offered, now);
        } else if offered.root_id == current.root_id && offered.hop_count < current.hop_count {
            self.adopt(port, offered, now);
        } else if offered.root_id == current.root_id
            && offered.hop_count == current.hop_count
            && offered.next_hop < current.next_hop
        {
            self.adopt(port, offered, now);
        } else if offered == current {
            self.confirm(port, now);
        } else if Some(port) == self.root_port {
            self.upstream_worsened(port, bpdu, now);
        } else {
            trace!(node = %self.id, port, ?bpdu, "BPDU no better than current belief");
        }
    }

    /// The root port now advertises a worse path than the one adopted.
    ///
    /// The old path is gone. An upstream claiming root itself is alive, so
    /// its claim is taken if it beats our own; any other worse path may
    /// carry a vanished root and is replaced by a self-claim. Better paths
    /// come back with the next hello.
    fn upstream_worsened(&mut self, port: PortNumber, bpdu: Bpdu, now: Duration) {
        debug!(
            node = %self.id,
            port,
            root = %self.belief.root_id,
            offered_root = %bpdu.root_id,
            offered_hops = bpdu.hop_count,
            "Root port advertises a worse path"
        );
        if bpdu.hop_count == 0 && bpdu.root_id < self.id {
            self.adopt(port, bpdu.relayed(), now);
        } else {
            self.become_root(now);
        }
    }

    /// Receiver-side validation on top of [`Bpdu::validate`].
    fn screen(&self, bpdu: &Bpdu) -> Result<(), MalformedBpdu> {
        bpdu.validate()?;
        if bpdu.next_hop == self.id && bpdu.root_id != self.id {
            return Err(MalformedBpdu::SelfReferentialNextHop(self.id));
        }
        Ok(())
    }

    fn adopt(&mut self, port: PortNumber, belief: Bpdu, now: Duration) {
        debug!(
            node = %self.id,
            port,
            root = %belief.root_id,
            hops = belief.hop_count,
            next_hop = %belief.next_hop,
            "Adopted better root path"
        );
        self.belief = belief;
        self.root_port = Some(port);
        self.hello_deadline = None;
        self.reelection_deadline = self.arm(now, self.timers.reelection);
        if self.degraded {
            return;
        }
        self.outbox.push(AgentOutput::StateChanged {
            belief,
            port: Some(port),
        });
        self.flood(Some(port));
        self.check_invariants();
    }

    /// A BPDU repeating the current belief: the path to the root is alive.
    fn confirm(&mut self, port: PortNumber, now: Duration) {
        self.reelection_deadline = self.arm(now, self.timers.reelection);
        if self.degraded {
            return;
        }

        // Equal offers: the smaller neighbor id carries the root port.
        if Some(port) != self.root_port {
            let offered_by = self.neighbor_on(port);
            let current = self.upstream();
            if let (Some(offered_by), Some(current)) = (offered_by, current) {
                if offered_by < current {
                    debug!(node = %self.id, from = %current, to = %offered_by, "Root port moved to smaller neighbor");
                    self.root_port = Some(port);
                    self.outbox.push(AgentOutput::StateChanged {
                        belief: self.belief,
                        port: Some(port),
                    });
                }
            }
        }

        // Relay the root's hello down the tree.
        if Some(port) == self.root_port {
            self.flood(Some(port));
        }
    }

    fn on_port_up(&mut self, port: PortNumber, neighbor: NodeId) {
        if self.port_entry(port).is_none() {
            self.ports.push(AgentPort {
                number: port,
                neighbor,
                heard: None,
            });
        }
        self.send(port, neighbor);
    }

    fn on_neighbor_lost(&mut self, port: PortNumber, now: Duration) {
        let Some(index) = self.ports.iter().position(|p| p.number == port) else {
            return;
        };
        let lost = self.ports.remove(index);
        self.inbox.retain(|m| m.port() != Some(port));
        debug!(node = %self.id, port, neighbor = %lost.neighbor, "Neighbor lost");

        if Some(port) == self.root_port {
            self.root_port = None;
            self.become_root(now);
        }
    }

    /// Re-broadcast the self-claim: `root_id = next_hop = id`, `hop_count = 0`.
    fn become_root(&mut self, now: Duration) {
        let claim = Bpdu::claim(self.id);
        let changed = self.belief != claim;
        self.belief = claim;
        self.root_port = None;
        self.reelection_deadline = None;
        self.hello_deadline = self.arm(now, self.timers.hello);
        if changed {
            self.outbox.push(AgentOutput::StateChanged {
                belief: claim,
                port: None,
            });
        }
        self.flood(None);
        self.check_invariants();
    }

    /// Compute a deadline. Failing to schedule degrades the agent to a
    /// permanent self-claim instead of taking the run down.
    fn arm(&mut self, now: Duration, interval: Duration) -> Option<Duration> {
        match now.checked_add(interval) {
            Some(deadline) => Some(deadline),
            None => {
                self.degrade();
                None
            }
        }
    }

    fn degrade(&mut self) {
        if self.degraded {
            return;
        }
        warn!(node = %self.id, "Cannot schedule timer, node stays self-as-root");
        self.degraded = true;
        self.hello_deadline = None;
        self.reelection_deadline = None;
        self.root_port = None;
        let claim = Bpdu::claim(self.id);
        if self.belief != claim {
            self.belief = claim;
            self.outbox.push(AgentOutput::StateChanged {
                belief: claim,
                port: None,
            });
        }
        self.flood(None);
    }

    /// Send the current belief out of every port except `except`.
    fn flood(&mut self, except: Option<PortNumber>) {
        let targets: Vec<(PortNumber, NodeId)> = self
            .ports
            .iter()
            .filter(|p| Some(p.number) != except)
            .map(|p| (p.number, p.neighbor))
            .collect();
        for (port, neighbor) in targets {
            self.send(port, neighbor);
        }
    }

    fn send(&mut self, port: PortNumber, neighbor: NodeId) {
        self.outbox.push(AgentOutput::Send {
            port,
            neighbor,
            bpdu: self.belief,
        });
    }

    fn port_entry(&self, port: PortNumber) -> Option<&AgentPort> {
        self.ports.iter().find(|p| p.number == port)
    }

    /// Internal consistency; a failure here is a bug in the agent.
    fn check_invariants(&self) {
        if self.is_root() {
            assert_eq!(self.belief, Bpdu::claim(self.id), "node {} root claim is not a self-claim", self.id);
            assert!(self.root_port.is_none(), "root node {} has a root port", self.id);
        } else {
            assert!(self.belief.hop_count > 0, "node {} follows {} at distance 0", self.id, self.belief.root_id);
            assert!(
                self.belief.next_hop != self.id,
                "node {} names itself as next hop toward {}",
                self.id,
                self.belief.root_id
            );
            let root_port = self.root_port.and_then(|p| self.port_entry(p));
            assert!(
                root_port.is_some(),
                "node {} follows {} without a root port",
                self.id,
                self.belief.root_id
            );
            // Nothing heard yet after a resume is fine.
            if let Some(heard) = root_port.and_then(|p| p.heard) {
                assert_eq!(
                    heard.relayed(),
                    self.belief,
                    "node {} root port no longer backs its belief",
                    self.id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stp_topology::Topology;

    const NOW: Duration = Duration::from_millis(10);

    fn timers() -> AgentTimers {
        AgentTimers {
            hello: Duration::from_millis(50),
            reelection: Duration::from_millis(500),
        }
    }

    fn bpdu(root: u32, hops: u32, next: u32) -> Bpdu {
        Bpdu {
            root_id: NodeId(root),
            hop_count: hops,
            next_hop: NodeId(next),
        }
    }

    /// Node 5 with ports 0 -> 3, 1 -> 4, 2 -> 7.
    fn agent() -> NodeAgent {
        let mut topo = Topology::new();
        for id in [3, 4, 5, 7] {
            topo.insert_node(NodeId(id), 0.0, 0.0).unwrap();
        }
        for peer in [3, 4, 7] {
            topo.create_link(NodeId(5), NodeId(peer)).unwrap();
        }
        NodeAgent::new(topo.node(NodeId(5)).unwrap(), timers(), false)
    }

    fn sends(outputs: &[AgentOutput]) -> Vec<PortNumber> {
        outputs
            .iter()
            .filter_map(|o| match o {
                AgentOutput::Send { port, .. } => Some(*port),
                _ => None,
            })
            .collect()
    }

    fn changed(outputs: &[AgentOutput]) -> bool {
        outputs.iter().any(|o| matches!(o, AgentOutput::StateChanged { .. }))
    }

    fn receive(agent: &mut NodeAgent, port: PortNumber, bpdu: Bpdu) -> Vec<AgentOutput> {
        agent.deliver(AgentMessage::Bpdu { port, bpdu });
        agent.step(NOW)
    }

    #[test]
    fn starts_as_root() {
        let agent = agent();
        assert_eq!(agent.belief(), Bpdu::claim(NodeId(5)));
        assert_eq!(agent.state(), AgentState::Root);
        assert_eq!(agent.root_port(), None);
    }

    #[test]
    fn seed_advertises_on_every_port() {
        let mut agent = agent();
        agent.deliver(AgentMessage::Seed);
        let out = agent.step(Duration::ZERO);
        assert_eq!(sends(&out), vec![0, 1, 2]);
        assert!(!changed(&out));
        assert_eq!(agent.next_deadline(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn smaller_root_adopted_and_flooded_elsewhere() {
        let mut agent = agent();
        let out = receive(&mut agent, 0, bpdu(3, 0, 3));
        assert_eq!(agent.belief(), bpdu(3, 1, 3));
        assert_eq!(agent.root_port(), Some(0));
        assert_eq!(agent.upstream(), Some(NodeId(3)));
        assert!(changed(&out));
        assert_eq!(sends(&out), vec![1, 2]);
        assert_eq!(agent.state(), AgentState::Following);
    }

    #[test]
    fn shorter_path_adopted() {
        let mut agent = agent();
        receive(&mut agent, 2, bpdu(2, 3, 2));
        assert_eq!(agent.belief().hop_count, 4);
        let out = receive(&mut agent, 1, bpdu(2, 1, 2));
        assert_eq!(agent.belief(), bpdu(2, 2, 2));
        assert_eq!(agent.root_port(), Some(1));
        assert_eq!(sends(&out), vec![0, 2]);
    }

    #[test]
    fn smaller_next_hop_breaks_tie() {
        let mut agent = agent();
        receive(&mut agent, 2, bpdu(2, 1, 4));
        let out = receive(&mut agent, 1, bpdu(2, 1, 3));
        assert_eq!(agent.belief(), bpdu(2, 2, 3));
        assert!(changed(&out));
    }

    #[test]
    fn worse_claim_discarded() {
        let mut agent = agent();
        receive(&mut agent, 0, bpdu(2, 0, 2));
        let out = receive(&mut agent, 1, bpdu(3, 0, 3));
        assert_eq!(agent.belief(), bpdu(2, 1, 2));
        assert!(!changed(&out));
        assert!(sends(&out).is_empty());
    }

    #[test]
    fn worse_path_on_root_port_reclaims_root() {
        let mut agent = agent();
        receive(&mut agent, 0, bpdu(2, 0, 2));
        // Node 3 moved further from root 2: the old path is gone.
        let out = receive(&mut agent, 0, bpdu(2, 3, 2));
        assert_eq!(agent.belief(), Bpdu::claim(NodeId(5)));
        assert_eq!(agent.root_port(), None);
        assert!(changed(&out));
        assert_eq!(sends(&out), vec![0, 1, 2]);
    }

    #[test]
    fn upstream_claiming_root_is_followed() {
        let mut agent = agent();
        receive(&mut agent, 0, bpdu(2, 0, 2));
        let out = receive(&mut agent, 0, bpdu(3, 0, 3));
        assert_eq!(agent.belief(), bpdu(3, 1, 3));
        assert_eq!(agent.root_port(), Some(0));
        assert!(changed(&out));
        assert_eq!(sends(&out), vec![1, 2]);
    }

    #[test]
    fn upstream_claim_larger_than_own_id_is_not_followed() {
        let mut agent = agent();
        receive(&mut agent, 2, bpdu(2, 0, 2));
        receive(&mut agent, 2, bpdu(7, 0, 7));
        assert_eq!(agent.belief(), Bpdu::claim(NodeId(5)));
        assert_eq!(agent.state(), AgentState::Root);
    }

    #[test]
    fn sibling_path_readopted_after_root_port_withdraws() {
        let mut agent = agent();
        receive(&mut agent, 0, bpdu(2, 0, 2));
        // Node 4 offers the same path as node 3 but has the larger id.
        receive(&mut agent, 1, bpdu(2, 0, 2));
        receive(&mut agent, 0, bpdu(3, 0, 3));
        assert_eq!(agent.belief(), bpdu(3, 1, 3));
        let out = receive(&mut agent, 1, bpdu(2, 0, 2));
        assert_eq!(agent.belief(), bpdu(2, 1, 2));
        assert_eq!(agent.root_port(), Some(1));
        assert!(changed(&out));
    }

    #[test]
    fn confirming_bpdu_resets_timer_and_relays() {
        let mut agent = agent();
        receive(&mut agent, 0, bpdu(2, 0, 2));
        let armed = agent.next_deadline().unwrap();

        agent.deliver(AgentMessage::Bpdu { port: 0, bpdu: bpdu(2, 0, 2) });
        let later = NOW + Duration::from_millis(100);
        let out = agent.step(later);
        assert!(!changed(&out));
        assert_eq!(sends(&out), vec![1, 2]);
        assert_eq!(agent.next_deadline(), Some(later + timers().reelection));
        assert!(agent.next_deadline().unwrap() > armed);
    }

    #[test]
    fn equal_offer_from_smaller_neighbor_takes_root_port() {
        let mut agent = agent();
        receive(&mut agent, 2, bpdu(2, 1, 2));
        assert_eq!(agent.upstream(), Some(NodeId(7)));
        let out = receive(&mut agent, 0, bpdu(2, 1, 2));
        assert_eq!(agent.upstream(), Some(NodeId(3)));
        assert!(changed(&out));
        assert_eq!(agent.belief(), bpdu(2, 2, 2));
        // Equal offer from a larger neighbor does not move it back.
        receive(&mut agent, 1, bpdu(2, 1, 2));
        assert_eq!(agent.upstream(), Some(NodeId(3)));
    }

    #[test]
    fn reelection_timer_reclaims_root() {
        let mut agent = agent();
        receive(&mut agent, 0, bpdu(2, 0, 2));
        let deadline = agent.next_deadline().unwrap();
        let out = agent.step(deadline);
        assert_eq!(agent.belief(), Bpdu::claim(NodeId(5)));
        assert!(changed(&out));
        assert_eq!(sends(&out), vec![0, 1, 2]);
        assert_eq!(agent.next_deadline(), Some(deadline + timers().hello));
    }

    #[test]
    fn confirmation_in_same_tick_beats_timer() {
        let mut agent = agent();
        receive(&mut agent, 0, bpdu(2, 0, 2));
        let deadline = agent.next_deadline().unwrap();
        agent.deliver(AgentMessage::Bpdu { port: 0, bpdu: bpdu(2, 0, 2) });
        let out = agent.step(deadline);
        assert!(!changed(&out));
        assert_eq!(agent.belief(), bpdu(2, 1, 2));
    }

    #[test]
    fn root_sends_hello_each_interval() {
        let mut agent = agent();
        agent.deliver(AgentMessage::Seed);
        agent.step(Duration::ZERO);
        assert!(sends(&agent.step(Duration::from_millis(49))).is_empty());
        assert_eq!(sends(&agent.step(Duration::from_millis(50))), vec![0, 1, 2]);
        assert_eq!(agent.next_deadline(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn losing_root_port_reclaims_root() {
        let mut agent = agent();
        receive(&mut agent, 1, bpdu(2, 0, 2));
        let out = agent.notify(AgentMessage::NeighborLost { port: 1 }, NOW);
        assert_eq!(agent.belief(), Bpdu::claim(NodeId(5)));
        assert!(changed(&out));
        assert_eq!(sends(&out), vec![0, 2]);
    }

    #[test]
    fn losing_other_port_keeps_belief() {
        let mut agent = agent();
        receive(&mut agent, 1, bpdu(2, 0, 2));
        agent.deliver(AgentMessage::Bpdu { port: 2, bpdu: bpdu(2, 0, 2) });
        let out = agent.notify(AgentMessage::NeighborLost { port: 2 }, NOW);
        assert!(!changed(&out));
        assert_eq!(agent.belief(), bpdu(2, 1, 2));
        assert_eq!(agent.inbox_len(), 0);
        assert_eq!(agent.neighbor_on(2), None);
    }

    #[test]
    fn port_up_advertises_on_new_port() {
        let mut agent = agent();
        agent.deliver(AgentMessage::PortUp { port: 3, neighbor: NodeId(9) });
        let out = agent.step(NOW);
        assert_eq!(sends(&out), vec![3]);
        assert_eq!(agent.neighbor_on(3), Some(NodeId(9)));
    }

    #[test]
    fn malformed_bpdus_are_discarded() {
        let mut agent = agent();
        let out = receive(&mut agent, 0, bpdu(2, 0, 3));
        assert!(out.is_empty());
        let out = receive(&mut agent, 9, bpdu(2, 0, 2));
        assert!(out.is_empty());
        let out = receive(&mut agent, 0, bpdu(2, 4, 5));
        assert!(out.is_empty());
        let out = receive(&mut agent, 0, bpdu(2, u32::MAX, 2));
        assert!(out.is_empty());
        assert_eq!(agent.belief(), Bpdu::claim(NodeId(5)));
    }

    #[test]
    fn unschedulable_timer_degrades_to_self_root() {
        let mut agent = agent();
        let end = Duration::MAX - Duration::from_millis(1);
        agent.deliver(AgentMessage::Bpdu { port: 0, bpdu: bpdu(2, 0, 2) });
        let out = agent.step(end);
        assert_eq!(agent.state(), AgentState::Degraded);
        assert_eq!(agent.belief(), Bpdu::claim(NodeId(5)));
        assert_eq!(agent.next_deadline(), None);
        assert!(sends(&out).len() >= 3);

        // Degraded agents ignore later claims.
        let out = receive(&mut agent, 0, bpdu(2, 0, 2));
        assert!(!changed(&out));
        assert_eq!(agent.belief(), Bpdu::claim(NodeId(5)));
    }

    #[test]
    fn port_roles_from_neighbor_advertisements() {
        let mut agent = agent();
        receive(&mut agent, 0, bpdu(2, 0, 2)); // 5 -> {2,1,2} via 3
        receive(&mut agent, 1, bpdu(2, 1, 2)); // 4 advertises an equal-cost sibling claim
        let roles = agent.port_roles();
        assert_eq!(roles[0].status, PortStatus::RootPort);
        // (2,1,2,4) beats (2,1,2,5): node 4 is designated, 5 blocks.
        assert_eq!(roles[1].status, PortStatus::Blocked);
        assert_eq!(roles[2].status, PortStatus::Unblocked);

        receive(&mut agent, 2, bpdu(7, 0, 7));
        assert_eq!(agent.port_roles()[2].status, PortStatus::DesignatedPort);
    }

    #[test]
    fn resumes_from_recorded_belief() {
        let mut topo = Topology::new();
        topo.insert_node(NodeId(2), 0.0, 0.0).unwrap();
        topo.insert_node(NodeId(3), 0.0, 0.0).unwrap();
        topo.create_link(NodeId(2), NodeId(3)).unwrap();
        topo.record_election([stp_topology::NodeRecord {
            id: NodeId(3),
            root_id: NodeId(2),
            hop_count: 1,
            next_hop: NodeId(2),
            port_statuses: vec![(0, PortStatus::RootPort)],
        }])
        .unwrap();

        let node = topo.node(NodeId(3)).unwrap();
        let resumed = NodeAgent::new(node, timers(), true);
        assert_eq!(resumed.belief(), bpdu(2, 1, 2));
        assert_eq!(resumed.upstream(), Some(NodeId(2)));

        let fresh = NodeAgent::new(node, timers(), false);
        assert_eq!(fresh.belief(), Bpdu::claim(NodeId(3)));
    }
}
