//! The sandbox: topology edits, election runs and the recorded event log.
//!
//! Edits always go through the [`TopologyStore`]. While an election is
//! running each edit is also forwarded to it, so the agents follow the
//! graph without a restart. Once the running election goes quiet its
//! results are written back into the store for display.
//!
//! The event log keeps the newest `max_log_events` events. Older ones are
//! folded into a base snapshot, so sequence numbers and rebuilt state stay
//! valid after a trim.

use serde::{Deserialize, Serialize};
use stp_election::{
    Election, ElectionEvent, ElectionResult, ElectionSnapshot, PacketInFlight, WireBpdu,
};
use stp_topology::{NodeId, PortNumber, Topology, TopologyChange, TopologyStore};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::{Error, Result};

/// Capacity of the live event channel.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// A node in an `initSTP` import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportNode {
    pub id: u32,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub ports: Vec<ImportPort>,
}

/// A port in an `initSTP` import; only the target matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPort {
    pub target_id: u32,
}

/// A link in an `initSTP` import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLink {
    pub source_id: u32,
    pub target_id: u32,
}

/// Payload of the `initSTP` message: a whole topology to load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitStp {
    #[serde(default)]
    pub nodes: Vec<ImportNode>,
    #[serde(default)]
    pub links: Vec<ImportLink>,
}

impl InitStp {
    /// Build a topology from the import.
    ///
    /// Links come from both the link list and the node port lists; pairs
    /// named twice collapse into one link.
    pub fn to_topology(&self) -> Result<Topology> {
        let mut topology = Topology::new();
        for node in &self.nodes {
            if node.id == 0 {
                return Err(Error::InvalidRequest("node id 0 is not a valid bridge id".into()));
            }
            topology.insert_node(NodeId(node.id), node.x, node.y)?;
        }
        let from_ports = self
            .nodes
            .iter()
            .flat_map(|n| n.ports.iter().map(move |p| (n.id, p.target_id)));
        let from_links = self.links.iter().map(|l| (l.source_id, l.target_id));
        for (a, b) in from_links.chain(from_ports) {
            topology.create_link(NodeId(a), NodeId(b))?;
        }
        Ok(topology)
    }
}

/// Summary for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxStatus {
    pub node_count: usize,
    pub link_count: usize,
    pub generation: u64,
    pub running: bool,
    pub converged: bool,
    pub run: u64,
    pub time_ms: u64,
    pub event_count: usize,
    /// Events folded out of the log to respect its cap
    pub events_dropped: u64,
    pub roots: Vec<NodeId>,
}

/// Topology store plus the current election.
#[derive(Debug)]
pub struct Sandbox {
    config: SandboxConfig,
    store: TopologyStore,
    election: Option<Election>,
    /// Newest events of the run, at most `max_log_events` of them
    log: Vec<ElectionEvent>,
    /// State built from the events already dropped from the log
    base: ElectionSnapshot,
    dropped: u64,
    events_tx: broadcast::Sender<ElectionEvent>,
    /// Number of the current election run, starting at 1
    run: u64,
    /// Results changed since they were last written back
    unrecorded: bool,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_topology(Topology::new(), config)
    }

    pub fn with_topology(topology: Topology, config: SandboxConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            store: TopologyStore::from_topology(topology),
            election: None,
            log: Vec::new(),
            base: ElectionSnapshot::default(),
            dropped: 0,
            events_tx,
            run: 0,
            unrecorded: false,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Number of the current election run; 0 before the first start.
    #[must_use]
    pub const fn run(&self) -> u64 {
        self.run
    }

    /// Receive election events as they are produced.
    pub fn subscribe(&self) -> broadcast::Receiver<ElectionEvent> {
        self.events_tx.subscribe()
    }

    /// `CreateNode(x, y)`: add a node with the smallest unused id.
    pub fn create_node(&mut self, x: f64, y: f64) -> Result<NodeId> {
        let (id, change) = self.store.create_node(x, y)?;
        debug!(node = %id, x, y, "Node created");
        self.forward(&change);
        Ok(id)
    }

    /// `CreateLink(a, b)`: link two nodes. Returns false if already linked.
    pub fn create_link(&mut self, a: NodeId, b: NodeId) -> Result<bool> {
        match self.store.create_link(a, b)? {
            Some(change) => {
                debug!(%a, %b, "Link created");
                self.forward(&change);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove the link between two nodes. Returns false if there was none.
    pub fn remove_link(&mut self, a: NodeId, b: NodeId) -> Result<bool> {
        match self.store.remove_link(a, b)? {
            Some(change) => {
                debug!(%a, %b, "Link removed");
                self.forward(&change);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `DeleteNode(id)`: remove a node and every link touching it.
    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        let change = self.store.delete_node(id)?;
        debug!(node = %id, "Node deleted");
        self.forward(&change);
        Ok(())
    }

    /// `StartElection`: start a fresh run over a snapshot of the store.
    ///
    /// Any running election is dropped along with its event log.
    pub fn start_election(&mut self) -> Result<u64> {
        let topology = self.store.snapshot();
        let election = Election::start(&topology, self.config.election.clone())?;
        self.run += 1;
        self.log.clear();
        self.base = ElectionSnapshot::default();
        self.dropped = 0;
        self.election = Some(election);
        self.unrecorded = true;
        self.collect();
        info!(
            run = self.run,
            nodes = topology.node_count(),
            links = topology.link_count(),
            "Election run started"
        );
        Ok(self.run)
    }

    /// Replace the topology with an `initSTP` import and start an election.
    pub fn import(&mut self, init: &InitStp) -> Result<u64> {
        let topology = init.to_topology()?;
        info!(
            nodes = topology.node_count(),
            links = topology.link_count(),
            "Importing topology"
        );
        self.store.replace(topology);
        self.election = None;
        self.start_election()
    }

    /// Advance the running election one tick.
    ///
    /// Returns the events that tick produced.
    pub fn tick(&mut self) -> Vec<ElectionEvent> {
        let Some(election) = self.election.as_mut() else {
            return Vec::new();
        };
        election.step();
        let events = self.collect();
        self.record_if_converged();
        events
    }

    /// Run the current election until it goes quiet.
    pub fn run_to_convergence(&mut self) -> Result<ElectionResult> {
        let max_ticks = self.config.max_ticks;
        let election = self.election.as_mut().ok_or(Error::NoElection)?;
        let outcome = election.run_until_converged(max_ticks);
        self.collect();
        outcome?;
        self.record_if_converged();
        self.result()
    }

    /// Step the current election at most `ticks` ticks, stopping once it
    /// goes quiet.
    ///
    /// Returns the result when converged and `None` while still settling.
    pub fn run_for(&mut self, ticks: u64) -> Result<Option<ElectionResult>> {
        let election = self.election.as_mut().ok_or(Error::NoElection)?;
        let mut taken = 0;
        while taken < ticks && !election.is_converged() {
            election.step();
            taken += 1;
        }
        let converged = election.is_converged();
        self.collect();
        if !converged {
            return Ok(None);
        }
        self.record_if_converged();
        self.result().map(Some)
    }

    /// Beliefs and port roles of the current election.
    pub fn result(&self) -> Result<ElectionResult> {
        self.election
            .as_ref()
            .map(Election::result)
            .ok_or(Error::NoElection)
    }

    /// Feed a BPDU from outside into the running election.
    pub fn inject(&mut self, to: NodeId, port: PortNumber, bpdu: WireBpdu) -> Result<()> {
        let election = self.election.as_mut().ok_or(Error::NoElection)?;
        election.inject(to, port, bpdu)?;
        Ok(())
    }

    /// Copy of the current topology.
    pub fn topology(&self) -> Topology {
        self.store.snapshot()
    }

    /// The retained events of the current run, oldest first.
    #[must_use]
    pub fn events(&self) -> &[ElectionEvent] {
        &self.log
    }

    /// State built from the events dropped ahead of [`Self::events`].
    #[must_use]
    pub const fn base(&self) -> &ElectionSnapshot {
        &self.base
    }

    /// Retained events with `seq >= since`.
    pub fn events_since(&self, since: u64) -> &[ElectionEvent] {
        let start = self.log.partition_point(|e| e.seq < since);
        &self.log[start..]
    }

    /// Election state after the first `up_to` events of the run (all if
    /// `None`). Counts inside the dropped prefix give the oldest state kept.
    pub fn snapshot(&self, up_to: Option<usize>) -> ElectionSnapshot {
        let mut snapshot = self.base.clone();
        let retained = match up_to {
            Some(up_to) => {
                let up_to = u64::try_from(up_to).unwrap_or(u64::MAX);
                &self.log[..self.log.partition_point(|e| e.seq < up_to)]
            }
            None => &self.log[..],
        };
        snapshot.fold(retained);
        snapshot
    }

    /// BPDUs currently on the wire.
    pub fn in_flight(&self) -> Vec<PacketInFlight> {
        self.election
            .as_ref()
            .map(Election::in_flight)
            .unwrap_or_default()
    }

    pub fn status(&self) -> SandboxStatus {
        let (node_count, link_count, generation) =
            self.store.with(|t| (t.node_count(), t.link_count(), t.generation()));
        let (converged, time_ms, roots) = match &self.election {
            Some(election) => {
                let result = election.result();
                (result.converged, result.time_ms, result.root_nodes())
            }
            None => (false, 0, Vec::new()),
        };
        SandboxStatus {
            node_count,
            link_count,
            generation,
            running: self.election.is_some(),
            converged,
            run: self.run,
            time_ms,
            event_count: self.log.len(),
            events_dropped: self.dropped,
            roots,
        }
    }

    fn forward(&mut self, change: &TopologyChange) {
        if let Some(election) = self.election.as_mut() {
            election.apply(change);
            self.unrecorded = true;
            self.collect();
        }
    }

    /// Move new events from the election into the log and out to subscribers.
    ///
    /// Returns the events moved.
    fn collect(&mut self) -> Vec<ElectionEvent> {
        let Some(election) = self.election.as_mut() else {
            return Vec::new();
        };
        let events = election.drain_events();
        for event in &events {
            // No subscribers is fine.
            let _ = self.events_tx.send(*event);
        }
        self.log.extend_from_slice(&events);
        self.trim_log();
        events
    }

    /// Fold the oldest events into `base` once the log is over its cap.
    ///
    /// Trims an eighth of the cap past it so the drain is not paid per tick.
    fn trim_log(&mut self) {
        let cap = self.config.max_log_events.max(1);
        if self.log.len() <= cap {
            return;
        }
        let excess = (self.log.len() - cap + cap / 8).min(self.log.len() - 1);
        self.base.fold(&self.log[..excess]);
        self.log.drain(..excess);
        self.dropped += excess as u64;
        debug!(run = self.run, dropped = self.dropped, "Event log trimmed");
    }

    fn record_if_converged(&mut self) {
        let Some(election) = self.election.as_ref() else {
            return;
        };
        if !self.unrecorded || !election.is_converged() {
            return;
        }
        let result = election.result();
        match self.store.record_election(result.records()) {
            Ok(()) => info!(
                run = self.run,
                time_ms = result.time_ms,
                roots = ?result.root_nodes(),
                "Election converged, results recorded"
            ),
            Err(error) => warn!(%error, "Could not record election results"),
        }
        self.unrecorded = false;
    }
}
