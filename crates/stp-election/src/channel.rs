//! Link channels: one FIFO queue per direction of each link.
//!
//! The coordinator pushes every [`AgentOutput::Send`](crate::AgentOutput)
//! into the channel for that link and, on each tick, drains the BPDUs whose
//! transit delay has elapsed. Deliveries in one direction never overtake
//! each other, even if the transit delay changes mid-run.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use stp_topology::{Link, NodeId, PortNumber};

use crate::bpdu::Bpdu;
use crate::events::millis;

/// A BPDU on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    deliver_at: Duration,
    bpdu: Bpdu,
}

/// A BPDU that reached the far end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub to: NodeId,
    pub port: PortNumber,
    pub bpdu: Bpdu,
}

/// A BPDU still travelling, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketInFlight {
    pub from: NodeId,
    pub to: NodeId,
    pub deliver_at_ms: u64,
    #[serde(flatten)]
    pub bpdu: Bpdu,
}

/// Both directions of one link.
#[derive(Debug, Clone)]
pub struct LinkChannel {
    link: Link,
    source_port: PortNumber,
    target_port: PortNumber,
    /// source -> target
    forward: VecDeque<InFlight>,
    /// target -> source
    backward: VecDeque<InFlight>,
}

impl LinkChannel {
    pub fn new(link: Link, source_port: PortNumber, target_port: PortNumber) -> Self {
        Self {
            link,
            source_port,
            target_port,
            forward: VecDeque::new(),
            backward: VecDeque::new(),
        }
    }

    #[must_use]
    pub const fn link(&self) -> Link {
        self.link
    }

    /// Port number of `node`'s end of this link.
    #[must_use]
    pub fn port_of(&self, node: NodeId) -> Option<PortNumber> {
        if node == self.link.source {
            Some(self.source_port)
        } else if node == self.link.target {
            Some(self.target_port)
        } else {
            None
        }
    }

    /// Queue a BPDU sent by `from` for delivery at `deliver_at`.
    ///
    /// Returns false if `from` is not an endpoint of this link.
    pub fn send(&mut self, from: NodeId, bpdu: Bpdu, deliver_at: Duration) -> bool {
        let queue = if from == self.link.source {
            &mut self.forward
        } else if from == self.link.target {
            &mut self.backward
        } else {
            return false;
        };
        // FIFO: never schedule ahead of what is already queued.
        let deliver_at = queue
            .back()
            .map_or(deliver_at, |last| deliver_at.max(last.deliver_at));
        queue.push_back(InFlight { deliver_at, bpdu });
        true
    }

    /// Pop every BPDU due at or before `now`, forward direction first.
    pub fn drain_due(&mut self, now: Duration) -> Vec<Delivery> {
        let mut due = Vec::new();
        while self.forward.front().is_some_and(|p| p.deliver_at <= now) {
            if let Some(packet) = self.forward.pop_front() {
                due.push(Delivery {
                    to: self.link.target,
                    port: self.target_port,
                    bpdu: packet.bpdu,
                });
            }
        }
        while self.backward.front().is_some_and(|p| p.deliver_at <= now) {
            if let Some(packet) = self.backward.pop_front() {
                due.push(Delivery {
                    to: self.link.source,
                    port: self.source_port,
                    bpdu: packet.bpdu,
                });
            }
        }
        due
    }

    /// Number of BPDUs on the wire in either direction.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.forward.len() + self.backward.len()
    }

    #[must_use]
    pub fn packets(&self) -> Vec<PacketInFlight> {
        let forward = self.forward.iter().map(|p| PacketInFlight {
            from: self.link.source,
            to: self.link.target,
            deliver_at_ms: millis(p.deliver_at),
            bpdu: p.bpdu,
        });
        let backward = self.backward.iter().map(|p| PacketInFlight {
            from: self.link.target,
            to: self.link.source,
            deliver_at_ms: millis(p.deliver_at),
            bpdu: p.bpdu,
        });
        forward.chain(backward).collect()
    }

    /// Close the channel, dropping everything in flight.
    pub fn close(&mut self) -> usize {
        let dropped = self.in_flight();
        self.forward.clear();
        self.backward.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn channel() -> LinkChannel {
        LinkChannel::new(Link::new(NodeId(3), NodeId(2)), 1, 4)
    }

    #[test]
    fn ports_follow_normalized_link() {
        let ch = channel();
        assert_eq!(ch.port_of(NodeId(2)), Some(1));
        assert_eq!(ch.port_of(NodeId(3)), Some(4));
        assert_eq!(ch.port_of(NodeId(9)), None);
    }

    #[test]
    fn delivers_after_transit_delay() {
        let mut ch = channel();
        assert!(ch.send(NodeId(2), Bpdu::claim(NodeId(2)), ms(5)));
        assert!(ch.drain_due(ms(4)).is_empty());
        let due = ch.drain_due(ms(5));
        assert_eq!(
            due,
            vec![Delivery {
                to: NodeId(3),
                port: 4,
                bpdu: Bpdu::claim(NodeId(2))
            }]
        );
        assert_eq!(ch.in_flight(), 0);
    }

    #[test]
    fn each_direction_is_fifo() {
        let mut ch = channel();
        let first = Bpdu::claim(NodeId(3));
        let second = Bpdu {
            root_id: NodeId(2),
            hop_count: 1,
            next_hop: NodeId(2),
        };
        ch.send(NodeId(3), first, ms(10));
        ch.send(NodeId(3), second, ms(3));
        assert!(ch.drain_due(ms(3)).is_empty());
        let due = ch.drain_due(ms(10));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].bpdu, first);
        assert_eq!(due[1].bpdu, second);
        assert!(due.iter().all(|d| d.to == NodeId(2) && d.port == 1));
    }

    #[test]
    fn rejects_foreign_sender() {
        let mut ch = channel();
        assert!(!ch.send(NodeId(7), Bpdu::claim(NodeId(7)), ms(1)));
        assert_eq!(ch.in_flight(), 0);
    }

    #[test]
    fn close_drops_in_flight() {
        let mut ch = channel();
        ch.send(NodeId(2), Bpdu::claim(NodeId(2)), ms(5));
        ch.send(NodeId(3), Bpdu::claim(NodeId(3)), ms(5));
        assert_eq!(ch.packets().len(), 2);
        assert_eq!(ch.close(), 2);
        assert!(ch.drain_due(ms(100)).is_empty());
    }
}
