//! Receiving endpoints.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use dslab_core::{cast, log_debug, Event, EventHandler, SimulationContext};

use crate::network::{Network, PacketReceived};
use crate::node::NodeId;
use crate::packet::{Packet, Segment};
use crate::transport::TransportError;

#[derive(Default)]
struct Reassembly {
    expected: u64,
    // out-of-order ranges keyed by start offset
    pending: BTreeMap<u64, u64>,
}

impl Reassembly {
    /// Accepts bytes `[seq, end)` and returns the number of bytes newly delivered in order.
    fn accept(&mut self, seq: u64, end: u64) -> u64 {
        let before = self.expected;
        if end <= self.expected {
            return 0;
        }
        if seq > self.expected {
            let entry = self.pending.entry(seq).or_insert(end);
            *entry = (*entry).max(end);
            return 0;
        }
        self.expected = end;
        while let Some((&start, &stop)) = self.pending.iter().next() {
            if start > self.expected {
                break;
            }
            self.pending.remove(&start);
            self.expected = self.expected.max(stop);
        }
        self.expected - before
    }
}

/// Application receiving data on a bound port.
///
/// UDP datagrams are counted as they arrive. TCP data is reassembled per sender and acknowledged with cumulative
/// acknowledgments, only bytes delivered in order are counted.
pub struct PacketSink {
    node: NodeId,
    port: u16,
    local: Option<SocketAddrV4>,
    network: Rc<RefCell<Network>>,
    streams: FxHashMap<SocketAddrV4, Reassembly>,
    rx_packets: u64,
    rx_bytes: u64,
    ctx: SimulationContext,
}

impl PacketSink {
    pub fn new(node: NodeId, port: u16, network: Rc<RefCell<Network>>, ctx: SimulationContext) -> Self {
        Self {
            node,
            port,
            local: None,
            network,
            streams: FxHashMap::default(),
            rx_packets: 0,
            rx_bytes: 0,
            ctx,
        }
    }

    /// Binds the sink port, packets sent to it are delivered to this component.
    pub fn listen(&mut self) -> Result<SocketAddrV4, TransportError> {
        if let Some(local) = self.local {
            return Ok(local);
        }
        let local = self.network.borrow_mut().bind(self.node, self.port, Some(self.ctx.id()))?;
        log_debug!(self.ctx, "listening on {}", local);
        self.local = Some(local);
        Ok(local)
    }

    /// Releases the port.
    pub fn stop(&mut self) {
        if let Some(local) = self.local.take() {
            self.network.borrow_mut().unbind(local);
        }
    }

    /// Returns the listening address.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        self.local
    }

    /// Returns the number of received data packets.
    pub fn rx_packets(&self) -> u64 {
        self.rx_packets
    }

    /// Returns the number of application bytes received.
    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes
    }

    fn on_packet(&mut self, packet: Packet) {
        match packet.segment {
            None => {
                self.rx_packets += 1;
                self.rx_bytes += packet.payload as u64;
            }
            Some(Segment::Data { seq, len }) => {
                self.rx_packets += 1;
                let stream = self.streams.entry(packet.src).or_default();
                self.rx_bytes += stream.accept(seq, seq + len as u64);
                let ack = Packet::tcp(packet.dst, packet.src, Segment::Ack { ack: stream.expected });
                self.network.borrow_mut().transmit(self.node, ack);
            }
            Some(Segment::Ack { .. }) => {}
        }
    }
}

impl EventHandler for PacketSink {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            PacketReceived { packet } => {
                self.on_packet(packet);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Reassembly;

    #[test]
    fn reassembly_in_order() {
        let mut r = Reassembly::default();
        assert_eq!(r.accept(0, 100), 100);
        assert_eq!(r.accept(100, 250), 150);
        assert_eq!(r.accept(0, 100), 0);
        assert_eq!(r.expected, 250);
    }

    #[test]
    fn reassembly_fills_hole() {
        let mut r = Reassembly::default();
        assert_eq!(r.accept(0, 100), 100);
        assert_eq!(r.accept(200, 300), 0);
        assert_eq!(r.accept(300, 400), 0);
        assert_eq!(r.expected, 100);
        assert_eq!(r.accept(100, 200), 300);
        assert_eq!(r.expected, 400);
        assert!(r.pending.is_empty());
    }
}
