//! Packet-level network model.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use dslab_core::notify::{Publisher, Subscription};
use dslab_core::{cast, log_debug, log_trace, Event, EventHandler, Id, SimulationContext};

use crate::flow_monitor::FlowMonitor;
use crate::link::LinkId;
use crate::node::NodeId;
use crate::packet::Packet;
use crate::topology::Topology;
use crate::transport::TransportError;

/// Default capacity of link transmit queues in packets.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// First port used for ephemeral bindings.
pub const EPHEMERAL_PORT_START: u16 = 49153;

/// Why a packet was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DropReason {
    /// The transmit queue of the link was full.
    QueueOverflow,
    /// The receive-side error model corrupted the packet.
    ErrorModel,
    /// The destination address is unknown or unreachable.
    NoRoute,
    /// Nothing is bound to the destination port.
    NoEndpoint,
}

/// Notification about a dropped packet.
#[derive(Clone, Debug, Serialize)]
pub struct PacketDrop {
    /// Link the packet was dropped at, if any.
    pub link: Option<LinkId>,
    /// Node the packet was dropped at.
    pub node: NodeId,
    /// Drop reason.
    pub reason: DropReason,
    /// Dropped packet.
    pub packet: Packet,
}

/// Packet reached the receiving end of a link.
#[derive(Clone, Serialize)]
pub struct PacketArrived {
    packet: Packet,
    link: LinkId,
    node: NodeId,
}

/// Packet delivered to the endpoint bound to its destination port.
#[derive(Clone, Serialize)]
pub struct PacketReceived {
    /// Delivered packet.
    pub packet: Packet,
}

/// Request to change the propagation delay of a link.
#[derive(Clone, Serialize)]
pub struct SetLinkDelay {
    /// Link to change.
    pub link: LinkId,
    /// New delay in seconds.
    pub delay: f64,
}

#[derive(Default)]
struct LinkQueue {
    capacity: usize,
    busy_until: f64,
    // completion times of packets queued or being transmitted
    departures: VecDeque<f64>,
}

/// Store-and-forward network over a built [`Topology`].
///
/// Each link direction has a drop-tail transmit queue served at the link rate. A transmitted packet arrives at the
/// other side after the propagation delay, where the link error model may drop it. Packets are forwarded along static
/// shortest-path routes and delivered to the component bound to the destination port via [`PacketReceived`] events.
pub struct Network {
    topology: Rc<Topology>,
    delays: Vec<f64>,
    queues: Vec<[LinkQueue; 2]>,
    endpoints: FxHashMap<(NodeId, u16), Option<Id>>,
    next_ephemeral: Vec<u16>,
    packet_counter: u64,
    drops: Publisher<PacketDrop>,
    flow_monitor: Option<Rc<RefCell<FlowMonitor>>>,
    ctx: SimulationContext,
}

impl Network {
    /// Creates a network with the given default queue capacity for links which do not specify one.
    pub fn new(topology: Rc<Topology>, default_queue_size: usize, ctx: SimulationContext) -> Self {
        let delays = topology.links().iter().map(|l| l.spec.delay.secs()).collect();
        let queues = topology
            .links()
            .iter()
            .map(|l| {
                let capacity = l.spec.queue_size.unwrap_or(default_queue_size);
                [
                    LinkQueue {
                        capacity,
                        ..Default::default()
                    },
                    LinkQueue {
                        capacity,
                        ..Default::default()
                    },
                ]
            })
            .collect();
        let node_count = topology.node_count();
        Self {
            topology,
            delays,
            queues,
            endpoints: FxHashMap::default(),
            next_ephemeral: vec![EPHEMERAL_PORT_START; node_count],
            packet_counter: 0,
            drops: Publisher::new(),
            flow_monitor: None,
            ctx,
        }
    }

    /// Returns the component id of the network.
    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Returns the topology the network runs on.
    pub fn topology(&self) -> Rc<Topology> {
        self.topology.clone()
    }

    /// Makes the monitor observe every transmission, reception and drop.
    pub fn install_flow_monitor(&mut self, monitor: Rc<RefCell<FlowMonitor>>) {
        self.flow_monitor = Some(monitor);
    }

    /// Subscribes to all packet drops.
    pub fn subscribe_drops(&mut self) -> Subscription<PacketDrop> {
        self.drops.subscribe()
    }

    /// Subscribes to packet drops satisfying the predicate.
    pub fn subscribe_drops_filtered<F>(&mut self, filter: F) -> Subscription<PacketDrop>
    where
        F: Fn(&PacketDrop) -> bool + 'static,
    {
        self.drops.subscribe_filtered(filter)
    }

    fn node_endpoint(&self, node: NodeId, port: u16) -> Result<SocketAddrV4, TransportError> {
        let addr = self.topology.node_address(node).ok_or(TransportError::NoAddress(node))?;
        Ok(SocketAddrV4::new(addr, port))
    }

    /// Binds the port on the node. Packets destined to it are delivered to `handler`,
    /// or dropped if `handler` is `None`.
    pub fn bind(&mut self, node: NodeId, port: u16, handler: Option<Id>) -> Result<SocketAddrV4, TransportError> {
        let endpoint = self.node_endpoint(node, port)?;
        if self.endpoints.contains_key(&(node, port)) {
            return Err(TransportError::PortInUse(endpoint));
        }
        self.endpoints.insert((node, port), handler);
        log_debug!(self.ctx, "bound {} on node {}", endpoint, self.topology.node(node).name);
        Ok(endpoint)
    }

    /// Binds the next free ephemeral port on the node.
    pub fn bind_ephemeral(&mut self, node: NodeId, handler: Option<Id>) -> Result<SocketAddrV4, TransportError> {
        let start = self.next_ephemeral[node];
        let mut port = start;
        while self.endpoints.contains_key(&(node, port)) {
            port = if port == u16::MAX { EPHEMERAL_PORT_START } else { port + 1 };
            if port == start {
                return Err(TransportError::NoFreePort(node));
            }
        }
        self.next_ephemeral[node] = if port == u16::MAX { EPHEMERAL_PORT_START } else { port + 1 };
        self.bind(node, port, handler)
    }

    /// Releases the binding.
    pub fn unbind(&mut self, endpoint: SocketAddrV4) {
        if let Some(node) = self.topology.node_by_address(*endpoint.ip()) {
            if self.endpoints.remove(&(node, endpoint.port())).is_some() {
                log_debug!(self.ctx, "unbound {}", endpoint);
            }
        }
    }

    /// Returns the current propagation delay of the link.
    pub fn link_delay(&self, link: LinkId) -> f64 {
        self.delays[link]
    }

    /// Changes the propagation delay of the link for packets transmitted from now on.
    pub fn set_link_delay(&mut self, link: LinkId, delay: f64) {
        log_debug!(self.ctx, "link {} delay {} -> {}", link, self.delays[link], delay);
        self.delays[link] = delay;
    }

    /// Hands the packet over to the network at its source node.
    pub fn transmit(&mut self, node: NodeId, mut packet: Packet) {
        self.packet_counter += 1;
        packet.uid = self.packet_counter;
        packet.sent_at = self.ctx.time();
        if let Some(monitor) = &self.flow_monitor {
            monitor.borrow_mut().record_tx(packet.sent_at, &packet);
        }
        self.forward(node, packet);
    }

    fn forward(&mut self, node: NodeId, packet: Packet) {
        let Some(dst_node) = self.topology.node_by_address(*packet.dst.ip()) else {
            self.drop_packet(packet, node, None, DropReason::NoRoute);
            return;
        };
        if dst_node == node {
            self.deliver(node, packet);
            return;
        }
        match self.topology.next_hop(node, dst_node) {
            Some((link, next)) => self.enqueue(link, node, next, packet),
            None => self.drop_packet(packet, node, None, DropReason::NoRoute),
        }
    }

    fn enqueue(&mut self, link_id: LinkId, from: NodeId, to: NodeId, packet: Packet) {
        let now = self.ctx.time();
        let link = self.topology.link(link_id);
        let Some(dir) = link.direction(from) else {
            self.drop_packet(packet, from, Some(link_id), DropReason::NoRoute);
            return;
        };
        let tx_time = link.spec.rate.transmission_time(packet.size);
        let queue = &mut self.queues[link_id][dir];
        while queue.departures.front().map_or(false, |&t| t <= now) {
            queue.departures.pop_front();
        }
        if queue.departures.len() >= queue.capacity {
            self.drop_packet(packet, from, Some(link_id), DropReason::QueueOverflow);
            return;
        }
        let done = queue.busy_until.max(now) + tx_time;
        queue.busy_until = done;
        queue.departures.push_back(done);
        let delay = done - now + self.delays[link_id];
        self.ctx.emit_self(
            PacketArrived {
                packet,
                link: link_id,
                node: to,
            },
            delay,
        );
    }

    fn on_arrival(&mut self, packet: Packet, link: LinkId, node: NodeId) {
        let error_rate = self.topology.link(link).error_rate();
        if error_rate > 0. && self.ctx.rand() < error_rate {
            self.drop_packet(packet, node, Some(link), DropReason::ErrorModel);
            return;
        }
        self.forward(node, packet);
    }

    fn deliver(&mut self, node: NodeId, packet: Packet) {
        match self.endpoints.get(&(node, packet.dst.port())) {
            Some(Some(handler)) => {
                let handler = *handler;
                if let Some(monitor) = &self.flow_monitor {
                    monitor.borrow_mut().record_rx(self.ctx.time(), &packet);
                }
                self.ctx.emit_now(PacketReceived { packet }, handler);
            }
            _ => self.drop_packet(packet, node, None, DropReason::NoEndpoint),
        }
    }

    fn drop_packet(&mut self, packet: Packet, node: NodeId, link: Option<LinkId>, reason: DropReason) {
        log_trace!(
            self.ctx,
            "dropped packet {} {} -> {} at node {} ({:?})",
            packet.uid,
            packet.src,
            packet.dst,
            node,
            reason
        );
        if let Some(monitor) = &self.flow_monitor {
            monitor.borrow_mut().record_drop(&packet, reason);
        }
        self.drops.publish(
            self.ctx.time(),
            PacketDrop {
                link,
                node,
                reason,
                packet,
            },
        );
    }
}

impl EventHandler for Network {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            PacketArrived { packet, link, node } => {
                self.on_arrival(packet, link, node);
            }
            SetLinkDelay { link, delay } => {
                if link < self.delays.len() {
                    self.set_link_delay(link, delay);
                }
            }
        })
    }
}
