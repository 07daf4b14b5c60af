//! Datagram socket.

use std::cell::RefCell;
use std::net::SocketAddrV4;
use std::rc::Rc;

use dslab_core::{log_debug, SimulationContext};

use crate::network::Network;
use crate::node::NodeId;
use crate::packet::Packet;
use crate::transport::{Socket, TransportError};

/// Connectionless socket emitting one datagram per send.
pub struct UdpSocket {
    node: NodeId,
    network: Rc<RefCell<Network>>,
    local: Option<SocketAddrV4>,
    peer: Option<SocketAddrV4>,
    ctx: SimulationContext,
}

impl UdpSocket {
    pub fn new(node: NodeId, network: Rc<RefCell<Network>>, ctx: SimulationContext) -> Self {
        Self {
            node,
            network,
            local: None,
            peer: None,
            ctx,
        }
    }
}

impl Socket for UdpSocket {
    fn bind(&mut self) -> Result<SocketAddrV4, TransportError> {
        if let Some(local) = self.local {
            return Ok(local);
        }
        let local = self.network.borrow_mut().bind_ephemeral(self.node, None)?;
        self.local = Some(local);
        Ok(local)
    }

    fn connect(&mut self, peer: SocketAddrV4) -> Result<(), TransportError> {
        if self.local.is_none() {
            return Err(TransportError::NotBound);
        }
        self.peer = Some(peer);
        log_debug!(self.ctx, "connected to {}", peer);
        Ok(())
    }

    fn send(&mut self, size: u32) -> Result<(), TransportError> {
        let (Some(local), Some(peer)) = (self.local, self.peer) else {
            return Err(TransportError::NotConnected);
        };
        self.network.borrow_mut().transmit(self.node, Packet::udp(local, peer, size));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(local) = self.local.take() {
            self.network.borrow_mut().unbind(local);
            self.peer = None;
            log_debug!(self.ctx, "closed");
        }
    }

    fn local_addr(&self) -> Option<SocketAddrV4> {
        self.local
    }
}
