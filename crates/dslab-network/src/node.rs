//! Network node.

use std::net::Ipv4Addr;

use crate::link::LinkId;

/// Unique node id.
pub type NodeId = usize;

/// Network interface of a node attached to a link.
#[derive(Clone, Debug)]
pub struct Interface {
    /// Link the interface is attached to.
    pub link: LinkId,
    /// Address assigned to the interface.
    pub address: Ipv4Addr,
}

/// A node in the network.
#[derive(Clone, Debug)]
pub struct Node {
    /// Node name.
    pub name: String,
    /// Interfaces in the order of link declaration.
    pub interfaces: Vec<Interface>,
}

impl Node {
    /// Returns the address of the first interface, used to reach the node.
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.interfaces.first().map(|i| i.address)
    }
}
