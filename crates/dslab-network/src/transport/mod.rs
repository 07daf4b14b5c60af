//! Transport endpoints.

pub mod tcp;
pub mod udp;

use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::net::SocketAddrV4;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dslab_core::{Simulation, Subscription};

use crate::network::Network;
use crate::node::NodeId;

pub use tcp::{CongestionControl, TcpSocket};
pub use udp::UdpSocket;

/// Errors returned by transport endpoints.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("port {0} is already in use")]
    PortInUse(SocketAddrV4),
    #[error("node {0} has no network interface")]
    NoAddress(NodeId),
    #[error("no free ephemeral port on node {0}")]
    NoFreePort(NodeId),
    #[error("socket is not bound")]
    NotBound,
    #[error("socket is not connected")]
    NotConnected,
    #[error("socket is closed")]
    Closed,
    #[error("send buffer is full: {requested} bytes requested, {available} available")]
    BufferFull { requested: u32, available: u64 },
    #[error("unknown transport variant '{0}'")]
    UnknownVariant(String),
}

/// Congestion window change, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CwndChange {
    pub old: u32,
    pub new: u32,
}

/// Sending side of a transport connection.
pub trait Socket {
    /// Binds the socket to an ephemeral port of its node.
    fn bind(&mut self) -> Result<SocketAddrV4, TransportError>;

    /// Sets the remote endpoint data is sent to.
    fn connect(&mut self, peer: SocketAddrV4) -> Result<(), TransportError>;

    /// Queues `size` bytes of application data for transmission.
    fn send(&mut self, size: u32) -> Result<(), TransportError>;

    /// Stops accepting data and releases the port once buffered data is delivered.
    ///
    /// Closing a closed socket does nothing.
    fn close(&mut self);

    /// Returns the bound local address.
    fn local_addr(&self) -> Option<SocketAddrV4>;

    /// Subscribes to congestion window changes, if the transport has a congestion window.
    fn cwnd_trace(&mut self) -> Option<Subscription<CwndChange>> {
        None
    }
}

/// Transport protocol and congestion control policy of a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransportVariant {
    TcpNewReno,
    TcpTahoe,
    Udp,
}

impl TransportVariant {
    /// Returns true for variants with a congestion window.
    pub fn is_tcp(&self) -> bool {
        !matches!(self, Self::Udp)
    }
}

impl FromStr for TransportVariant {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches("ns3::") {
            "TcpNewReno" => Ok(Self::TcpNewReno),
            "TcpTahoe" => Ok(Self::TcpTahoe),
            "Udp" => Ok(Self::Udp),
            other => Err(TransportError::UnknownVariant(other.to_string())),
        }
    }
}

impl TryFrom<String> for TransportVariant {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransportVariant> for String {
    fn from(value: TransportVariant) -> Self {
        value.to_string()
    }
}

impl Display for TransportVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TcpNewReno => "TcpNewReno",
            Self::TcpTahoe => "TcpTahoe",
            Self::Udp => "Udp",
        };
        f.write_str(name)
    }
}

/// Creates a socket of the given variant on the node and registers it in the simulation under `name`.
pub fn create_socket(
    variant: TransportVariant,
    node: NodeId,
    network: Rc<RefCell<Network>>,
    sim: &mut Simulation,
    name: &str,
) -> Rc<RefCell<dyn Socket>> {
    let ctx = sim.create_context(name);
    match variant {
        TransportVariant::Udp => Rc::new(RefCell::new(UdpSocket::new(node, network, ctx))),
        TransportVariant::TcpNewReno | TransportVariant::TcpTahoe => {
            let cc = if variant == TransportVariant::TcpTahoe {
                CongestionControl::Tahoe
            } else {
                CongestionControl::NewReno
            };
            let socket = Rc::new(RefCell::new(TcpSocket::new(cc, node, network, ctx)));
            sim.add_handler(name, socket.clone());
            socket
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_variant() {
        assert_eq!("TcpNewReno".parse::<TransportVariant>(), Ok(TransportVariant::TcpNewReno));
        assert_eq!("ns3::TcpTahoe".parse::<TransportVariant>(), Ok(TransportVariant::TcpTahoe));
        assert_eq!("Udp".parse::<TransportVariant>(), Ok(TransportVariant::Udp));
        assert_eq!(
            "TcpCubic".parse::<TransportVariant>(),
            Err(TransportError::UnknownVariant("TcpCubic".to_string()))
        );
        assert!(!TransportVariant::Udp.is_tcp());
        assert_eq!(TransportVariant::TcpTahoe.to_string(), "TcpTahoe");
    }
}
