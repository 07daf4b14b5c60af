#![doc = include_str!("../README.md")]

pub mod address;
pub mod flow_monitor;
pub mod link;
pub mod network;
pub mod node;
pub mod packet;
pub mod routing;
pub mod sink;
pub mod topology;
pub mod transport;
pub mod units;

pub use address::AddressBlock;
pub use flow_monitor::{FlowKey, FlowMonitor, FlowStats};
pub use link::{Link, LinkId, LinkSpec};
pub use network::{DropReason, Network, PacketDrop, PacketReceived, SetLinkDelay};
pub use node::{Node, NodeId};
pub use packet::{Packet, Protocol, Segment};
pub use sink::PacketSink;
pub use topology::{Topology, TopologyBuilder, TopologyError};
pub use transport::{create_socket, CwndChange, Socket, TransportError, TransportVariant};
pub use units::{DataRate, Delay};
