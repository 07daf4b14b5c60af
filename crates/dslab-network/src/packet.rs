//! Packets carried by the network.

use std::net::SocketAddrV4;

use serde::{Deserialize, Serialize};

/// Size of IPv4 + UDP headers.
pub const UDP_HEADER_SIZE: u32 = 28;
/// Size of IPv4 + TCP headers.
pub const TCP_HEADER_SIZE: u32 = 40;

/// Transport protocol of a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    /// Datagrams without delivery guarantees.
    Udp,
    /// Reliable byte stream.
    Tcp,
}

/// TCP segment carried by a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Segment {
    /// Data bytes `[seq, seq + len)` of the stream.
    Data {
        /// First byte carried.
        seq: u64,
        /// Number of payload bytes.
        len: u32,
    },
    /// Cumulative acknowledgment of all bytes before `ack`.
    Ack {
        /// Next expected byte.
        ack: u64,
    },
}

/// A packet in flight.
#[derive(Clone, Debug, Serialize)]
pub struct Packet {
    /// Unique packet id assigned by the network.
    pub uid: u64,
    /// Source endpoint.
    pub src: SocketAddrV4,
    /// Destination endpoint.
    pub dst: SocketAddrV4,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Application payload size in bytes.
    pub payload: u32,
    /// Size on the wire in bytes, including headers.
    pub size: u32,
    /// TCP segment, `None` for UDP.
    pub segment: Option<Segment>,
    /// Time the packet entered the network.
    pub sent_at: f64,
}

impl Packet {
    /// Creates a UDP datagram with `payload` bytes of application data.
    pub fn udp(src: SocketAddrV4, dst: SocketAddrV4, payload: u32) -> Self {
        Self {
            uid: 0,
            src,
            dst,
            protocol: Protocol::Udp,
            payload,
            size: payload.saturating_add(UDP_HEADER_SIZE),
            segment: None,
            sent_at: 0.,
        }
    }

    /// Creates a TCP packet carrying the segment.
    pub fn tcp(src: SocketAddrV4, dst: SocketAddrV4, segment: Segment) -> Self {
        let payload = match segment {
            Segment::Data { len, .. } => len,
            Segment::Ack { .. } => 0,
        };
        Self {
            uid: 0,
            src,
            dst,
            protocol: Protocol::Tcp,
            payload,
            size: payload.saturating_add(TCP_HEADER_SIZE),
            segment: Some(segment),
            sent_at: 0.,
        }
    }

    /// Returns true if the packet belongs to the conversation with the given endpoint in either direction.
    pub fn involves(&self, endpoint: SocketAddrV4) -> bool {
        self.src == endpoint || self.dst == endpoint
    }
}
