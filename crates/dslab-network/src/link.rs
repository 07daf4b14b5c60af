//! Point-to-point links.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::address::AddressBlock;
use crate::node::NodeId;
use crate::units::{DataRate, Delay};

/// Link identifier, equal to the link position in declaration order.
pub type LinkId = usize;

/// Declarative description of a point-to-point link.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Name of the first endpoint node.
    pub a: String,
    /// Name of the second endpoint node.
    pub b: String,
    /// Link rate.
    pub rate: DataRate,
    /// Propagation delay.
    pub delay: Delay,
    /// Probability of dropping a packet on reception.
    #[serde(default)]
    pub error_rate: Option<f64>,
    /// Explicit address block, allocated automatically if not set.
    #[serde(default)]
    pub network: Option<AddressBlock>,
    /// Capacity of the transmit queue in packets, network default if not set.
    #[serde(default)]
    pub queue_size: Option<usize>,
}

impl LinkSpec {
    /// Creates a lossless link description with automatic addressing.
    pub fn new(a: &str, b: &str, rate: DataRate, delay: Delay) -> Self {
        Self {
            a: a.to_string(),
            b: b.to_string(),
            rate,
            delay,
            error_rate: None,
            network: None,
            queue_size: None,
        }
    }

    /// Sets the packet loss probability.
    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = Some(error_rate);
        self
    }

    /// Sets explicit address block.
    pub fn with_network(mut self, network: AddressBlock) -> Self {
        self.network = Some(network);
        self
    }

    /// Sets the transmit queue capacity.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = Some(queue_size);
        self
    }
}

/// A link materialized in the topology.
#[derive(Clone, Debug)]
pub struct Link {
    /// Link id.
    pub id: LinkId,
    /// Description the link was built from.
    pub spec: LinkSpec,
    /// Endpoint nodes, in the order of `spec.a` and `spec.b`.
    pub nodes: [NodeId; 2],
    /// Address block of the link segment.
    pub block: AddressBlock,
    /// Interface addresses of the endpoints.
    pub addresses: [Ipv4Addr; 2],
}

impl Link {
    /// Returns the index of the transmission direction starting at `from`.
    pub fn direction(&self, from: NodeId) -> Option<usize> {
        self.nodes.iter().position(|&n| n == from)
    }

    /// Returns the node on the other side of the link.
    pub fn peer(&self, node: NodeId) -> Option<NodeId> {
        self.direction(node).map(|d| self.nodes[1 - d])
    }

    /// Returns the packet loss probability applied on reception.
    pub fn error_rate(&self) -> f64 {
        self.spec.error_rate.unwrap_or(0.)
    }
}
