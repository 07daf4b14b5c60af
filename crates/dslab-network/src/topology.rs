//! Network topology and its builder.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::address::AddressBlock;
use crate::link::{Link, LinkId, LinkSpec};
use crate::node::{Interface, Node, NodeId};
use crate::routing::{Hop, RoutingTable};

/// Errors detected while building a topology.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    /// Two nodes share a name.
    #[error("node `{0}` is declared more than once")]
    DuplicateNode(String),
    /// A link refers to a node which was not declared.
    #[error("link {link} refers to unknown node `{node}`")]
    UnknownNode {
        /// Offending link.
        link: LinkId,
        /// Missing node name.
        node: String,
    },
    /// Link parameters are out of range.
    #[error("link {link} is invalid: {reason}")]
    InvalidLink {
        /// Offending link.
        link: LinkId,
        /// What is wrong with it.
        reason: String,
    },
    /// Two link segments received overlapping address blocks.
    #[error("address blocks of link {first} ({first_block}) and link {second} ({second_block}) overlap")]
    AddressSpaceConflict {
        /// Link declared first.
        first: LinkId,
        /// Its address block.
        first_block: AddressBlock,
        /// Link declared second.
        second: LinkId,
        /// Its address block.
        second_block: AddressBlock,
    },
    /// Address block cannot hold both link endpoints or automatic allocation ran out of blocks.
    #[error("no usable address block for link {0}")]
    AddressSpaceExhausted(LinkId),
}

/// Collects nodes and link descriptions and materializes them into a [`Topology`].
///
/// # Examples
///
/// ```rust
/// use dslab_network::{DataRate, Delay, LinkSpec, TopologyBuilder};
///
/// let mut builder = TopologyBuilder::new();
/// builder.add_node("sender");
/// builder.add_node("receiver");
/// builder.add_link(LinkSpec::new("sender", "receiver", DataRate::mbps(10.), Delay::ms(20.)));
/// let topology = builder.build().unwrap();
/// assert_eq!(topology.link(0).block.to_string(), "10.1.1.0/24");
/// ```
pub struct TopologyBuilder {
    nodes: Vec<String>,
    links: Vec<LinkSpec>,
    base_block: AddressBlock,
}

impl TopologyBuilder {
    /// Creates a builder which allocates `10.1.<n>.0/24` to the `n`-th link (counting from 1).
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            base_block: AddressBlock::new(Ipv4Addr::new(10, 1, 0, 0), 24).expect("valid prefix length"),
        }
    }

    /// Changes the block which automatic allocation counts from.
    pub fn with_base_block(mut self, base_block: AddressBlock) -> Self {
        self.base_block = base_block;
        self
    }

    /// Declares a node and returns its id.
    pub fn add_node(&mut self, name: &str) -> NodeId {
        self.nodes.push(name.to_string());
        self.nodes.len() - 1
    }

    /// Declares a link and returns its id.
    pub fn add_link(&mut self, spec: LinkSpec) -> LinkId {
        self.links.push(spec);
        self.links.len() - 1
    }

    /// Validates the declarations, allocates addresses and computes routes.
    ///
    /// Fails without producing a partial topology.
    pub fn build(self) -> Result<Topology, TopologyError> {
        let mut node_ids = HashMap::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for name in self.nodes {
            if node_ids.insert(name.clone(), nodes.len()).is_some() {
                return Err(TopologyError::DuplicateNode(name));
            }
            nodes.push(Node {
                name,
                interfaces: Vec::new(),
            });
        }

        let mut links: Vec<Link> = Vec::with_capacity(self.links.len());
        for (id, spec) in self.links.into_iter().enumerate() {
            let lookup = |name: &str| {
                node_ids.get(name).copied().ok_or_else(|| TopologyError::UnknownNode {
                    link: id,
                    node: name.to_string(),
                })
            };
            let a = lookup(&spec.a)?;
            let b = lookup(&spec.b)?;
            validate_link(id, &spec, a, b)?;

            let block = match spec.network {
                Some(block) => block,
                None => self
                    .base_block
                    .nth_next(id as u32 + 1)
                    .ok_or(TopologyError::AddressSpaceExhausted(id))?,
            };
            if let Some(other) = links.iter().find(|l| l.block.overlaps(&block)) {
                return Err(TopologyError::AddressSpaceConflict {
                    first: other.id,
                    first_block: other.block,
                    second: id,
                    second_block: block,
                });
            }
            let addresses = match (block.host(1), block.host(2)) {
                (Some(first), Some(second)) => [first, second],
                _ => return Err(TopologyError::AddressSpaceExhausted(id)),
            };
            links.push(Link {
                id,
                spec,
                nodes: [a, b],
                block,
                addresses,
            });
        }

        let mut adjacency: Vec<Vec<Hop>> = vec![Vec::new(); nodes.len()];
        let mut addr_to_node = FxHashMap::default();
        for link in &links {
            for side in 0..2 {
                let node = link.nodes[side];
                nodes[node].interfaces.push(Interface {
                    link: link.id,
                    address: link.addresses[side],
                });
                addr_to_node.insert(link.addresses[side], node);
                adjacency[node].push((link.id, link.nodes[1 - side]));
            }
        }
        let routes = RoutingTable::shortest_paths(&adjacency);

        Ok(Topology {
            nodes,
            links,
            node_ids,
            addr_to_node,
            routes,
        })
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_link(id: LinkId, spec: &LinkSpec, a: NodeId, b: NodeId) -> Result<(), TopologyError> {
    let invalid = |reason: String| Err(TopologyError::InvalidLink { link: id, reason });
    if a == b {
        return invalid(format!("both ends are attached to `{}`", spec.a));
    }
    if spec.rate.bps() <= 0. || !spec.rate.bps().is_finite() {
        return invalid(format!("rate must be positive, got {}", spec.rate.bps()));
    }
    if spec.delay.secs() < 0. || !spec.delay.secs().is_finite() {
        return invalid(format!("delay must be non-negative, got {}", spec.delay.secs()));
    }
    if let Some(p) = spec.error_rate {
        if !(0. ..=1.).contains(&p) {
            return invalid(format!("error rate must be within [0, 1], got {}", p));
        }
    }
    if spec.queue_size == Some(0) {
        return invalid("queue size must be positive".to_string());
    }
    Ok(())
}

/// Immutable network topology: nodes, links, addresses and routes.
pub struct Topology {
    nodes: Vec<Node>,
    links: Vec<Link>,
    node_ids: HashMap<String, NodeId>,
    addr_to_node: FxHashMap<Ipv4Addr, NodeId>,
    routes: RoutingTable,
}

impl Topology {
    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Returns node id by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.node_ids.get(name).copied()
    }

    /// Returns node by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Returns link by id.
    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id]
    }

    /// Returns all links in declaration order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Returns the address used to reach the node.
    pub fn node_address(&self, id: NodeId) -> Option<Ipv4Addr> {
        self.nodes.get(id).and_then(|n| n.address())
    }

    /// Returns the node owning the interface address.
    pub fn node_by_address(&self, addr: Ipv4Addr) -> Option<NodeId> {
        self.addr_to_node.get(&addr).copied()
    }

    /// Returns the next hop from `src` towards `dst`.
    pub fn next_hop(&self, src: NodeId, dst: NodeId) -> Option<Hop> {
        self.routes.next_hop(src, dst)
    }

    /// Returns the links traversed on the way from `src` to `dst`.
    pub fn path(&self, src: NodeId, dst: NodeId) -> Option<Vec<LinkId>> {
        let mut path = Vec::new();
        let mut node = src;
        while node != dst {
            let (link, next) = self.next_hop(node, dst)?;
            path.push(link);
            node = next;
        }
        Some(path)
    }
}
