//! Static routing.

use std::collections::VecDeque;

use crate::link::LinkId;
use crate::node::NodeId;

/// Next hop on the way to a destination: the outgoing link and the neighbor it leads to.
pub type Hop = (LinkId, NodeId);

/// Static routing table holding the first hop of a shortest path (by hop count) between each pair of nodes.
///
/// Among equally short paths the one using earlier declared links wins, so the routes only depend on the
/// topology description.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    next_hop: Vec<Vec<Option<Hop>>>,
}

impl RoutingTable {
    /// Computes routes for a graph given by adjacency lists ordered by link id.
    pub fn shortest_paths(adjacency: &[Vec<Hop>]) -> Self {
        let node_count = adjacency.len();
        let mut next_hop = vec![vec![None; node_count]; node_count];
        for src in 0..node_count {
            let mut visited = vec![false; node_count];
            visited[src] = true;
            let mut queue = VecDeque::new();
            for &(link, neighbor) in &adjacency[src] {
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    next_hop[src][neighbor] = Some((link, neighbor));
                    queue.push_back(neighbor);
                }
            }
            while let Some(node) = queue.pop_front() {
                let first = next_hop[src][node];
                for &(_, neighbor) in &adjacency[node] {
                    if !visited[neighbor] {
                        visited[neighbor] = true;
                        next_hop[src][neighbor] = first;
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        Self { next_hop }
    }

    /// Returns the next hop from `src` towards `dst`, `None` if unreachable or `src == dst`.
    pub fn next_hop(&self, src: NodeId, dst: NodeId) -> Option<Hop> {
        self.next_hop.get(src)?.get(dst).copied().flatten()
    }
}
