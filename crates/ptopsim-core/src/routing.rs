//! Static ECMP routing. Routes are computed once per destination when the network is built;
//! afterwards, [`Routes::resolve`] is a pure lookup that picks one of the equal-cost output
//! interfaces by hashing the packet's flow key.

use petgraph::{
    graph::{DiGraph, EdgeIndex, EdgeReference, NodeIndex},
    visit::{EdgeFiltered, EdgeRef},
};
use rayon::prelude::*;

use crate::network::{
    topology::Topology,
    types::{Channel, FlowId, Node, NodeId},
};
use crate::units::Nanosecs;

/// The packet fields ECMP hashes on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EcmpHash {
    /// Source and destination only; all flows between two endpoints share one path.
    Endpoints,
    /// Source, destination and flow ID.
    #[default]
    FlowId,
    /// Source, destination, flow ID and flow start time.
    FlowIdAndStart,
}

impl EcmpHash {
    /// Builds the flow key for packets going from `src` to `dst` on behalf of a flow.
    pub fn key(
        self,
        (src, dst): (NodeId, NodeId),
        flow: FlowId,
        start: Nanosecs,
        seed: u64,
    ) -> FlowKey {
        let mut bytes = [0; 32];
        bytes[0..8].copy_from_slice(&(src.inner() as u64).to_le_bytes());
        bytes[8..16].copy_from_slice(&(dst.inner() as u64).to_le_bytes());
        bytes[16..24].copy_from_slice(&(flow.inner() as u64).to_le_bytes());
        bytes[24..32].copy_from_slice(&start.into_u64().to_le_bytes());
        let len = match self {
            EcmpHash::Endpoints => 16,
            EcmpHash::FlowId => 24,
            EcmpHash::FlowIdAndStart => 32,
        };
        FlowKey { bytes, len, seed }
    }
}

/// Flow-identifying packet fields plus the simulation seed. Every packet of a flow carries
/// the same key, so every packet of a flow takes the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    bytes: [u8; 32],
    len: usize,
    seed: u64,
}

impl FlowKey {
    /// The hash used at `node`. Mixing in the node ID decorrelates the choices made at
    /// successive hops.
    pub fn hash_at(&self, node: NodeId) -> Result<u32, RoutingError> {
        let seed = (self.seed as u32)
            ^ (self.seed >> 32) as u32
            ^ (node.inner() as u32).wrapping_mul(0x9e37_79b9);
        let hash = murmur3::murmur3_32(&mut &self.bytes[..self.len], seed)?;
        Ok(hash)
    }
}

type HopMatrix = Vec<HopMap>;
type HopMap = Vec<Vec<EdgeIndex>>;

/// Per-node routing tables: for each node and destination, the output interfaces that lie on
/// a minimum-cost path, in interface order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Routes {
    inner: HopMatrix,
    #[serde(skip)]
    reverse: Vec<EdgeIndex>,
}

impl Routes {
    /// Builds the routing tables of every node. Costs are the sum of link weights, and only
    /// switches relay traffic.
    ///
    /// Fails if some pair of endpoints is not connected.
    pub fn install(topology: &Topology) -> Result<Self, RoutingError> {
        let g = &topology.graph;

        // Each destination is the root of its own shortest-path search. Do these in parallel.
        let destinations = g.node_indices().collect::<Vec<_>>();
        let columns = destinations
            .par_iter()
            .map(|&dst| next_hops_to(g, dst))
            .collect::<Vec<_>>();

        // Merge the results into a single collection
        let nr_nodes = destinations.len();
        let mut hops = vec![vec![Vec::new(); nr_nodes]; nr_nodes];
        for (dst, column) in columns.into_iter().enumerate() {
            for (node, choices) in column {
                hops[node.index()][dst] = choices;
            }
        }

        // CORRECTNESS: Every endpoint must be able to reach every other endpoint.
        let endpoints = topology.endpoints();
        for &src in &endpoints {
            for &dst in &endpoints {
                if src != dst && hops[src.inner()][dst.inner()].is_empty() {
                    return Err(RoutingError::Unreachable { src, dst });
                }
            }
        }

        let reverse = g.edge_indices().map(|e| topology.reverse(e)).collect();
        tracing::info!(
            nr_nodes,
            nr_interfaces = g.edge_count(),
            nr_endpoints = endpoints.len(),
            "installed ECMP routing tables"
        );
        Ok(Self {
            inner: hops,
            reverse,
        })
    }

    /// The equal-cost output interfaces at `from` towards `to`.
    pub fn next_hops(&self, from: NodeId, to: NodeId) -> Option<&[EdgeIndex]> {
        self.inner
            .get(from.inner())
            .and_then(|map| map.get(to.inner()))
            .map(|hops| hops.as_slice())
    }

    /// Picks the output interface for a packet with flow key `key` at `node`, headed for
    /// `dst`, that arrived over `incoming` (`None` if the packet originates at `node`).
    pub fn resolve(
        &self,
        node: NodeId,
        dst: NodeId,
        incoming: Option<EdgeIndex>,
        key: &FlowKey,
    ) -> Result<EdgeIndex, RoutingError> {
        let choices = self
            .next_hops(node, dst)
            .filter(|choices| !choices.is_empty())
            .ok_or(RoutingError::NoRoute { node, dst })?;
        let egress = choices[key.hash_at(node)? as usize % choices.len()];
        // Shortest paths never double back
        if incoming.is_some_and(|e| self.reverse.get(e.index()) == Some(&egress)) {
            return Err(RoutingError::Loop { node, dst });
        }
        Ok(egress)
    }
}

fn next_hops_to(g: &DiGraph<Node, Channel>, dst: NodeIndex) -> Vec<(NodeIndex, Vec<EdgeIndex>)> {
    // Links are symmetric, so costs from `dst` outwards equal costs towards `dst`. A node is
    // only expanded if it is `dst` itself or a switch.
    let relays = EdgeFiltered::from_fn(g, |e: EdgeReference<'_, Channel>| {
        e.source() == dst || g[e.source()].kind.is_switch()
    });
    let costs = petgraph::algo::dijkstra(&relays, dst, None, |e| e.weight().weight);
    g.node_indices()
        .filter(|&n| n != dst)
        .filter_map(|n| {
            let &cost = costs.get(&n)?;
            let mut choices = g
                .edges(n)
                .filter(|e| {
                    let next = e.target();
                    (next == dst || g[next].kind.is_switch())
                        && costs
                            .get(&next)
                            .is_some_and(|&c| c + e.weight().weight == cost)
                })
                .map(|e| e.id())
                .collect::<Vec<_>>();
            choices.sort_unstable();
            Some((n, choices))
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no route from endpoint {src} to endpoint {dst}")]
    Unreachable { src: NodeId, dst: NodeId },

    #[error("node {node} has no route to {dst}")]
    NoRoute { node: NodeId, dst: NodeId },

    #[error("node {node} would send a packet for {dst} back where it came from")]
    Loop { node: NodeId, dst: NodeId },

    #[error("failed to hash flow key")]
    Hash(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::network::types::Link;
    use crate::testing;
    use crate::units::{Gbps, Nanosecs};
    use anyhow::Context;

    type SortedHopMatrix = BTreeMap<NodeId, SortedHopMap>;
    type SortedHopMap = BTreeMap<NodeId, Vec<NodeId>>;

    /// Generate a stable next-hop view of the routing tables for snapshot tests
    fn sorted_hop_matrix(routes: &Routes, topo: &Topology) -> SortedHopMatrix {
        routes
            .inner
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let m = m
                    .iter()
                    .enumerate()
                    .filter(|(_, hops)| !hops.is_empty())
                    .map(|(j, hops)| {
                        let mut hops = hops
                            .iter()
                            .map(|&e| topo.channel(e).unwrap().dst)
                            .collect::<Vec<_>>();
                        hops.sort();
                        (NodeId::new(j), hops)
                    })
                    .collect::<BTreeMap<_, _>>();
                (NodeId::new(i), m)
            })
            .collect::<BTreeMap<_, _>>()
    }

    fn square(w_top: u64, w_bottom: u64) -> anyhow::Result<Topology> {
        // 0 - 1 - 3 on top, 0 - 2 - 3 at the bottom
        let nodes = vec![
            Node::new_tor(NodeId::new(0)),
            Node::new_switch(NodeId::new(1)),
            Node::new_switch(NodeId::new(2)),
            Node::new_tor(NodeId::new(3)),
        ];
        let link = |a: usize, b: usize, w: u64| {
            Link::new(NodeId::new(a), NodeId::new(b), Gbps::new(10), Nanosecs::new(1000))
                .with_weight(w)
        };
        let links = vec![
            link(0, 1, w_top),
            link(1, 3, w_top),
            link(0, 2, w_bottom),
            link(2, 3, w_bottom),
        ];
        Topology::new(&nodes, &links).context("failed to create topology")
    }

    #[test]
    fn route_three_node_works() -> anyhow::Result<()> {
        let (nodes, links) = testing::three_node_config();
        let topo = Topology::new(&nodes, &links).context("failed to create topology")?;
        let routes = Routes::install(&topo)?;
        let hops = sorted_hop_matrix(&routes, &topo);
        insta::assert_yaml_snapshot!(hops, @r###"
        ---
        0:
          1:
            - 2
          2:
            - 2
        1:
          0:
            - 2
          2:
            - 2
        2:
          0:
            - 0
          1:
            - 1
        "###);
        Ok(())
    }

    #[test]
    fn route_eight_node_works() -> anyhow::Result<()> {
        let (nodes, links) = testing::eight_node_config();
        let topo = Topology::new(&nodes, &links).context("failed to create topology")?;
        let routes = Routes::install(&topo)?;
        let hops = sorted_hop_matrix(&routes, &topo);
        insta::assert_yaml_snapshot!(hops, @r###"
        ---
        0:
          1:
            - 4
          2:
            - 4
          3:
            - 4
          4:
            - 4
          5:
            - 4
          6:
            - 4
          7:
            - 4
        1:
          0:
            - 4
          2:
            - 4
          3:
            - 4
          4:
            - 4
          5:
            - 4
          6:
            - 4
          7:
            - 4
        2:
          0:
            - 5
          1:
            - 5
          3:
            - 5
          4:
            - 5
          5:
            - 5
          6:
            - 5
          7:
            - 5
        3:
          0:
            - 5
          1:
            - 5
          2:
            - 5
          4:
            - 5
          5:
            - 5
          6:
            - 5
          7:
            - 5
        4:
          0:
            - 0
          1:
            - 1
          2:
            - 6
            - 7
          3:
            - 6
            - 7
          5:
            - 6
            - 7
          6:
            - 6
          7:
            - 7
        5:
          0:
            - 6
            - 7
          1:
            - 6
            - 7
          2:
            - 2
          3:
            - 3
          4:
            - 6
            - 7
          6:
            - 6
          7:
            - 7
        6:
          0:
            - 4
          1:
            - 4
          2:
            - 5
          3:
            - 5
          4:
            - 4
          5:
            - 5
          7:
            - 4
            - 5
        7:
          0:
            - 4
          1:
            - 4
          2:
            - 5
          3:
            - 5
          4:
            - 4
          5:
            - 5
          6:
            - 4
            - 5
        "###);
        Ok(())
    }

    #[test]
    fn weights_prune_costlier_paths() -> anyhow::Result<()> {
        let topo = square(1, 5)?;
        let routes = Routes::install(&topo)?;
        let via_top = topo.find_edge(NodeId::new(0), NodeId::new(1)).unwrap();
        assert_eq!(
            routes.next_hops(NodeId::new(0), NodeId::new(3)),
            Some(&[via_top][..])
        );

        let topo = square(2, 2)?;
        let routes = Routes::install(&topo)?;
        let via_bottom = topo.find_edge(NodeId::new(0), NodeId::new(2)).unwrap();
        assert_eq!(
            routes.next_hops(NodeId::new(0), NodeId::new(3)),
            Some(&[via_top, via_bottom][..])
        );
        Ok(())
    }

    #[test]
    fn unreachable_endpoints_fail() {
        let (nodes, links) = testing::disconnected_config();
        let topo = Topology::new(&nodes, &links).unwrap();
        assert!(matches!(
            Routes::install(&topo),
            Err(RoutingError::Unreachable { .. })
        ));
    }

    #[test]
    fn resolve_is_deterministic() -> anyhow::Result<()> {
        let (nodes, links) = testing::eight_node_config();
        let topo = Topology::new(&nodes, &links)?;
        let routes = Routes::install(&topo)?;
        let (src, dst) = (NodeId::new(4), NodeId::new(3));
        for i in 0..100 {
            let key = EcmpHash::FlowId.key((src, dst), FlowId::new(i), Nanosecs::ZERO, 42);
            let first = routes.resolve(src, dst, None, &key)?;
            for _ in 0..10 {
                assert_eq!(routes.resolve(src, dst, None, &key)?, first);
            }
        }
        Ok(())
    }

    #[test]
    fn resolve_spreads_flows() -> anyhow::Result<()> {
        let (nodes, links) = testing::eight_node_config();
        let topo = Topology::new(&nodes, &links)?;
        let routes = Routes::install(&topo)?;
        let (tor, dst) = (NodeId::new(4), NodeId::new(3));
        let up1 = topo.find_edge(tor, NodeId::new(6)).unwrap();
        let mut nr_up1 = 0;
        for i in 0..100 {
            let key = EcmpHash::FlowId.key(
                (NodeId::new(0), dst),
                FlowId::new(i),
                Nanosecs::ZERO,
                123_456_789,
            );
            if routes.resolve(tor, dst, None, &key)? == up1 {
                nr_up1 += 1;
            }
        }
        assert!((25..=75).contains(&nr_up1), "unbalanced ECMP: {nr_up1}/100");
        Ok(())
    }

    #[test]
    fn endpoint_hash_ignores_flow_id() -> anyhow::Result<()> {
        let ends = (NodeId::new(0), NodeId::new(3));
        let k1 = EcmpHash::Endpoints.key(ends, FlowId::new(1), Nanosecs::new(5), 7);
        let k2 = EcmpHash::Endpoints.key(ends, FlowId::new(2), Nanosecs::new(9), 7);
        assert_eq!(k1.hash_at(NodeId::new(4))?, k2.hash_at(NodeId::new(4))?);
        let k1 = EcmpHash::FlowIdAndStart.key(ends, FlowId::new(1), Nanosecs::new(5), 7);
        let k2 = EcmpHash::FlowIdAndStart.key(ends, FlowId::new(1), Nanosecs::new(9), 7);
        assert_ne!(k1, k2);
        Ok(())
    }

    #[test]
    fn resolve_detects_loops() -> anyhow::Result<()> {
        let (nodes, links) = testing::eight_node_config();
        let topo = Topology::new(&nodes, &links)?;
        let routes = Routes::install(&topo)?;
        let (tor, server) = (NodeId::new(4), NodeId::new(0));
        let key = EcmpHash::FlowId.key((tor, server), FlowId::ZERO, Nanosecs::ZERO, 0);
        let from_server = topo.find_edge(server, tor).unwrap();
        assert!(matches!(
            routes.resolve(tor, server, Some(from_server), &key),
            Err(RoutingError::Loop { .. })
        ));
        Ok(())
    }

    #[test]
    fn resolve_without_route_fails() -> anyhow::Result<()> {
        let (nodes, links) = testing::three_node_config();
        let topo = Topology::new(&nodes, &links)?;
        let routes = Routes::install(&topo)?;
        let node = NodeId::new(0);
        let key = EcmpHash::FlowId.key((node, node), FlowId::ZERO, Nanosecs::ZERO, 0);
        assert!(matches!(
            routes.resolve(node, node, None, &key),
            Err(RoutingError::NoRoute { .. })
        ));
        Ok(())
    }
}
