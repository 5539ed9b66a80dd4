use std::collections::HashSet;

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};

use crate::network::types::{Channel, ErrorModel, Link, Node, NodeId, NodeKind};
use crate::units::BitsPerSec;

/// The topology graph. Node `i` of the graph has ID `i`, and the two channels of link `i`
/// are edges `2i` (from `a` to `b`) and `2i + 1` (from `b` to `a`).
#[derive(Debug, Clone)]
pub struct Topology {
    pub(crate) graph: DiGraph<Node, Channel>,
    pub(crate) links: Vec<Link>,
}

impl Topology {
    /// Creates a network topology from a list of nodes and links. This function returns an error if
    /// the given specification fails to produce a valid topology.
    ///
    /// Correctness properties:
    ///
    /// - Every node must have a unique ID, and the IDs must be `0..nodes.len()`.
    /// - Every link must have distinct endpoints in `nodes`.
    /// - Every link must have a nonzero rate, queue capacity and routing weight.
    /// - Every drop probability must lie in `[0, 1]`.
    /// - Every node must be referenced by some link.
    /// - For any two nodes, there must be at most one link between them.
    /// - Every server must have exactly one link, and it must lead to a top-of-rack switch.
    ///
    /// Connectivity is not checked here; unreachable endpoints are reported when routes are
    /// installed.
    pub fn new(nodes: &[Node], links: &[Link]) -> Result<Self, TopologyError> {
        let nr_nodes = nodes.len();
        let mut ids = HashSet::new();
        for &Node { id, .. } in nodes {
            // CORRECTNESS: Every node must have a unique ID.
            if !ids.insert(id) {
                return Err(TopologyError::DuplicateNodeId(id));
            }
            if id.inner() >= nr_nodes {
                return Err(TopologyError::NodeIdOutOfRange { id, nr_nodes });
            }
        }
        let mut sorted = nodes.to_vec();
        sorted.sort_by_key(|n| n.id);
        let mut g = DiGraph::with_capacity(nr_nodes, 2 * links.len());
        for n in sorted {
            g.add_node(n);
        }
        let idx_of = |id: NodeId| NodeIndex::new(id.inner());
        let mut referenced_nodes = HashSet::new();
        for link in links {
            let Link { a, b, .. } = *link;
            // CORRECTNESS: Every link must have distinct endpoints in `nodes`.
            if a == b {
                return Err(TopologyError::NodeAdjacentSelf(a));
            }
            if !ids.contains(&a) {
                return Err(TopologyError::UndeclaredNode(a));
            }
            if !ids.contains(&b) {
                return Err(TopologyError::UndeclaredNode(b));
            }
            if link.bandwidth == BitsPerSec::ZERO {
                return Err(TopologyError::ZeroBandwidth { a, b });
            }
            if link.queue.capacity().is_zero() {
                return Err(TopologyError::ZeroQueueCapacity { a, b });
            }
            if link.weight == 0 {
                return Err(TopologyError::ZeroWeight { a, b });
            }
            if let ErrorModel::IidUniform { drop_prob } = link.error_model {
                if !(0.0..=1.0).contains(&drop_prob) {
                    return Err(TopologyError::InvalidDropProbability { a, b, drop_prob });
                }
            }
            referenced_nodes.insert(a);
            referenced_nodes.insert(b);
            // Channels are unidirectional
            g.add_edge(idx_of(a), idx_of(b), Channel::new(a, b, link));
            g.add_edge(idx_of(b), idx_of(a), Channel::new(b, a, link));
        }
        // CORRECTNESS: Every node must be referenced by some link.
        for n in g.node_weights() {
            if !referenced_nodes.contains(&n.id) {
                return Err(TopologyError::IsolatedNode(n.id));
            }
        }
        for eidx in g.edge_indices() {
            // CORRECTNESS: For any two nodes, there must be at most one link between them.
            let (a, b) = g.edge_endpoints(eidx).unwrap();
            if g.edges_connecting(a, b).count() > 1 {
                return Err(TopologyError::DuplicateLink {
                    n1: g[a].id,
                    n2: g[b].id,
                });
            }
            // CORRECTNESS: Every server must have one link, to a ToR
            let Node { id, kind } = g[a];
            if matches!(kind, NodeKind::Server) {
                let nr_outgoing = g.edges(a).count();
                if nr_outgoing > 1 {
                    return Err(TopologyError::TooManyServerLinks { id, n: nr_outgoing });
                }
                if !matches!(g[b].kind, NodeKind::Tor) {
                    return Err(TopologyError::ServerNotOnTor { id, peer: g[b].id });
                }
            }
        }
        Ok(Self {
            graph: g,
            links: links.to_vec(),
        })
    }

    pub fn nr_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn nr_edges(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node_weight(NodeIndex::new(id.inner()))
    }

    pub fn channel(&self, eidx: EdgeIndex) -> Option<&Channel> {
        self.graph.edge_weight(eidx)
    }

    pub fn find_edge(&self, src: NodeId, dst: NodeId) -> Option<EdgeIndex> {
        if src.inner() >= self.nr_nodes() || dst.inner() >= self.nr_nodes() {
            return None;
        }
        self.graph
            .find_edge(NodeIndex::new(src.inner()), NodeIndex::new(dst.inner()))
    }

    /// The channel going the opposite way over the same link.
    pub fn reverse(&self, eidx: EdgeIndex) -> EdgeIndex {
        EdgeIndex::new(eidx.index() ^ 1)
    }

    /// Nodes that can source and sink flows: the servers if there are any, otherwise the
    /// top-of-rack switches.
    pub fn endpoints(&self) -> Vec<NodeId> {
        let of_kind = |kind| {
            self.graph
                .node_weights()
                .filter(|n| n.kind == kind)
                .map(|n| n.id)
                .collect::<Vec<_>>()
        };
        let servers = of_kind(NodeKind::Server);
        if servers.is_empty() {
            of_kind(NodeKind::Tor)
        } else {
            servers
        }
    }

    pub fn is_connected(&self) -> bool {
        petgraph::algo::connected_components(&self.graph) == 1
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Duplicate node ID {0}")]
    DuplicateNodeId(NodeId),

    #[error("Node ID {id} is out of range (topology has {nr_nodes} nodes)")]
    NodeIdOutOfRange { id: NodeId, nr_nodes: usize },

    #[error("Node {0} is connected to itself")]
    NodeAdjacentSelf(NodeId),

    #[error("Node {0} is not declared")]
    UndeclaredNode(NodeId),

    #[error("Link between {a} and {b} has zero bandwidth")]
    ZeroBandwidth { a: NodeId, b: NodeId },

    #[error("Link between {a} and {b} has zero queue capacity")]
    ZeroQueueCapacity { a: NodeId, b: NodeId },

    #[error("Link between {a} and {b} has zero routing weight")]
    ZeroWeight { a: NodeId, b: NodeId },

    #[error("Link between {a} and {b} has drop probability {drop_prob} outside [0, 1]")]
    InvalidDropProbability { a: NodeId, b: NodeId, drop_prob: f64 },

    #[error("Duplicate links between {n1} and {n2}")]
    DuplicateLink { n1: NodeId, n2: NodeId },

    #[error("Server {id} has too many links (expected 1, got {n})")]
    TooManyServerLinks { id: NodeId, n: usize },

    #[error("Server {id} is attached to {peer}, which is not a top-of-rack switch")]
    ServerNotOnTor { id: NodeId, peer: NodeId },

    #[error("Node {0} is not connected to any other node")]
    IsolatedNode(NodeId),
}
