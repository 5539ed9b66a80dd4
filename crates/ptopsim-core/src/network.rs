pub mod topology;
pub mod types;

pub use petgraph::graph::EdgeIndex;
pub use topology::TopologyError;
pub use types::*;

use crate::routing::{FlowKey, RoutingError, Routes};

use self::topology::Topology;

/// A validated topology together with its installed routing tables.
#[derive(Debug, Clone)]
pub struct Network {
    topology: Topology,
    routes: Routes,
}

impl Network {
    pub fn new(nodes: &[Node], links: &[Link]) -> Result<Self, NetworkError> {
        let topology = Topology::new(nodes, links)?;
        let routes = Routes::install(&topology)?;
        Ok(Self { topology, routes })
    }

    /// The interfaces a packet with flow key `key` traverses from `src` to `dst`.
    pub fn path(
        &self,
        src: NodeId,
        dst: NodeId,
        key: &FlowKey,
    ) -> Result<Vec<EdgeIndex>, RoutingError> {
        let mut acc = Vec::new();
        let mut cur = src;
        let mut incoming = None;
        while cur != dst {
            let e = self.routes.resolve(cur, dst, incoming, key)?;
            acc.push(e);
            // Shortest paths visit every node at most once
            if acc.len() > self.topology.nr_nodes() {
                return Err(RoutingError::Loop { node: cur, dst });
            }
            cur = self.topology.graph[e].dst;
            incoming = Some(e);
        }
        Ok(acc)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    delegate::delegate! {
        to self.topology {
            pub fn nr_nodes(&self) -> usize;

            pub fn nr_edges(&self) -> usize;

            pub fn node(&self, id: NodeId) -> Option<&Node>;

            pub fn channel(&self, eidx: EdgeIndex) -> Option<&Channel>;

            pub fn find_edge(&self, src: NodeId, dst: NodeId) -> Option<EdgeIndex>;

            pub fn endpoints(&self) -> Vec<NodeId>;
        }

        to self.topology.graph {
            pub fn edge_indices(&self) -> impl Iterator<Item = EdgeIndex>;
        }

        to self.topology.links {
            #[call(iter)]
            pub fn links(&self) -> impl Iterator<Item = &Link>;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("invalid topology")]
    Topology(#[from] TopologyError),

    #[error("failed to install routes")]
    Routing(#[from] RoutingError),
}
