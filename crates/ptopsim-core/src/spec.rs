//! This module defines simulation specifications ([`Spec`]), which consist of nodes, links,
//! and flows. A specification is validated against the [options](crate::opts::SimOpts)
//! before anything is simulated.

use std::collections::HashSet;

use crate::network::{
    types::{Flow, FlowId, Link, Node, NodeId},
    Network, NetworkError,
};
use crate::opts::SimOpts;
use crate::units::{Bytes, Nanosecs};

/// A simulation specification.
#[derive(Debug, Clone, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
pub struct Spec {
    /// Topology nodes.
    pub nodes: Vec<Node>,
    /// Topology links.
    pub links: Vec<Link>,
    /// Workload flows.
    #[builder(default)]
    #[serde(default)]
    pub flows: Vec<Flow>,
}

impl Spec {
    /// Validate a specification, producing a `ValidSpec`.
    ///
    /// Correctness properties:
    ///
    /// - The options must have a nonzero end time and nonzero tracking intervals.
    /// - The transport parameters must have a nonzero segment size and ordered RTO bounds.
    /// - The topology must satisfy the properties listed in `Network::new()`.
    /// - The topology must have at least one link and a single connected component.
    /// - Every flow must run between two distinct endpoints.
    /// - Flow IDs must be unique.
    pub(crate) fn validate(self, opts: &SimOpts) -> Result<ValidSpec, SpecError> {
        if opts.end_time == Nanosecs::ZERO {
            return Err(SpecError::ZeroEndTime);
        }
        for tracking in [&opts.link_utilization, &opts.link_queue] {
            if tracking.enabled && tracking.interval == Nanosecs::ZERO {
                return Err(SpecError::ZeroInterval);
            }
        }
        let tcp = &opts.tcp;
        if tcp.segment_size == Bytes::ZERO {
            return Err(SpecError::ZeroSegmentSize { flow: None });
        }
        if tcp.min_rto > tcp.max_rto || tcp.initial_rto == Nanosecs::ZERO {
            return Err(SpecError::InvalidRto {
                min: tcp.min_rto,
                initial: tcp.initial_rto,
                max: tcp.max_rto,
            });
        }
        let network = Network::new(&self.nodes, &self.links)?;
        // CORRECTNESS: The topology must be one connected component with at least one link.
        if network.topology().links.is_empty() {
            return Err(SpecError::NoLinks);
        }
        if !network.topology().is_connected() {
            return Err(SpecError::Disconnected);
        }
        let endpoints = network.endpoints().into_iter().collect::<HashSet<_>>();
        let mut ids = HashSet::new();
        for flow in &self.flows {
            let Flow { id, src, dst, .. } = *flow;
            // CORRECTNESS: Every flow must have a valid source and destination.
            if !endpoints.contains(&src) {
                return Err(SpecError::InvalidFlowSrc { flow: id, src });
            }
            if !endpoints.contains(&dst) {
                return Err(SpecError::InvalidFlowDst { flow: id, dst });
            }
            if src == dst {
                return Err(SpecError::SameEndpoints { flow: id, node: src });
            }
            // CORRECTNESS: Flow IDs must be unique.
            if !ids.insert(id) {
                return Err(SpecError::DuplicateFlowId(id));
            }
            if flow.overrides.segment_size == Some(Bytes::ZERO) {
                return Err(SpecError::ZeroSegmentSize { flow: Some(id) });
            }
        }
        Ok(ValidSpec {
            network,
            flows: self.flows,
        })
    }
}

/// A `ValidSpec` is a `Spec` that has been validated. The topology and the
/// flows are guaranteed to satisfy properties listed in `Network::new()` and
/// `Spec::validate()`.
#[derive(Debug)]
pub(crate) struct ValidSpec {
    pub(crate) network: Network,
    pub(crate) flows: Vec<Flow>,
}

/// Simulation specification error.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// The end time is zero.
    #[error("simulation end time must be nonzero")]
    ZeroEndTime,

    /// An enabled tracker has a zero interval.
    #[error("tracking interval must be nonzero")]
    ZeroInterval,

    /// A segment size, default or per flow, is zero.
    #[error("segment size must be nonzero (flow {flow:?})")]
    ZeroSegmentSize {
        /// The flow overriding the segment size, if any.
        flow: Option<FlowId>,
    },

    /// The RTO bounds are inconsistent.
    #[error("invalid RTO bounds (min {min}, initial {initial}, max {max})")]
    InvalidRto {
        /// The minimum RTO.
        min: Nanosecs,
        /// The initial RTO.
        initial: Nanosecs,
        /// The maximum RTO.
        max: Nanosecs,
    },

    /// A flow has an invalid source.
    #[error("flow {flow} has an invalid source ({src})")]
    InvalidFlowSrc {
        /// The flow ID.
        flow: FlowId,
        /// The invalid source.
        src: NodeId,
    },

    /// A flow has an invalid destination.
    #[error("flow {flow} has an invalid destination ({dst})")]
    InvalidFlowDst {
        /// The flow ID.
        flow: FlowId,
        /// The invalid destination.
        dst: NodeId,
    },

    /// A flow's source and destination are the same node.
    #[error("flow {flow} starts and ends at {node}")]
    SameEndpoints {
        /// The flow ID.
        flow: FlowId,
        /// The node.
        node: NodeId,
    },

    /// Two flows share an ID.
    #[error("duplicate flow ID {0}")]
    DuplicateFlowId(FlowId),

    /// The topology has no links.
    #[error("topology has no links")]
    NoLinks,

    /// The topology has more than one connected component.
    #[error("topology is not connected")]
    Disconnected,

    /// The topology is invalid.
    #[error("invalid network")]
    InvalidNetwork(#[from] NetworkError),
}

#[cfg(test)]
mod tests {
    use crate::network::TopologyError;
    use crate::routing::RoutingError;
    use crate::testing;
    use crate::units::Secs;

    use super::*;

    #[test]
    fn valid_spec_succeeds() {
        let spec = spec();
        assert!(spec.validate(&opts()).is_ok());
    }

    #[test]
    fn invalid_flow_src_fails() {
        let mut spec = spec();
        spec.flows.push(testing::flow(1, 100, 2, 0, 0));
        assert!(matches!(
            spec.validate(&opts()),
            Err(SpecError::InvalidFlowSrc { .. })
        ));
    }

    #[test]
    fn invalid_flow_dst_fails() {
        let mut spec = spec();
        spec.flows.push(testing::flow(1, 0, 100, 0, 0));
        assert!(matches!(
            spec.validate(&opts()),
            Err(SpecError::InvalidFlowDst { .. })
        ));
    }

    #[test]
    fn switch_endpoint_fails() {
        let mut spec = spec();
        // Node 4 is a ToR, and there are servers
        spec.flows.push(testing::flow(1, 0, 4, 0, 0));
        assert!(matches!(
            spec.validate(&opts()),
            Err(SpecError::InvalidFlowDst { .. })
        ));
    }

    #[test]
    fn same_endpoints_fail() {
        let mut spec = spec();
        spec.flows.push(testing::flow(1, 2, 2, 0, 0));
        assert!(matches!(
            spec.validate(&opts()),
            Err(SpecError::SameEndpoints { .. })
        ));
    }

    #[test]
    fn duplicate_flow_id_fails() {
        let mut spec = spec();
        spec.flows.push(testing::flow(0, 1, 3, 0, 0));
        assert!(matches!(
            spec.validate(&opts()),
            Err(SpecError::DuplicateFlowId(_))
        ));
    }

    #[test]
    fn zero_end_time_fails() {
        let opts = SimOpts::builder().end_time(Nanosecs::ZERO).build();
        assert!(matches!(
            spec().validate(&opts),
            Err(SpecError::ZeroEndTime)
        ));
    }

    #[test]
    fn zero_interval_fails() {
        let mut opts = opts();
        opts.link_queue = crate::opts::TrackingOpts::every(Nanosecs::ZERO);
        assert!(matches!(
            spec().validate(&opts),
            Err(SpecError::ZeroInterval)
        ));
    }

    #[test]
    fn zero_segment_override_fails() {
        let mut spec = spec();
        spec.flows[0].overrides.segment_size = Some(Bytes::ZERO);
        assert!(matches!(
            spec.validate(&opts()),
            Err(SpecError::ZeroSegmentSize { flow: Some(_) })
        ));
    }

    #[test]
    fn invalid_topology_fails() {
        let mut spec = spec();
        // Cut the right rack off the aggregation layer
        spec.links.truncate(6);
        assert!(matches!(
            spec.validate(&opts()),
            Err(SpecError::InvalidNetwork(NetworkError::Routing(
                RoutingError::Unreachable { .. }
            )))
        ));
        let mut spec = self::spec();
        spec.links[0].bandwidth = crate::units::BitsPerSec::ZERO;
        assert!(matches!(
            spec.validate(&opts()),
            Err(SpecError::InvalidNetwork(NetworkError::Topology(
                TopologyError::ZeroBandwidth { .. }
            )))
        ));
    }

    #[test]
    fn linkless_topology_fails() {
        let spec = Spec::builder().nodes(vec![]).links(vec![]).build();
        assert!(matches!(spec.validate(&opts()), Err(SpecError::NoLinks)));
    }

    #[test]
    fn disconnected_topology_fails() {
        // Switches 2 and 3 form a second component that no flow touches
        let nodes = vec![
            Node::new_tor(NodeId::new(0)),
            Node::new_tor(NodeId::new(1)),
            Node::new_switch(NodeId::new(2)),
            Node::new_switch(NodeId::new(3)),
        ];
        let links = [(0, 1), (2, 3)]
            .into_iter()
            .map(|(a, b)| {
                Link::new(
                    NodeId::new(a),
                    NodeId::new(b),
                    crate::units::Gbps::new(10),
                    Nanosecs::new(1000),
                )
            })
            .collect::<Vec<_>>();
        let spec = Spec::builder()
            .nodes(nodes)
            .links(links)
            .flows(vec![testing::flow(0, 0, 1, 1000, 0)])
            .build();
        let opts = SimOpts::builder()
            .end_time(Secs::new(1).into())
            .optimize_tcp(false)
            .build();
        assert!(matches!(spec.validate(&opts), Err(SpecError::Disconnected)));
    }

    fn opts() -> SimOpts {
        SimOpts::builder().end_time(Secs::new(1).into()).build()
    }

    fn spec() -> Spec {
        let (nodes, links) = testing::eight_node_config();
        Spec::builder()
            .nodes(nodes)
            .links(links)
            .flows(vec![testing::flow(0, 0, 2, 0, 0)])
            .build()
    }
}
