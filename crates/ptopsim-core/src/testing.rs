//! Topology fixtures shared by the tests of this crate and its dependents.

use crate::network::types::{Flow, FlowId, Link, Node, NodeId};
use crate::units::{Gbps, Mbps, Microsecs, Nanosecs};

/// Two servers (IDs 0 and 1) below one ToR (ID 2). Links are 10 Gbps with a 1 us delay.
pub fn three_node_config() -> (Vec<Node>, Vec<Link>) {
    let n1 = Node::new_server(NodeId::new(0));
    let n2 = Node::new_server(NodeId::new(1));
    let n3 = Node::new_tor(NodeId::new(2));
    let l1 = Link::new(n1.id, n3.id, Gbps::new(10), Nanosecs::new(1000));
    let l2 = Link::new(n2.id, n3.id, Gbps::new(10), Nanosecs::new(1000));
    (vec![n1, n2, n3], vec![l1, l2])
}

/// Four servers (IDs 0-3), two ToRs (IDs 4 and 5) and two aggregation switches (IDs 6 and
/// 7) organized in a Clos topology. Links are 10 Gbps with a 1 us delay.
pub fn eight_node_config() -> (Vec<Node>, Vec<Link>) {
    let servers = (0..=3).map(|i| Node::new_server(NodeId::new(i)));
    let tors = (4..=5).map(|i| Node::new_tor(NodeId::new(i)));
    let aggs = (6..=7).map(|i| Node::new_switch(NodeId::new(i)));
    let nodes = servers.chain(tors).chain(aggs).collect::<Vec<_>>();
    let link = |a: usize, b: usize| {
        Link::new(
            nodes[a].id,
            nodes[b].id,
            Gbps::new(10),
            Nanosecs::new(1000),
        )
    };
    let links = vec![
        // Each ToR is connected to 2 servers
        link(0, 4),
        link(1, 4),
        link(2, 5),
        link(3, 5),
        // Each ToR is connected to both Aggs
        link(4, 6),
        link(4, 7),
        link(5, 6),
        link(5, 7),
    ];
    (nodes, links)
}

/// Two ToRs (IDs 0 and 1) joined by one 100 Mbps link with a 10 us delay and a 100-packet
/// drop-tail queue.
pub fn two_tor_config() -> (Vec<Node>, Vec<Link>) {
    let nodes = vec![Node::new_tor(NodeId::new(0)), Node::new_tor(NodeId::new(1))];
    let links = vec![Link::new(
        nodes[0].id,
        nodes[1].id,
        Mbps::new(100),
        Microsecs::new(10),
    )];
    (nodes, links)
}

/// Two disjoint pairs of ToRs.
pub fn disconnected_config() -> (Vec<Node>, Vec<Link>) {
    let nodes = (0..4).map(|i| Node::new_tor(NodeId::new(i))).collect::<Vec<_>>();
    let links = vec![
        Link::new(nodes[0].id, nodes[1].id, Gbps::new(10), Nanosecs::new(1000)),
        Link::new(nodes[2].id, nodes[3].id, Gbps::new(10), Nanosecs::new(1000)),
    ];
    (nodes, links)
}

/// A flow with no overrides or metadata.
pub fn flow(id: usize, src: usize, dst: usize, size: u64, start: u64) -> Flow {
    Flow::new(
        FlowId::new(id),
        (NodeId::new(src), NodeId::new(dst)),
        crate::units::Bytes::new(size),
        Nanosecs::new(start),
    )
}
