//! One-shot transport tuning from a worst-case round-trip estimate of the topology.

use std::collections::VecDeque;

use crate::constants::{SZ_PKTHDR, SZ_SEGMENT, SZ_SNDBUF};
use crate::network::topology::Topology;
use crate::transport::tcp::TcpConfig;
use crate::units::Nanosecs;

/// Estimates the worst-case round-trip time as
/// `2 * hops * (max delay + max queueing delay + max transmission time)`, where `hops` is the
/// longest shortest path (relaying only through switches) and every maximum is taken over
/// all links independently.
pub fn estimate_worst_case_rtt(topology: &Topology) -> Result<Nanosecs, OptimizerError> {
    if topology.links.is_empty() {
        return Err(OptimizerError::NoLinks);
    }
    if !topology.is_connected() {
        return Err(OptimizerError::Disconnected);
    }
    let max_pkt = SZ_SEGMENT + SZ_PKTHDR;
    let mut max_delay = Nanosecs::ZERO;
    let mut max_queueing = Nanosecs::ZERO;
    let mut max_tx = Nanosecs::ZERO;
    for chan in topology.graph.edge_weights() {
        let queue = chan.queue.capacity().max_bytes(max_pkt);
        max_delay = max_delay.max(chan.delay);
        max_queueing = max_queueing.max(chan.bandwidth.length(queue));
        max_tx = max_tx.max(chan.bandwidth.length(max_pkt));
    }
    let hops = hop_diameter(topology);
    let per_hop = max_delay + max_queueing + max_tx;
    Ok(Nanosecs::new(2 * hops * per_hop.into_u64()))
}

/// The largest hop count of any shortest path, where only switches relay traffic.
fn hop_diameter(topology: &Topology) -> u64 {
    let g = &topology.graph;
    let mut diameter = 0;
    for start in g.node_indices() {
        let mut dist = vec![None; g.node_count()];
        dist[start.index()] = Some(0);
        let mut queue = VecDeque::from([start]);
        while let Some(cur) = queue.pop_front() {
            let d = dist[cur.index()].unwrap_or(0);
            diameter = diameter.max(d);
            // Only the start node and switches are expanded
            if cur != start && !g[cur].kind.is_switch() {
                continue;
            }
            for next in g.neighbors(cur) {
                if dist[next.index()].is_none() {
                    dist[next.index()] = Some(d + 1);
                    queue.push_back(next);
                }
            }
        }
    }
    diameter
}

/// Tunes `config` for a network whose round trips take at most `worst_rtt`: the minimum and
/// initial RTO become the estimate and the maximum RTO is at least ten times it.
pub fn optimize(config: &mut TcpConfig, worst_rtt: Nanosecs) {
    config.min_rto = worst_rtt;
    config.initial_rto = worst_rtt;
    config.max_rto = config.max_rto.max(Nanosecs::new(10 * worst_rtt.into_u64()));
    config.snd_buf = SZ_SNDBUF;
    tracing::info!(
        %worst_rtt,
        min_rto = %config.min_rto,
        initial_rto = %config.initial_rto,
        max_rto = %config.max_rto,
        snd_buf = %config.snd_buf,
        segment_size = %config.segment_size,
        initial_cwnd_pkts = config.initial_cwnd_pkts,
        "optimized TCP parameters"
    );
}

#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    #[error("cannot estimate the round-trip time of a topology without links")]
    NoLinks,

    #[error("cannot estimate the round-trip time of a disconnected topology")]
    Disconnected,
}
