//! A packet-level store-and-forward network carrying TCP-like connections.
//!
//! Every output interface is a port with a drop-tail queue and a serializer. Packets are
//! forwarded hop by hop using the routing tables; at each hop they are subject to the
//! receive error model of the link they arrived on.

pub mod tcp;

use std::collections::VecDeque;

use rand::prelude::*;

use crate::constants::{SZ_ACK, SZ_PKTHDR};
use crate::event::EventQueue;
use crate::network::types::{ErrorModel, Flow, FlowId, NodeId, QueueCapacity};
use crate::network::{EdgeIndex, Network};
use crate::routing::{EcmpHash, FlowKey, RoutingError};
use crate::telemetry::LinkStats;
use crate::units::{Bytes, Nanosecs};

use self::tcp::{AckOutcome, Conn, TcpConfig};

identifier!(ConnId, usize);

/// Events the transport schedules for itself.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An interface finished serializing its current packet.
    TxComplete(EdgeIndex),
    /// A packet reached the far end of an interface.
    Arrival { iface: EdgeIndex, pkt: Packet },
    /// A connection's retransmission timer fired.
    Rto(ConnId),
}

/// Signalled once every byte of a connection has been acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion(pub ConnId);

#[derive(Debug, Clone, derive_new::new)]
pub struct Packet {
    conn: ConnId,
    dst: NodeId,
    size: Bytes,
    key: FlowKey,
    kind: PacketKind,
}

#[derive(Debug, Clone, Copy)]
pub enum PacketKind {
    Data { seq: u64, len: u64 },
    Ack { ack: u64 },
}

#[derive(Debug, Default)]
struct Port {
    queue: VecDeque<Packet>,
    queued_bytes: Bytes,
    in_flight: Option<InFlight>,
    tx_done: Bytes,
    drops: u64,
}

#[derive(Debug)]
struct InFlight {
    pkt: Packet,
    start: Nanosecs,
    end: Nanosecs,
}

/// The transport layer of a whole network.
#[derive(Debug)]
pub struct Transport<'a> {
    network: &'a Network,
    config: TcpConfig,
    hash: EcmpHash,
    seed: u64,
    ports: Vec<Port>,
    conns: Vec<Option<Conn>>,
    rng: StdRng,
}

impl<'a> Transport<'a> {
    pub fn new(network: &'a Network, config: TcpConfig, hash: EcmpHash, seed: u64) -> Self {
        Self {
            network,
            config,
            hash,
            seed,
            ports: network.edge_indices().map(|_| Port::default()).collect(),
            conns: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Opens a connection carrying `flow` and starts sending. A zero-byte flow completes
    /// immediately.
    pub fn open<E>(
        &mut self,
        q: &mut EventQueue<E>,
        flow: &Flow,
    ) -> Result<ConnId, TransportError>
    where
        E: From<TransportEvent> + From<Completion>,
    {
        let data_key = self
            .hash
            .key((flow.src, flow.dst), flow.id, flow.start, self.seed);
        let ack_key = self
            .hash
            .key((flow.dst, flow.src), flow.id, flow.start, self.seed);
        let id = ConnId::new(self.conns.len());
        let mut conn = Conn::new(flow, &self.config, (data_key, ack_key));
        if conn.is_complete() {
            conn.completion = Some(q.schedule_in(Nanosecs::ZERO, Completion(id).into()));
        }
        self.conns.push(Some(conn));
        self.pump(q, id)?;
        Ok(id)
    }

    /// Bytes of the connection's flow acknowledged so far.
    pub fn acked_bytes(&self, id: ConnId) -> Option<Bytes> {
        self.conn(id).map(|c| c.acked())
    }

    /// Closes a connection, cancelling its timer and any pending completion. Returns the
    /// number of acknowledged bytes. Packets of a closed connection still in the network are
    /// discarded on delivery.
    pub fn close<E>(&mut self, q: &mut EventQueue<E>, id: ConnId) -> Option<Bytes> {
        let conn = self.conns.get_mut(id.inner())?.take()?;
        if let Some(timer) = conn.rto_timer {
            q.cancel(timer);
        }
        if let Some(completion) = conn.completion {
            q.cancel(completion);
        }
        Some(conn.acked())
    }

    pub fn nr_open(&self) -> usize {
        self.conns.iter().filter(|c| c.is_some()).count()
    }

    /// Packets dropped at the interface, by queue overflow or by the error model.
    pub fn drops(&self, iface: EdgeIndex) -> u64 {
        self.ports.get(iface.index()).map_or(0, |p| p.drops)
    }

    pub fn handle<E>(
        &mut self,
        q: &mut EventQueue<E>,
        event: TransportEvent,
    ) -> Result<(), TransportError>
    where
        E: From<TransportEvent> + From<Completion>,
    {
        match event {
            TransportEvent::TxComplete(iface) => {
                self.on_tx_complete(q, iface);
                Ok(())
            }
            TransportEvent::Arrival { iface, pkt } => self.on_arrival(q, iface, pkt),
            TransportEvent::Rto(id) => self.on_rto(q, id),
        }
    }

    fn conn(&self, id: ConnId) -> Option<&Conn> {
        self.conns.get(id.inner()).and_then(|c| c.as_ref())
    }

    fn conn_mut(&mut self, id: ConnId) -> Option<&mut Conn> {
        self.conns.get_mut(id.inner()).and_then(|c| c.as_mut())
    }

    /// Sends whatever the connection's window allows and keeps its timer consistent.
    fn pump<E>(&mut self, q: &mut EventQueue<E>, id: ConnId) -> Result<(), TransportError>
    where
        E: From<TransportEvent> + From<Completion>,
    {
        let now = q.now();
        let mut segments = Vec::new();
        let Some(conn) = self.conn_mut(id) else {
            return Ok(());
        };
        while let Some(seg) = conn.next_segment(now) {
            segments.push(seg);
        }
        let (src, dst, key, flow) = (conn.src, conn.dst, conn.data_key, conn.flow);
        if conn.has_outstanding() && conn.rto_timer.is_none() {
            conn.rto_timer = Some(q.schedule_in(conn.rto(), TransportEvent::Rto(id).into()));
        }
        for (seq, len) in segments {
            let size = Bytes::new(len) + SZ_PKTHDR;
            let pkt = Packet::new(id, dst, size, key, PacketKind::Data { seq, len });
            self.send(q, src, None, pkt, flow)?;
        }
        Ok(())
    }

    /// Routes a packet out of `node`.
    fn send<E>(
        &mut self,
        q: &mut EventQueue<E>,
        node: NodeId,
        incoming: Option<EdgeIndex>,
        pkt: Packet,
        flow: FlowId,
    ) -> Result<(), TransportError>
    where
        E: From<TransportEvent>,
    {
        let iface = self
            .network
            .routes()
            .resolve(node, pkt.dst, incoming, &pkt.key)
            .map_err(|source| TransportError::Routing { flow, source })?;
        self.enqueue(q, iface, pkt);
        Ok(())
    }

    fn enqueue<E>(&mut self, q: &mut EventQueue<E>, iface: EdgeIndex, pkt: Packet)
    where
        E: From<TransportEvent>,
    {
        let capacity = self.network.topology().graph[iface].queue.capacity();
        let port = &mut self.ports[iface.index()];
        if port.in_flight.is_none() {
            debug_assert!(port.queue.is_empty());
            self.start_tx(q, iface, pkt);
            return;
        }
        let fits = match capacity {
            QueueCapacity::Packets(n) => (port.queue.len() as u64) < n,
            QueueCapacity::Bytes(b) => port.queued_bytes + pkt.size <= b,
        };
        if fits {
            port.queued_bytes += pkt.size;
            port.queue.push_back(pkt);
        } else {
            port.drops += 1;
            tracing::trace!(iface = iface.index(), conn = %pkt.conn, "queue overflow");
        }
    }

    fn start_tx<E>(&mut self, q: &mut EventQueue<E>, iface: EdgeIndex, pkt: Packet)
    where
        E: From<TransportEvent>,
    {
        let rate = self.network.topology().graph[iface].bandwidth;
        let start = q.now();
        let end = start + rate.length(pkt.size);
        self.ports[iface.index()].in_flight = Some(InFlight { pkt, start, end });
        q.schedule(end, TransportEvent::TxComplete(iface).into());
    }

    fn on_tx_complete<E>(&mut self, q: &mut EventQueue<E>, iface: EdgeIndex)
    where
        E: From<TransportEvent>,
    {
        let delay = self.network.topology().graph[iface].delay;
        let port = &mut self.ports[iface.index()];
        let Some(InFlight { pkt, .. }) = port.in_flight.take() else {
            return;
        };
        port.tx_done += pkt.size;
        let next = port.queue.pop_front();
        if let Some(next) = &next {
            port.queued_bytes -= next.size;
        }
        q.schedule_in(delay, TransportEvent::Arrival { iface, pkt }.into());
        if let Some(next) = next {
            self.start_tx(q, iface, next);
        }
    }

    fn on_arrival<E>(
        &mut self,
        q: &mut EventQueue<E>,
        iface: EdgeIndex,
        pkt: Packet,
    ) -> Result<(), TransportError>
    where
        E: From<TransportEvent> + From<Completion>,
    {
        let network = self.network;
        let chan = &network.topology().graph[iface];
        if let ErrorModel::IidUniform { drop_prob } = chan.error_model {
            if self.rng.gen_bool(drop_prob) {
                self.ports[iface.index()].drops += 1;
                tracing::trace!(iface = iface.index(), conn = %pkt.conn, "packet lost");
                return Ok(());
            }
        }
        let node = chan.dst;
        if node != pkt.dst {
            let Some(flow) = self.conn(pkt.conn).map(|c| c.flow) else {
                // Stale packet of a closed connection
                return Ok(());
            };
            return self.send(q, node, Some(iface), pkt, flow);
        }
        match pkt.kind {
            PacketKind::Data { seq, len } => self.on_data(q, pkt.conn, seq, len),
            PacketKind::Ack { ack } => self.on_ack(q, pkt.conn, ack),
        }
    }

    fn on_data<E>(
        &mut self,
        q: &mut EventQueue<E>,
        id: ConnId,
        seq: u64,
        len: u64,
    ) -> Result<(), TransportError>
    where
        E: From<TransportEvent> + From<Completion>,
    {
        let Some(conn) = self.conn_mut(id) else {
            return Ok(());
        };
        let ack = conn.on_data(seq, len);
        let (from, to, key, flow) = (conn.dst, conn.src, conn.ack_key, conn.flow);
        let pkt = Packet::new(id, to, SZ_ACK, key, PacketKind::Ack { ack });
        self.send(q, from, None, pkt, flow)
    }

    fn on_ack<E>(
        &mut self,
        q: &mut EventQueue<E>,
        id: ConnId,
        ack: u64,
    ) -> Result<(), TransportError>
    where
        E: From<TransportEvent> + From<Completion>,
    {
        let now = q.now();
        let Some(conn) = self.conn_mut(id) else {
            return Ok(());
        };
        if conn.completion.is_some() {
            return Ok(());
        }
        match conn.on_ack(ack, now) {
            AckOutcome::Advanced { complete } => {
                if let Some(timer) = conn.rto_timer.take() {
                    q.cancel(timer);
                }
                if complete {
                    conn.completion = Some(q.schedule_in(Nanosecs::ZERO, Completion(id).into()));
                    return Ok(());
                }
            }
            AckOutcome::FastRetransmit => {
                tracing::trace!(
                    flow = %conn.flow,
                    seq = conn.snd_una,
                    cwnd = %conn.cwnd(),
                    "fast retransmit"
                );
                if let Some(timer) = conn.rto_timer.take() {
                    q.cancel(timer);
                }
            }
            AckOutcome::Ignored => return Ok(()),
        }
        self.pump(q, id)
    }

    fn on_rto<E>(&mut self, q: &mut EventQueue<E>, id: ConnId) -> Result<(), TransportError>
    where
        E: From<TransportEvent> + From<Completion>,
    {
        let Some(conn) = self.conn_mut(id) else {
            return Ok(());
        };
        conn.rto_timer = None;
        if conn.completion.is_some() || !conn.has_outstanding() {
            return Ok(());
        }
        conn.on_timeout();
        tracing::trace!(flow = %conn.flow, rto = %conn.rto(), "retransmission timeout");
        self.pump(q, id)
    }
}

impl LinkStats for Transport<'_> {
    fn tx_bytes(&self, iface: EdgeIndex, now: Nanosecs) -> Bytes {
        let port = &self.ports[iface.index()];
        let partial = port.in_flight.as_ref().map_or(Bytes::ZERO, |f| {
            let total = (f.end - f.start).into_u64();
            if total == 0 || now >= f.end {
                return f.pkt.size;
            }
            let elapsed = now.saturating_sub(f.start).into_u64();
            Bytes::new((f.pkt.size.into_u64() as u128 * elapsed as u128 / total as u128) as u64)
        });
        port.tx_done + partial
    }

    fn queue_occupancy(&self, iface: EdgeIndex) -> (u64, Bytes) {
        let port = &self.ports[iface.index()];
        (port.queue.len() as u64, port.queued_bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to route a packet of flow {flow}")]
    Routing {
        flow: FlowId,
        #[source]
        source: RoutingError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::types::{Link, Node, QueueDisc};
    use crate::testing;
    use crate::units::{Mbps, Microsecs};

    #[derive(Debug)]
    enum Ev {
        Net(TransportEvent),
        Done(ConnId),
    }

    impl From<TransportEvent> for Ev {
        fn from(e: TransportEvent) -> Self {
            Ev::Net(e)
        }
    }

    impl From<Completion> for Ev {
        fn from(Completion(id): Completion) -> Self {
            Ev::Done(id)
        }
    }

    /// Runs until the first completion and returns its time.
    fn run_until_done(
        transport: &mut Transport<'_>,
        q: &mut EventQueue<Ev>,
        end: Nanosecs,
    ) -> anyhow::Result<Option<Nanosecs>> {
        while let Some((at, ev)) = q.pop_until(end) {
            match ev {
                Ev::Net(e) => transport.handle(q, e)?,
                Ev::Done(_) => return Ok(Some(at)),
            }
        }
        Ok(None)
    }

    #[test]
    fn single_flow_completes_near_line_rate() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_tor_config();
        let network = Network::new(&nodes, &links)?;
        let mut transport = Transport::new(&network, TcpConfig::default(), EcmpHash::FlowId, 1);
        let mut q = EventQueue::new();
        let flow = testing::flow(0, 0, 1, 100_000, 0);
        let id = transport.open(&mut q, &flow)?;
        let done = run_until_done(&mut transport, &mut q, Nanosecs::new(1_000_000_000))?
            .expect("flow did not complete");
        // 72 full segments and one 688-byte segment, one hop, plus the last ACK
        assert_eq!(done, Nanosecs::new(8_305_120));
        assert_eq!(transport.acked_bytes(id), Some(Bytes::new(100_000)));
        let fwd = network.find_edge(NodeId::new(0), NodeId::new(1)).unwrap();
        let rev = network.find_edge(NodeId::new(1), NodeId::new(0)).unwrap();
        assert_eq!(transport.tx_bytes(fwd, done), Bytes::new(103_504));
        assert_eq!(transport.tx_bytes(rev, done), Bytes::new(73 * 60));
        assert_eq!(transport.close(&mut q, id), Some(Bytes::new(100_000)));
        assert_eq!(transport.nr_open(), 0);
        Ok(())
    }

    #[test]
    fn zero_byte_flow_completes_immediately() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_tor_config();
        let network = Network::new(&nodes, &links)?;
        let mut transport = Transport::new(&network, TcpConfig::default(), EcmpHash::FlowId, 1);
        let mut q = EventQueue::new();
        q.advance_to(Nanosecs::new(500));
        transport.open(&mut q, &testing::flow(0, 0, 1, 0, 500))?;
        let done = run_until_done(&mut transport, &mut q, Nanosecs::MAX)?;
        assert_eq!(done, Some(Nanosecs::new(500)));
        Ok(())
    }

    #[test]
    fn lossy_link_still_delivers() -> anyhow::Result<()> {
        let nodes = vec![Node::new_tor(NodeId::new(0)), Node::new_tor(NodeId::new(1))];
        let links = vec![
            Link::new(NodeId::new(0), NodeId::new(1), Mbps::new(100), Microsecs::new(10))
                .with_error_model(ErrorModel::IidUniform { drop_prob: 0.01 }),
        ];
        let network = Network::new(&nodes, &links)?;
        let mut transport = Transport::new(&network, TcpConfig::default(), EcmpHash::FlowId, 7);
        let mut q = EventQueue::new();
        let id = transport.open(&mut q, &testing::flow(0, 0, 1, 200_000, 0))?;
        let done = run_until_done(&mut transport, &mut q, Nanosecs::new(60_000_000_000))?;
        assert!(done.is_some());
        assert_eq!(transport.acked_bytes(id), Some(Bytes::new(200_000)));
        Ok(())
    }

    #[test]
    fn full_queue_drops_packets() -> anyhow::Result<()> {
        let nodes = vec![Node::new_tor(NodeId::new(0)), Node::new_tor(NodeId::new(1))];
        let links = vec![
            Link::new(NodeId::new(0), NodeId::new(1), Mbps::new(100), Microsecs::new(10))
                .with_queue(QueueDisc::DropTail(QueueCapacity::Packets(2))),
        ];
        let network = Network::new(&nodes, &links)?;
        let mut transport = Transport::new(&network, TcpConfig::default(), EcmpHash::FlowId, 7);
        let mut q = EventQueue::<Ev>::new();
        transport.open(&mut q, &testing::flow(0, 0, 1, 100_000, 0))?;
        let fwd = network.find_edge(NodeId::new(0), NodeId::new(1)).unwrap();
        // One packet in transmission, two queued, seven dropped
        assert_eq!(transport.queue_occupancy(fwd), (2, Bytes::new(2 * 1428)));
        assert_eq!(transport.drops(fwd), 7);
        Ok(())
    }

    #[test]
    fn tx_bytes_counts_partial_packets() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_tor_config();
        let network = Network::new(&nodes, &links)?;
        let mut transport = Transport::new(&network, TcpConfig::default(), EcmpHash::FlowId, 1);
        let mut q = EventQueue::<Ev>::new();
        transport.open(&mut q, &testing::flow(0, 0, 1, 100_000, 0))?;
        let fwd = network.find_edge(NodeId::new(0), NodeId::new(1)).unwrap();
        // Half of the first 1428-byte packet is on the wire after 57.12 us
        assert_eq!(transport.tx_bytes(fwd, Nanosecs::new(57_120)), Bytes::new(714));
        Ok(())
    }
}
