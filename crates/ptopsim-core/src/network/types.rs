use crate::units::{BitsPerSec, Bytes, Nanosecs};

identifier!(NodeId, usize);
identifier!(FlowId, usize);

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

impl Node {
    pub fn new_server(id: NodeId) -> Self {
        Self {
            id,
            kind: NodeKind::Server,
        }
    }

    pub fn new_tor(id: NodeId) -> Self {
        Self {
            id,
            kind: NodeKind::Tor,
        }
    }

    pub fn new_switch(id: NodeId) -> Self {
        Self {
            id,
            kind: NodeKind::Switch,
        }
    }
}

/// The role of a node. Top-of-rack nodes are switches too; only switches forward traffic
/// that is not addressed to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Switch,
    Tor,
    Server,
}

impl NodeKind {
    pub fn is_switch(self) -> bool {
        matches!(self, NodeKind::Switch | NodeKind::Tor)
    }
}

/// A bidirectional link. Each endpoint gets its own output interface with the same
/// attributes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Link {
    pub a: NodeId,
    pub b: NodeId,
    pub bandwidth: BitsPerSec,
    pub delay: Nanosecs,
    #[serde(default)]
    pub queue: QueueDisc,
    #[serde(default)]
    pub error_model: ErrorModel,
    #[serde(default = "default_weight")]
    pub weight: u64,
}

fn default_weight() -> u64 {
    1
}

impl Link {
    pub fn new(
        a: NodeId,
        b: NodeId,
        bandwidth: impl Into<BitsPerSec>,
        delay: impl Into<Nanosecs>,
    ) -> Self {
        Self {
            a,
            b,
            bandwidth: bandwidth.into(),
            delay: delay.into(),
            queue: QueueDisc::default(),
            error_model: ErrorModel::None,
            weight: default_weight(),
        }
    }

    pub fn with_queue(mut self, queue: QueueDisc) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_error_model(mut self, error_model: ErrorModel) -> Self {
        self.error_model = error_model;
        self
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }
}

/// The queueing discipline of an output interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDisc {
    DropTail(QueueCapacity),
}

impl QueueDisc {
    pub fn capacity(&self) -> QueueCapacity {
        match *self {
            QueueDisc::DropTail(cap) => cap,
        }
    }
}

impl Default for QueueDisc {
    fn default() -> Self {
        QueueDisc::DropTail(QueueCapacity::Packets(100))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueCapacity {
    Packets(u64),
    Bytes(Bytes),
}

impl QueueCapacity {
    pub fn is_zero(&self) -> bool {
        match *self {
            QueueCapacity::Packets(n) => n == 0,
            QueueCapacity::Bytes(b) => b == Bytes::ZERO,
        }
    }

    /// The unit occupancy is measured in for this capacity.
    pub fn unit(&self) -> &'static str {
        match self {
            QueueCapacity::Packets(_) => "pkt",
            QueueCapacity::Bytes(_) => "byte",
        }
    }

    /// The capacity as a plain count in its own unit.
    pub fn limit(&self) -> u64 {
        match *self {
            QueueCapacity::Packets(n) => n,
            QueueCapacity::Bytes(b) => b.into_u64(),
        }
    }

    /// Upper bound on the bytes held in a full queue, given the largest packet size.
    pub fn max_bytes(&self, max_pkt: Bytes) -> Bytes {
        match *self {
            QueueCapacity::Packets(n) => Bytes::new(n * max_pkt.into_u64()),
            QueueCapacity::Bytes(b) => b,
        }
    }
}

/// A receive-side error model, applied to packets arriving over a link.
#[derive(Debug, Default, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorModel {
    #[default]
    None,
    IidUniform { drop_prob: f64 },
}

/// A unidirectional channel. Channels are the edges of the topology graph and act as the
/// output interfaces of their source node.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Channel {
    pub src: NodeId,
    pub dst: NodeId,
    pub bandwidth: BitsPerSec,
    pub delay: Nanosecs,
    pub queue: QueueDisc,
    pub error_model: ErrorModel,
    pub weight: u64,
}

impl Channel {
    pub(crate) fn new(src: NodeId, dst: NodeId, link: &Link) -> Self {
        Self {
            src,
            dst,
            bandwidth: link.bandwidth,
            delay: link.delay,
            queue: link.queue,
            error_model: link.error_model,
            weight: link.weight,
        }
    }
}

/// Per-flow transport overrides.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FlowOverrides {
    /// Initial congestion window in segments.
    #[serde(default)]
    pub initial_cwnd_pkts: Option<u64>,
    /// Segment payload size.
    #[serde(default)]
    pub segment_size: Option<Bytes>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub src: NodeId,
    pub dst: NodeId,
    pub size: Bytes,
    pub start: Nanosecs,
    #[serde(default)]
    pub overrides: FlowOverrides,
    #[serde(default)]
    pub metadata: String,
}

impl Flow {
    pub fn new(
        id: FlowId,
        (src, dst): (NodeId, NodeId),
        size: impl Into<Bytes>,
        start: impl Into<Nanosecs>,
    ) -> Self {
        Self {
            id,
            src,
            dst,
            size: size.into(),
            start: start.into(),
            ..Default::default()
        }
    }
}
