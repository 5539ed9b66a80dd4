#![warn(unreachable_pub, missing_debug_implementations)]

//! The core ptopsim library. This crate defines [the routine](run::run) that simulates flows
//! over a point-to-point topology with static ECMP routing and collects per-flow results and
//! per-link telemetry.

#[macro_use]
mod ident;

pub mod constants;
pub mod event;
pub mod flows;
pub mod network;
pub mod optimizer;
pub mod opts;
pub mod routing;
pub mod run;
pub mod spec;
pub mod telemetry;
pub mod testing;
pub mod transport;
pub mod units;

pub use flows::{FlowRecord, FlowState};
pub use network::{
    topology::{Topology, TopologyError},
    types::{
        ErrorModel, Flow, FlowId, FlowOverrides, Link, Node, NodeId, NodeKind, QueueCapacity,
        QueueDisc,
    },
    Network, NetworkError,
};
pub use opts::{SimOpts, TrackingOpts};
pub use routing::{EcmpHash, RoutingError};
pub use run::{run, Error, SimOutput, TrackerOutput};
pub use spec::{Spec, SpecError};
pub use telemetry::{LinkSample, LinkSummary};
pub use transport::tcp::TcpConfig;
