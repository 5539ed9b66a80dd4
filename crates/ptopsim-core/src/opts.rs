//! This module defines the [`SimOpts`] configuration which describes how long to simulate,
//! how to route and which link telemetry to collect.

use crate::routing::EcmpHash;
use crate::transport::tcp::TcpConfig;
use crate::units::{Millisecs, Nanosecs};

/// The seed used when none is given.
pub const DEFAULT_SEED: u64 = 123_456_789;

/// Simulation options.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
pub struct SimOpts {
    /// Simulated time after which nothing runs.
    pub end_time: Nanosecs,
    /// Seed of every random choice (ECMP hashing and error models).
    #[builder(default = DEFAULT_SEED)]
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Packet fields ECMP hashes on.
    #[builder(default)]
    #[serde(default)]
    pub ecmp_hash: EcmpHash,
    /// Link utilization tracking.
    #[builder(default)]
    #[serde(default)]
    pub link_utilization: TrackingOpts,
    /// Link queue tracking.
    #[builder(default)]
    #[serde(default)]
    pub link_queue: TrackingOpts,
    /// Whether to derive RTO bounds from the topology's worst-case round-trip time.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub optimize_tcp: bool,
    /// Transport parameters. RTO bounds are overwritten when `optimize_tcp` is set.
    #[builder(default)]
    #[serde(default)]
    pub tcp: TcpConfig,
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_true() -> bool {
    true
}

/// Options of one link tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrackingOpts {
    #[builder(default = true)]
    pub enabled: bool,
    /// Sampling interval.
    #[builder(default = default_interval())]
    pub interval: Nanosecs,
}

fn default_interval() -> Nanosecs {
    Millisecs::new(100).into()
}

impl TrackingOpts {
    pub fn every(interval: impl Into<Nanosecs>) -> Self {
        Self {
            enabled: true,
            interval: interval.into(),
        }
    }
}

impl Default for TrackingOpts {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_interval(),
        }
    }
}
