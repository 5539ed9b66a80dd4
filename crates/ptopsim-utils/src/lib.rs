//! Utilities for interfacing with ptopsim: reading topologies, schedules and options from
//! files, and writing simulation results into a run directory.

#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

mod results;
mod schedule;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ptopsim_core::{Flow, Link, Network, NetworkError, Node, SimOpts, Spec};

pub use results::{
    flows_csv, flows_table, link_queue_csv, link_queue_summary, link_utilization_csv,
    link_utilization_summary, write_results,
};
pub use schedule::{parse_schedule, translate_schedule, InvalidEntry, ParseScheduleError};

/// Reads a [`Network`] from a file containing a [`TopologySpec`] in JSON or Dhall format.
pub fn read_network(topology_spec: impl AsRef<Path>) -> Result<Network, Error> {
    let spec = read_topology_spec(topology_spec)?;
    Ok(Network::new(&spec.nodes, &spec.links)?)
}

/// Reads a [`TopologySpec`] from a file in JSON or Dhall format.
pub fn read_topology_spec(path: impl AsRef<Path>) -> Result<TopologySpec, Error> {
    read_config(path)
}

/// Reads [`SimOpts`] from a file in JSON or Dhall format.
pub fn read_opts(path: impl AsRef<Path>) -> Result<SimOpts, Error> {
    read_config(path)
}

fn read_config<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, Error> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config = match path.as_ref().extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        Some("dhall") => serde_dhall::from_str(&contents).parse().map_err(Box::new)?,
        _ => return Err(Error::UnknownFileType(path.as_ref().into())),
    };
    Ok(config)
}

/// Read [`Flow`]s from a file in JSON, MessagePack or flow schedule CSV format.
pub fn read_flows(path: impl AsRef<Path>) -> Result<Vec<Flow>, Error> {
    let flows: Vec<Flow> = match path.as_ref().extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            let contents = std::fs::read_to_string(path.as_ref())?;
            serde_json::from_str(&contents)?
        }
        Some("msgpack") => {
            let f = File::open(path.as_ref())?;
            let reader = BufReader::new(f);
            rmp_serde::decode::from_read(reader)?
        }
        Some("csv") => {
            let contents = std::fs::read_to_string(path.as_ref())?;
            parse_schedule(&contents)?
        }
        _ => return Err(Error::UnknownFileType(path.as_ref().into())),
    };
    tracing::debug!(nr_flows = flows.len(), path = %path.as_ref().display(), "read flows");
    Ok(flows)
}

/// Reads a full [`Spec`] from a topology file and a flow file.
pub fn read_spec(topology: impl AsRef<Path>, flows: impl AsRef<Path>) -> Result<Spec, Error> {
    let TopologySpec { nodes, links } = read_topology_spec(topology)?;
    let flows = read_flows(flows)?;
    Ok(Spec::builder().nodes(nodes).links(links).flows(flows).build())
}

/// A topology specification.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TopologySpec {
    /// Nodes.
    pub nodes: Vec<Node>,
    /// Links.
    pub links: Vec<Link>,
}

/// Error kinds for specifications and I/O.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown file type.
    #[error("unknown file type: {0}")]
    UnknownFileType(PathBuf),

    /// Error serializing/deserializing Dhall.
    #[error("Dhall error")]
    Dhall(#[from] Box<serde_dhall::Error>),

    /// Error serializing/deserializing JSON.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// Error serializing/deserializing MsgPack.
    #[error("MsgPack error")]
    MsgPack(#[from] rmp_serde::decode::Error),

    /// Error parsing a flow schedule.
    #[error("invalid flow schedule")]
    Schedule(#[from] ParseScheduleError),

    /// I/O error.
    #[error("IO error")]
    Io(#[from] std::io::Error),

    /// Error constructing a valid network.
    #[error("invalid network")]
    Network(#[from] NetworkError),
}
