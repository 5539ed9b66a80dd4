use std::path::PathBuf;

use clap::Parser;
use ptopsim_core::{
    opts::DEFAULT_SEED,
    units::{Bytes, Mbps, Microsecs, Millisecs, Nanosecs, Secs},
    Flow, FlowId, Link, Node, NodeId, QueueCapacity, QueueDisc, SimOpts, Spec, TrackingOpts,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Flow size in bytes
    #[arg(short, long, default_value = "100000")]
    size: u64,

    /// Random seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Directory to write results into
    #[arg(short, long, default_value = "single-flows-run")]
    out_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let (nodes, links) = two_tor_config();
    let flows = vec![Flow::new(
        FlowId::ZERO,
        (nodes[0].id, nodes[1].id),
        Bytes::new(args.size),
        Nanosecs::ZERO,
    )];
    let spec = Spec::builder().nodes(nodes).links(links).flows(flows).build();
    let opts = SimOpts::builder()
        .end_time(Secs::new(1).into())
        .seed(args.seed)
        .link_utilization(TrackingOpts::every(Millisecs::new(100)))
        .build();

    let out = ptopsim_core::run(spec, &opts)?;
    ptopsim_utils::write_results(&args.out_dir, &out)?;
    for r in &out.flows {
        tracing::info!(
            flow = %r.id,
            size = %r.size,
            duration = %r.duration,
            finished = r.finished_marker(),
            "flow result"
        );
    }
    Ok(())
}

/// Two top-of-rack switches (IDs 0-1) joined by a single 100 Mbps link with a 10 us
/// propagation delay and a 100-packet drop-tail queue in each direction.
fn two_tor_config() -> (Vec<Node>, Vec<Link>) {
    let nodes = vec![Node::new_tor(NodeId::new(0)), Node::new_tor(NodeId::new(1))];
    let links = vec![Link::new(
        nodes[0].id,
        nodes[1].id,
        Mbps::new(100),
        Microsecs::new(10),
    )
    .with_queue(QueueDisc::DropTail(QueueCapacity::Packets(100)))];
    (nodes, links)
}
