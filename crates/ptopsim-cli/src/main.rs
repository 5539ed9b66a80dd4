use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ptopsim_core::{units::Nanosecs, EcmpHash, SimOpts};

#[derive(Parser, Debug)]
#[command(author, version, about = "Simulate flows over a point-to-point topology", long_about = None)]
struct Args {
    /// Topology file (JSON or Dhall)
    #[arg(short, long)]
    topology: PathBuf,

    /// Flow file (JSON, MessagePack or CSV schedule)
    #[arg(short, long)]
    flows: PathBuf,

    /// Simulation options file (JSON or Dhall)
    #[arg(short, long)]
    opts: Option<PathBuf>,

    /// Simulation end time in nanoseconds; overrides the options file
    #[arg(short, long)]
    end_time: Option<Nanosecs>,

    /// Random seed; overrides the options file
    #[arg(short, long)]
    seed: Option<u64>,

    /// Hash flows by their endpoints only
    #[arg(long)]
    endpoint_hash: bool,

    /// Directory to write results into
    #[arg(long, default_value = "run")]
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

    let mut opts = match (&args.opts, args.end_time) {
        (Some(path), _) => ptopsim_utils::read_opts(path)
            .with_context(|| format!("failed to read options from {}", path.display()))?,
        (None, Some(end_time)) => SimOpts::builder().end_time(end_time).build(),
        (None, None) => anyhow::bail!("either --opts or --end-time is required"),
    };
    if let Some(end_time) = args.end_time {
        opts.end_time = end_time;
    }
    if let Some(seed) = args.seed {
        opts.seed = seed;
    }
    if args.endpoint_hash {
        opts.ecmp_hash = EcmpHash::Endpoints;
    }

    let spec = ptopsim_utils::read_spec(&args.topology, &args.flows)
        .context("failed to read the simulation inputs")?;
    let out = ptopsim_core::run(spec, &opts)?;
    ptopsim_utils::write_results(&args.out_dir, &out)?;

    let nr_finished = out.flows.iter().filter(|r| r.finished).count();
    println!(
        "{}/{} flows finished by {}; results in {}",
        nr_finished,
        out.flows.len(),
        out.end_time,
        args.out_dir.display()
    );
    if let Some(rtt) = out.worst_case_rtt {
        tracing::info!(worst_case_rtt = %rtt, "transport tuned");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn overrides_parse() {
        let args = Args::parse_from([
            "ptopsim",
            "-t",
            "topo.json",
            "-f",
            "flows.csv",
            "--end-time",
            "1000000",
            "--endpoint-hash",
        ]);
        assert_eq!(args.end_time, Some(Nanosecs::new(1_000_000)));
        assert!(args.endpoint_hash);
        assert_eq!(args.out_dir, PathBuf::from("run"));
        assert!(args.opts.is_none());
    }
}
