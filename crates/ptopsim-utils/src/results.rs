use std::path::Path;

use ptopsim_core::{FlowRecord, LinkSample, LinkSummary, SimOutput};

use crate::Error;

/// Writes the results of a simulation into `out_dir`, creating it if needed.
///
/// Flow records always go to `flows.csv` and `flows.txt`. Tracker outputs are written only
/// for the trackers that were enabled.
pub fn write_results(out_dir: impl AsRef<Path>, out: &SimOutput) -> Result<(), Error> {
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir)?;
    std::fs::write(out_dir.join("flows.csv"), flows_csv(&out.flows))?;
    std::fs::write(out_dir.join("flows.txt"), flows_table(&out.flows))?;
    if let Some(util) = &out.link_utilization {
        std::fs::write(
            out_dir.join("link_utilization.csv"),
            link_utilization_csv(&util.samples),
        )?;
        std::fs::write(
            out_dir.join("link_utilization_summary.txt"),
            link_utilization_summary(&util.summaries),
        )?;
    }
    if let Some(queue) = &out.link_queue {
        std::fs::write(out_dir.join("link_queue.csv"), link_queue_csv(&queue.samples))?;
        std::fs::write(
            out_dir.join("link_queue_summary.txt"),
            link_queue_summary(&queue.summaries),
        )?;
    }
    tracing::info!(out_dir = %out_dir.display(), nr_flows = out.flows.len(), "wrote results");
    Ok(())
}

/// One line per flow:
///
/// `id,src,dst,size,start,end,duration,acked,finished,metadata`
pub fn flows_csv(records: &[FlowRecord]) -> String {
    records
        .iter()
        .map(|r| {
            format!(
                "{},{},{},{},{},{},{},{},{},{}\n",
                r.id,
                r.src,
                r.dst,
                r.size.into_u64(),
                r.start.into_u64(),
                r.end.into_u64(),
                r.duration.into_u64(),
                r.acked.into_u64(),
                r.finished_marker(),
                r.metadata
            )
        })
        .collect()
}

/// The flow records as an aligned table with human-readable sizes and durations.
pub fn flows_table(records: &[FlowRecord]) -> String {
    const WIDTHS: [usize; 10] = [10, 8, 8, 12, 16, 16, 12, 12, 10, 12];
    let header = [
        "Flow ID",
        "Source",
        "Target",
        "Size",
        "Start (ns)",
        "End (ns)",
        "Duration",
        "Acked",
        "Progress",
        "Finished?",
        "Metadata",
    ];
    let mut s = row(&header, &WIDTHS);
    for r in records {
        let progress = if r.size.into_u64() == 0 {
            100.0
        } else {
            r.acked.into_f64() * 100.0 / r.size.into_f64()
        };
        s += &row(
            &[
                r.id.to_string(),
                r.src.to_string(),
                r.dst.to_string(),
                human_bytes(r.size.into_u64()),
                r.start.into_u64().to_string(),
                r.end.into_u64().to_string(),
                human_duration(r.duration.into_u64()),
                human_bytes(r.acked.into_u64()),
                format!("{progress:.1}%"),
                r.finished_marker().to_owned(),
                r.metadata.clone(),
            ],
            &WIDTHS,
        );
    }
    s
}

/// One line per sample: `from,to,start,end,bytes,fraction`
pub fn link_utilization_csv(samples: &[LinkSample]) -> String {
    samples_csv(samples)
}

/// One line per sample: `from,to,start,end,occupancy,fraction`
pub fn link_queue_csv(samples: &[LinkSample]) -> String {
    samples_csv(samples)
}

fn samples_csv(samples: &[LinkSample]) -> String {
    samples
        .iter()
        .map(|s| {
            format!(
                "{},{},{},{},{},{:.6}\n",
                s.from,
                s.to,
                s.start.into_u64(),
                s.end.into_u64(),
                s.value,
                s.fraction
            )
        })
        .collect()
}

/// Mean utilization per link direction.
pub fn link_utilization_summary(summaries: &[LinkSummary]) -> String {
    const WIDTHS: [usize; 5] = [8, 8, 10, 14, 12];
    let mut s = row(
        &["From", "To", "Samples", "Mean (B)", "Max (B)", "Utilization"],
        &WIDTHS,
    );
    for l in summaries {
        s += &row(
            &[
                l.from.to_string(),
                l.to.to_string(),
                l.nr_samples.to_string(),
                format!("{:.1}", l.mean_value),
                l.max_value.to_string(),
                format!("{:.2}%", l.mean_fraction * 100.0),
            ],
            &WIDTHS,
        );
    }
    s
}

/// Mean and peak queue occupancy per link direction.
pub fn link_queue_summary(summaries: &[LinkSummary]) -> String {
    const WIDTHS: [usize; 5] = [8, 8, 10, 10, 8];
    let mut s = row(&["From", "To", "Samples", "Mean", "Max", "Fill"], &WIDTHS);
    for l in summaries {
        s += &row(
            &[
                l.from.to_string(),
                l.to.to_string(),
                l.nr_samples.to_string(),
                format!("{:.1}", l.mean_value),
                l.max_value.to_string(),
                format!("{:.2}%", l.mean_fraction * 100.0),
            ],
            &WIDTHS,
        );
    }
    s
}

// Pads every cell but the last to its column width.
fn row<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let mut s = String::new();
    for (i, cell) in cells.iter().enumerate() {
        let cell = cell.as_ref();
        match widths.get(i) {
            Some(&width) => s += &format!("{cell:<width$}"),
            None => s += cell,
        }
    }
    let mut s = s.trim_end().to_owned();
    s.push('\n');
    s
}

fn human_bytes(b: u64) -> String {
    let b_f = b as f64;
    match b {
        0..=999 => format!("{b} B"),
        1_000..=999_999 => format!("{:.2} KB", b_f / 1e3),
        1_000_000..=999_999_999 => format!("{:.2} MB", b_f / 1e6),
        _ => format!("{:.2} GB", b_f / 1e9),
    }
}

fn human_duration(ns: u64) -> String {
    let ns_f = ns as f64;
    match ns {
        0..=999 => format!("{ns} ns"),
        1_000..=999_999 => format!("{:.2} us", ns_f / 1e3),
        1_000_000..=999_999_999 => format!("{:.2} ms", ns_f / 1e6),
        _ => format!("{:.2} s", ns_f / 1e9),
    }
}
