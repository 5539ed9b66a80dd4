use ptopsim_core::{Flow, FlowOverrides};

/// Parses a flow schedule. Each line has the form
///
/// `id,src,dst,size,start,params,metadata`
///
/// where `size` is in bytes, `start` is in nanoseconds, and `params` is either empty or a
/// `;`-separated list of `initial_cwnd_pkts=N` and `segment_size=B` overrides. Blank lines
/// and lines starting with `#` are skipped.
pub fn parse_schedule(s: &str) -> Result<Vec<Flow>, ParseScheduleError> {
    s.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            parse_schedule_entry(line.trim()).map_err(|reason| ParseScheduleError {
                line: i + 1,
                reason,
            })
        })
        .collect()
}

fn parse_schedule_entry(s: &str) -> Result<Flow, InvalidEntry> {
    const NR_FIELDS: usize = 7;
    let fields = s.split(',').collect::<Vec<_>>();
    let nr_fields = fields.len();
    if nr_fields != NR_FIELDS {
        return Err(InvalidEntry::WrongNrFields {
            expected: NR_FIELDS,
            got: nr_fields,
        });
    }
    Ok(Flow {
        id: fields[0].trim().parse()?,
        src: fields[1].trim().parse()?,
        dst: fields[2].trim().parse()?,
        size: fields[3].trim().parse()?,
        start: fields[4].trim().parse()?,
        overrides: parse_overrides(fields[5].trim())?,
        metadata: fields[6].to_owned(),
    })
}

fn parse_overrides(s: &str) -> Result<FlowOverrides, InvalidEntry> {
    let mut overrides = FlowOverrides::default();
    for param in s.split(';').filter(|p| !p.is_empty()) {
        let (key, val) = param
            .split_once('=')
            .ok_or_else(|| InvalidEntry::MalformedParam(param.to_owned()))?;
        match key.trim() {
            "initial_cwnd_pkts" => overrides.initial_cwnd_pkts = Some(val.trim().parse()?),
            "segment_size" => overrides.segment_size = Some(val.trim().parse()?),
            _ => return Err(InvalidEntry::UnknownParam(key.to_owned())),
        }
    }
    Ok(overrides)
}

/// Writes `flows` in the format accepted by [`parse_schedule`].
pub fn translate_schedule(flows: &[Flow]) -> String {
    flows
        .iter()
        .map(|f| {
            let mut params = Vec::new();
            if let Some(cwnd) = f.overrides.initial_cwnd_pkts {
                params.push(format!("initial_cwnd_pkts={cwnd}"));
            }
            if let Some(segment) = f.overrides.segment_size {
                params.push(format!("segment_size={}", segment.into_u64()));
            }
            format!(
                "{},{},{},{},{},{},{}\n",
                f.id,
                f.src,
                f.dst,
                f.size.into_u64(),
                f.start.into_u64(),
                params.join(";"),
                f.metadata
            )
        })
        .collect()
}

/// Error parsing a flow schedule.
#[derive(Debug, thiserror::Error)]
#[error("invalid schedule entry on line {line}")]
pub struct ParseScheduleError {
    /// The one-based line number of the bad entry.
    pub line: usize,
    /// What is wrong with it.
    #[source]
    pub reason: InvalidEntry,
}

/// A malformed schedule entry.
#[derive(Debug, thiserror::Error)]
pub enum InvalidEntry {
    /// Incorrect number of fields.
    #[error("wrong number of fields (expected {expected}, got {got})")]
    WrongNrFields {
        /// Expected number of fields.
        expected: usize,
        /// Actual number of fields.
        got: usize,
    },

    /// A parameter without a value.
    #[error("malformed parameter `{0}`")]
    MalformedParam(String),

    /// A parameter that is not a known override.
    #[error("unknown parameter `{0}`")]
    UnknownParam(String),

    /// Error parsing field value.
    #[error("failed to parse field")]
    ParseInt(#[from] std::num::ParseIntError),
}
