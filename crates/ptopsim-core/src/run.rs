use crate::event::EventQueue;
use crate::flows::{FlowArrival, FlowRecord, FlowScheduler, SchedulerError};
use crate::opts::SimOpts;
use crate::optimizer::{self, OptimizerError};
use crate::spec::{Spec, SpecError};
use crate::telemetry::{
    LinkSample, LinkSummary, LinkTracker, QueueTracker, SampleTick, Sampler, TrackerError,
    TrackerKind, UtilizationTracker,
};
use crate::transport::{Completion, Transport, TransportError, TransportEvent};
use crate::units::Nanosecs;

/// Every event of a simulation.
#[derive(Debug)]
pub enum Event {
    FlowArrival(FlowArrival),
    FlowCompleted(Completion),
    Transport(TransportEvent),
    Sample(SampleTick),
    /// Reports how far the simulation got, in tenths of the end time.
    Progress(u64),
}

impl From<FlowArrival> for Event {
    fn from(a: FlowArrival) -> Self {
        Event::FlowArrival(a)
    }
}

impl From<Completion> for Event {
    fn from(c: Completion) -> Self {
        Event::FlowCompleted(c)
    }
}

impl From<TransportEvent> for Event {
    fn from(e: TransportEvent) -> Self {
        Event::Transport(e)
    }
}

impl From<SampleTick> for Event {
    fn from(t: SampleTick) -> Self {
        Event::Sample(t)
    }
}

/// The samples and per-link summaries of one tracker.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TrackerOutput {
    pub interval: Nanosecs,
    pub samples: Vec<LinkSample>,
    pub summaries: Vec<LinkSummary>,
}

impl TrackerOutput {
    fn collect<S: Sampler>(tracker: &LinkTracker<S>) -> Result<Self, TrackerError> {
        Ok(Self {
            interval: tracker.interval(),
            samples: tracker.write_results()?.to_vec(),
            summaries: tracker.summaries()?,
        })
    }
}

/// Everything a simulation produces.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SimOutput {
    pub end_time: Nanosecs,
    /// The worst-case round-trip estimate, if transport tuning was enabled.
    pub worst_case_rtt: Option<Nanosecs>,
    pub flows: Vec<FlowRecord>,
    pub link_utilization: Option<TrackerOutput>,
    pub link_queue: Option<TrackerOutput>,
}

/// Simulates `spec` until `opts.end_time` and collects the flow records and link telemetry.
///
/// This function returns an error if the specification or options are invalid, or if a
/// runtime invariant is violated.
pub fn run(spec: Spec, opts: &SimOpts) -> Result<SimOutput, Error> {
    let spec = spec.validate(opts)?;
    let network = &spec.network;
    let end = opts.end_time;

    let mut tcp = opts.tcp.clone();
    let worst_case_rtt = if opts.optimize_tcp {
        let rtt = optimizer::estimate_worst_case_rtt(network.topology())?;
        optimizer::optimize(&mut tcp, rtt);
        Some(rtt)
    } else {
        None
    };

    let mut q = EventQueue::<Event>::new();
    let mut transport = Transport::new(network, tcp, opts.ecmp_hash, opts.seed);
    let mut scheduler = FlowScheduler::install(spec.flows, end, &mut q);
    let mut utilization = opts
        .link_utilization
        .enabled
        .then(|| UtilizationTracker::install(network, opts.link_utilization.interval, end, &mut q))
        .transpose()?;
    let mut queue = opts
        .link_queue
        .enabled
        .then(|| QueueTracker::install(network, opts.link_queue.interval, end, &mut q))
        .transpose()?;
    let progress_step = Nanosecs::new(end.into_u64() / 10);
    if progress_step > Nanosecs::ZERO {
        q.schedule(progress_step, Event::Progress(1));
    }

    tracing::info!(
        nr_nodes = network.nr_nodes(),
        nr_links = network.links().count(),
        %end,
        seed = opts.seed,
        "simulation started"
    );
    while let Some((now, event)) = q.pop_until(end) {
        match event {
            Event::FlowArrival(a) => scheduler.on_arrival(&mut q, &mut transport, a)?,
            Event::FlowCompleted(c) => scheduler.on_completion(&mut q, &mut transport, c)?,
            Event::Transport(e) => transport.handle(&mut q, e)?,
            Event::Sample(tick) => match tick.kind {
                TrackerKind::Utilization => {
                    if let Some(t) = utilization.as_mut() {
                        t.on_tick(&mut q, network, &transport, tick)?;
                    }
                }
                TrackerKind::Queue => {
                    if let Some(t) = queue.as_mut() {
                        t.on_tick(&mut q, network, &transport, tick)?;
                    }
                }
            },
            Event::Progress(tenths) => {
                tracing::info!(
                    percent = tenths * 10,
                    %now,
                    active_flows = scheduler.nr_active(),
                    "simulation progress"
                );
                if tenths < 10 {
                    q.schedule(now + progress_step, Event::Progress(tenths + 1));
                }
            }
        }
    }

    scheduler.finalize(&mut q, &mut transport)?;
    if let Some(t) = utilization.as_mut() {
        t.finalize(&mut q);
    }
    if let Some(t) = queue.as_mut() {
        t.finalize(&mut q);
    }
    let flows = scheduler.write_results()?.to_vec();
    let nr_finished = flows.iter().filter(|r| r.finished).count();
    tracing::info!(
        nr_flows = flows.len(),
        nr_finished,
        nr_unfinished = flows.len() - nr_finished,
        "simulation finished"
    );
    Ok(SimOutput {
        end_time: end,
        worst_case_rtt,
        flows,
        link_utilization: utilization.as_ref().map(TrackerOutput::collect).transpose()?,
        link_queue: queue.as_ref().map(TrackerOutput::collect).transpose()?,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),

    #[error("failed to tune the transport")]
    Optimizer(#[from] OptimizerError),

    #[error("flow scheduling failed")]
    Scheduler(#[from] SchedulerError),

    #[error("packet transport failed")]
    Transport(#[from] TransportError),

    #[error("link tracking failed")]
    Tracker(#[from] TrackerError),
}
