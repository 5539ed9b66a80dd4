//! The flow scheduler: instantiates flows at their arrival times, tracks them to completion
//! and produces one record per instantiated flow.

use rustc_hash::FxHashMap;

use crate::event::EventQueue;
use crate::network::types::{Flow, FlowId, NodeId};
use crate::transport::{Completion, ConnId, Transport, TransportError, TransportEvent};
use crate::units::{Bytes, Nanosecs};

/// The arrival of the flow at the given position of the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowArrival(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Waiting for its arrival time.
    Pending,
    /// Transferring over a connection.
    Active { conn: ConnId },
    /// Every byte was acknowledged at `at`.
    Completed { at: Nanosecs, acked: Bytes },
    /// Still transferring when the simulation ended.
    Unfinished { acked: Bytes },
    /// Arrives after the end of the simulation; never instantiated.
    Skipped,
}

/// The outcome of one flow.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FlowRecord {
    pub id: FlowId,
    pub src: NodeId,
    pub dst: NodeId,
    pub size: Bytes,
    pub start: Nanosecs,
    /// The completion time, or the simulation end for unfinished flows.
    pub end: Nanosecs,
    pub duration: Nanosecs,
    pub acked: Bytes,
    pub finished: bool,
    pub metadata: String,
}

impl FlowRecord {
    pub fn finished_marker(&self) -> &'static str {
        if self.finished {
            "YES"
        } else {
            "NO_ONGOING"
        }
    }
}

#[derive(Debug)]
pub struct FlowScheduler {
    flows: Vec<Flow>,
    states: Vec<FlowState>,
    active: FxHashMap<ConnId, usize>,
    end: Nanosecs,
    records: Option<Vec<FlowRecord>>,
}

impl FlowScheduler {
    /// Orders `flows` by arrival time (input order for ties) and schedules an arrival event
    /// for each flow that arrives no later than `end`. The others are skipped.
    pub fn install<E>(mut flows: Vec<Flow>, end: Nanosecs, q: &mut EventQueue<E>) -> Self
    where
        E: From<FlowArrival>,
    {
        flows.sort_by_key(|f| f.start);
        let states = flows
            .iter()
            .enumerate()
            .map(|(i, f)| {
                if f.start <= end {
                    q.schedule(f.start, FlowArrival(i).into());
                    FlowState::Pending
                } else {
                    FlowState::Skipped
                }
            })
            .collect::<Vec<_>>();
        let nr_skipped = states
            .iter()
            .filter(|s| matches!(s, FlowState::Skipped))
            .count();
        tracing::info!(
            nr_flows = flows.len(),
            nr_skipped,
            "installed flow schedule"
        );
        Self {
            flows,
            states,
            active: FxHashMap::default(),
            end,
            records: None,
        }
    }

    /// Opens the connection of the arriving flow.
    pub fn on_arrival<E>(
        &mut self,
        q: &mut EventQueue<E>,
        transport: &mut Transport<'_>,
        FlowArrival(idx): FlowArrival,
    ) -> Result<(), SchedulerError>
    where
        E: From<TransportEvent> + From<Completion>,
    {
        let flow = self
            .flows
            .get(idx)
            .ok_or(SchedulerError::UnknownArrival(idx))?;
        let conn = transport.open(q, flow)?;
        tracing::debug!(id = %flow.id, src = %flow.src, dst = %flow.dst, size = %flow.size, "flow started");
        self.states[idx] = FlowState::Active { conn };
        self.active.insert(conn, idx);
        Ok(())
    }

    /// Marks the flow of `conn` as completed and closes the connection.
    pub fn on_completion<E>(
        &mut self,
        q: &mut EventQueue<E>,
        transport: &mut Transport<'_>,
        Completion(conn): Completion,
    ) -> Result<(), SchedulerError> {
        let idx = self
            .active
            .remove(&conn)
            .ok_or(SchedulerError::UnknownConnection(conn))?;
        let acked = transport
            .close(q, conn)
            .ok_or(SchedulerError::UnknownConnection(conn))?;
        let at = q.now();
        let flow = &self.flows[idx];
        tracing::debug!(id = %flow.id, fct = %(at - flow.start), "flow finished");
        self.states[idx] = FlowState::Completed { at, acked };
        Ok(())
    }

    /// Closes every open connection, marks its flow unfinished and freezes the records.
    pub fn finalize<E>(
        &mut self,
        q: &mut EventQueue<E>,
        transport: &mut Transport<'_>,
    ) -> Result<(), SchedulerError> {
        let mut open = self.active.drain().collect::<Vec<_>>();
        open.sort_unstable();
        for (conn, idx) in open {
            let acked = transport
                .close(q, conn)
                .ok_or(SchedulerError::UnknownConnection(conn))?;
            self.states[idx] = FlowState::Unfinished { acked };
        }
        if self.records.is_none() {
            self.records = Some(self.collect_records());
        }
        Ok(())
    }

    fn collect_records(&self) -> Vec<FlowRecord> {
        self.flows
            .iter()
            .zip(&self.states)
            .filter_map(|(f, &state)| {
                let (end, acked, finished) = match state {
                    FlowState::Completed { at, acked } => (at, acked, true),
                    FlowState::Unfinished { acked } => (self.end, acked, false),
                    // Pending flows only remain if finalize ran before their arrival
                    FlowState::Pending => (self.end, Bytes::ZERO, false),
                    FlowState::Active { .. } | FlowState::Skipped => return None,
                };
                Some(FlowRecord {
                    id: f.id,
                    src: f.src,
                    dst: f.dst,
                    size: f.size,
                    start: f.start,
                    end,
                    duration: end.saturating_sub(f.start),
                    acked,
                    finished,
                    metadata: f.metadata.clone(),
                })
            })
            .collect()
    }

    /// One record per instantiated flow, in schedule order.
    pub fn write_results(&self) -> Result<&[FlowRecord], SchedulerError> {
        self.records.as_deref().ok_or(SchedulerError::NotFinalized)
    }

    /// The flows in schedule order with their states.
    pub fn states(&self) -> impl Iterator<Item = (&Flow, FlowState)> {
        self.flows.iter().zip(self.states.iter().copied())
    }

    pub fn nr_active(&self) -> usize {
        self.active.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("results requested before the scheduler was finalized")]
    NotFinalized,

    #[error("no flow at schedule position {0}")]
    UnknownArrival(usize),

    #[error("no active flow on connection {0}")]
    UnknownConnection(ConnId),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::routing::EcmpHash;
    use crate::testing;
    use crate::transport::tcp::TcpConfig;

    #[derive(Debug)]
    enum Ev {
        Arrival(FlowArrival),
        Net(TransportEvent),
        Done(Completion),
    }

    impl From<FlowArrival> for Ev {
        fn from(a: FlowArrival) -> Self {
            Ev::Arrival(a)
        }
    }

    impl From<TransportEvent> for Ev {
        fn from(e: TransportEvent) -> Self {
            Ev::Net(e)
        }
    }

    impl From<Completion> for Ev {
        fn from(c: Completion) -> Self {
            Ev::Done(c)
        }
    }

    fn run(flows: Vec<Flow>, end: Nanosecs) -> anyhow::Result<FlowScheduler> {
        let (nodes, links) = testing::eight_node_config();
        let network = Network::new(&nodes, &links)?;
        let mut transport = Transport::new(&network, TcpConfig::default(), EcmpHash::FlowId, 42);
        let mut q = EventQueue::new();
        let mut sched = FlowScheduler::install(flows, end, &mut q);
        while let Some((_, ev)) = q.pop_until(end) {
            match ev {
                Ev::Arrival(a) => sched.on_arrival(&mut q, &mut transport, a)?,
                Ev::Net(e) => transport.handle(&mut q, e)?,
                Ev::Done(c) => sched.on_completion(&mut q, &mut transport, c)?,
            }
        }
        sched.finalize(&mut q, &mut transport)?;
        assert_eq!(transport.nr_open(), 0);
        Ok(sched)
    }

    #[test]
    fn finalize_cancels_timers_and_completions() -> anyhow::Result<()> {
        let (nodes, links) = testing::eight_node_config();
        let network = Network::new(&nodes, &links)?;
        let mut transport = Transport::new(&network, TcpConfig::default(), EcmpHash::FlowId, 42);
        let mut q = EventQueue::new();
        let end = Nanosecs::new(50_000);
        let flows = (0..4)
            .map(|i| testing::flow(i, i, (i + 2) % 4, 10_000_000, 0))
            .collect();
        let mut sched = FlowScheduler::install(flows, end, &mut q);
        while let Some((_, ev)) = q.pop_until(end) {
            match ev {
                Ev::Arrival(a) => sched.on_arrival(&mut q, &mut transport, a)?,
                Ev::Net(e) => transport.handle(&mut q, e)?,
                Ev::Done(c) => sched.on_completion(&mut q, &mut transport, c)?,
            }
        }
        assert_eq!(sched.nr_active(), 4);
        sched.finalize(&mut q, &mut transport)?;
        let (mut nr_completions, mut nr_rtos) = (0, 0);
        while let Some((_, ev)) = q.pop_until(Nanosecs::MAX) {
            match ev {
                Ev::Done(_) => nr_completions += 1,
                Ev::Net(TransportEvent::Rto(_)) => nr_rtos += 1,
                _ => {}
            }
        }
        assert_eq!((nr_completions, nr_rtos), (0, 0));
        assert!(sched.write_results()?.iter().all(|r| !r.finished));
        Ok(())
    }

    #[test]
    fn finalize_reports_missing_connection() -> anyhow::Result<()> {
        let (nodes, links) = testing::eight_node_config();
        let network = Network::new(&nodes, &links)?;
        let mut transport = Transport::new(&network, TcpConfig::default(), EcmpHash::FlowId, 42);
        let mut q = EventQueue::new();
        let mut sched = FlowScheduler::install(
            vec![testing::flow(0, 0, 2, 1_000_000, 0)],
            Nanosecs::new(1000),
            &mut q,
        );
        let Some((_, Ev::Arrival(a))) = q.pop_until(Nanosecs::ZERO) else {
            panic!("missing arrival");
        };
        sched.on_arrival(&mut q, &mut transport, a)?;
        let Some((_, FlowState::Active { conn })) = sched.states().next() else {
            panic!("flow not active");
        };
        // Closed behind the scheduler's back
        transport.close(&mut q, conn);
        assert!(matches!(
            sched.finalize(&mut q, &mut transport),
            Err(SchedulerError::UnknownConnection(c)) if c == conn
        ));
        Ok(())
    }

    #[test]
    fn finalize_twice_keeps_records() -> anyhow::Result<()> {
        let (nodes, links) = testing::eight_node_config();
        let network = Network::new(&nodes, &links)?;
        let mut transport = Transport::new(&network, TcpConfig::default(), EcmpHash::FlowId, 42);
        let mut q = EventQueue::<Ev>::new();
        let mut sched = FlowScheduler::install(
            vec![testing::flow(0, 0, 2, 1000, 10)],
            Nanosecs::new(100),
            &mut q,
        );
        sched.finalize(&mut q, &mut transport)?;
        let first = sched.write_results()?.to_vec();
        sched.finalize(&mut q, &mut transport)?;
        assert_eq!(sched.write_results()?, first.as_slice());
        Ok(())
    }

    #[test]
    fn ties_keep_input_order() -> anyhow::Result<()> {
        let flows = vec![
            testing::flow(5, 0, 2, 1000, 2000),
            testing::flow(3, 1, 3, 1000, 1000),
            testing::flow(4, 2, 0, 1000, 1000),
        ];
        let sched = run(flows, Nanosecs::new(10_000_000))?;
        let ids = sched
            .write_results()?
            .iter()
            .map(|r| r.id.inner())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 4, 5]);
        Ok(())
    }

    #[test]
    fn late_flows_are_skipped() -> anyhow::Result<()> {
        let end = Nanosecs::new(1_000_000);
        let flows = vec![
            testing::flow(0, 0, 2, 1000, 0),
            testing::flow(1, 0, 2, 1000, 1_000_000),
            testing::flow(2, 0, 2, 1000, 1_000_001),
        ];
        let sched = run(flows, end)?;
        assert_eq!(sched.write_results()?.len(), 2);
        let states = sched.states().map(|(_, s)| s).collect::<Vec<_>>();
        assert!(matches!(states[0], FlowState::Completed { .. }));
        // Arrives at the end instant, so it cannot finish
        assert!(matches!(states[1], FlowState::Unfinished { .. }));
        assert_eq!(states[2], FlowState::Skipped);
        Ok(())
    }

    #[test]
    fn zero_byte_flow_completes_at_arrival() -> anyhow::Result<()> {
        let sched = run(vec![testing::flow(0, 0, 3, 0, 500)], Nanosecs::new(1000))?;
        let rec = &sched.write_results()?[0];
        assert!(rec.finished);
        assert_eq!(rec.end, Nanosecs::new(500));
        assert_eq!(rec.duration, Nanosecs::ZERO);
        Ok(())
    }

    #[test]
    fn unfinished_flows_end_at_simulation_end() -> anyhow::Result<()> {
        let end = Nanosecs::new(100_000);
        let sched = run(vec![testing::flow(0, 0, 3, 10_000_000, 0)], end)?;
        let rec = &sched.write_results()?[0];
        assert!(!rec.finished);
        assert_eq!(rec.finished_marker(), "NO_ONGOING");
        assert_eq!(rec.end, end);
        assert_eq!(rec.duration, end);
        assert!(rec.acked < rec.size);
        Ok(())
    }

    #[test]
    fn results_require_finalize() -> anyhow::Result<()> {
        let mut q = EventQueue::<Ev>::new();
        let sched = FlowScheduler::install(vec![], Nanosecs::new(10), &mut q);
        assert!(matches!(
            sched.write_results(),
            Err(SchedulerError::NotFinalized)
        ));
        Ok(())
    }

    #[test]
    fn write_results_is_idempotent() -> anyhow::Result<()> {
        let flows = (0..4)
            .map(|i| testing::flow(i, i, (i + 1) % 4, 50_000, 1000 * i as u64))
            .collect();
        let sched = run(flows, Nanosecs::new(1_000_000_000))?;
        let first = sched.write_results()?.to_vec();
        assert_eq!(sched.write_results()?, first.as_slice());
        assert!(first.iter().all(|r| r.finished && r.acked == r.size));
        Ok(())
    }
}
