//! Periodic link telemetry. A tracker samples every output interface at a fixed interval
//! and keeps one time series per interface.

use crate::event::{EventId, EventQueue};
use crate::network::types::{Channel, NodeId, QueueCapacity};
use crate::network::{EdgeIndex, Network};
use crate::units::{Bytes, Nanosecs};

/// Interface counters a tracker can observe.
pub trait LinkStats {
    /// Bytes serialized on the interface up to `now`, including the serialized part of a
    /// packet still being transmitted.
    fn tx_bytes(&self, iface: EdgeIndex, now: Nanosecs) -> Bytes;

    /// Packets and bytes waiting in the interface's queue, excluding the packet being
    /// transmitted.
    fn queue_occupancy(&self, iface: EdgeIndex) -> (u64, Bytes);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    Utilization,
    Queue,
}

/// A scheduled sampling instant of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTick {
    pub kind: TrackerKind,
    pub iface: EdgeIndex,
}

/// What a tracker measures.
pub trait Sampler: std::fmt::Debug {
    const KIND: TrackerKind;

    fn new(nr_ifaces: usize) -> Self;

    /// The value of interval `[now - interval, now]` on `iface`.
    fn sample(
        &mut self,
        stats: &impl LinkStats,
        iface: EdgeIndex,
        chan: &Channel,
        now: Nanosecs,
    ) -> Result<u64, TrackerError>;

    /// The value as a fraction of what the link allows.
    fn fraction(value: u64, chan: &Channel, interval: Nanosecs) -> f64;
}

/// Bytes serialized per interval.
#[derive(Debug)]
pub struct Utilization {
    last: Vec<Bytes>,
}

impl Sampler for Utilization {
    const KIND: TrackerKind = TrackerKind::Utilization;

    fn new(nr_ifaces: usize) -> Self {
        Self {
            last: vec![Bytes::ZERO; nr_ifaces],
        }
    }

    fn sample(
        &mut self,
        stats: &impl LinkStats,
        iface: EdgeIndex,
        chan: &Channel,
        now: Nanosecs,
    ) -> Result<u64, TrackerError> {
        let total = stats.tx_bytes(iface, now);
        let last = &mut self.last[iface.index()];
        // CORRECTNESS: The byte counter is cumulative.
        if total < *last {
            return Err(TrackerError::CounterDecreased {
                from: chan.src,
                to: chan.dst,
                before: *last,
                after: total,
            });
        }
        let delta = total - *last;
        *last = total;
        Ok(delta.into_u64())
    }

    fn fraction(value: u64, chan: &Channel, interval: Nanosecs) -> f64 {
        let capacity = chan.bandwidth.into_f64() * interval.into_f64() / 1e9;
        value as f64 * 8.0 / capacity
    }
}

/// Queue occupancy at the sampling instant, in the unit of the queue's capacity.
#[derive(Debug)]
pub struct Occupancy;

impl Sampler for Occupancy {
    const KIND: TrackerKind = TrackerKind::Queue;

    fn new(_: usize) -> Self {
        Self
    }

    fn sample(
        &mut self,
        stats: &impl LinkStats,
        iface: EdgeIndex,
        chan: &Channel,
        _: Nanosecs,
    ) -> Result<u64, TrackerError> {
        let (pkts, bytes) = stats.queue_occupancy(iface);
        let capacity = chan.queue.capacity();
        let value = match capacity {
            QueueCapacity::Packets(_) => pkts,
            QueueCapacity::Bytes(_) => bytes.into_u64(),
        };
        // CORRECTNESS: A drop-tail queue never holds more than its capacity.
        if value > capacity.limit() {
            return Err(TrackerError::OverCapacity {
                from: chan.src,
                to: chan.dst,
                value,
                limit: capacity.limit(),
                unit: capacity.unit(),
            });
        }
        Ok(value)
    }

    fn fraction(value: u64, chan: &Channel, _: Nanosecs) -> f64 {
        value as f64 / chan.queue.capacity().limit() as f64
    }
}

/// One sample of one interface.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LinkSample {
    pub from: NodeId,
    pub to: NodeId,
    /// Zero-based interval index.
    pub index: u64,
    pub start: Nanosecs,
    pub end: Nanosecs,
    /// Bytes serialized in the interval, or queue occupancy at its end.
    pub value: u64,
    pub fraction: f64,
}

/// Mean and peak of one interface's series.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LinkSummary {
    pub from: NodeId,
    pub to: NodeId,
    pub nr_samples: usize,
    pub mean_value: f64,
    pub max_value: u64,
    pub mean_fraction: f64,
}

#[derive(Debug)]
pub struct LinkTracker<S> {
    interval: Nanosecs,
    end: Nanosecs,
    sampler: S,
    series: Vec<Vec<LinkSample>>,
    timers: Vec<Option<EventId>>,
    records: Option<Vec<LinkSample>>,
}

pub type UtilizationTracker = LinkTracker<Utilization>;
pub type QueueTracker = LinkTracker<Occupancy>;

impl<S: Sampler> LinkTracker<S> {
    /// Registers a sampling event for every interface of `network`, first at `interval`.
    pub fn install<E>(
        network: &Network,
        interval: Nanosecs,
        end: Nanosecs,
        q: &mut EventQueue<E>,
    ) -> Result<Self, TrackerError>
    where
        E: From<SampleTick>,
    {
        if interval == Nanosecs::ZERO {
            return Err(TrackerError::ZeroInterval);
        }
        let nr_ifaces = network.nr_edges();
        let timers = network
            .edge_indices()
            .map(|iface| {
                let at = q.now() + interval;
                (at <= end).then(|| q.schedule(at, SampleTick { kind: S::KIND, iface }.into()))
            })
            .collect();
        tracing::info!(
            kind = ?S::KIND,
            nr_ifaces,
            %interval,
            "installed link tracker"
        );
        Ok(Self {
            interval,
            end,
            sampler: S::new(nr_ifaces),
            series: vec![Vec::new(); nr_ifaces],
            timers,
            records: None,
        })
    }

    pub fn interval(&self) -> Nanosecs {
        self.interval
    }

    /// Samples the interface of `tick` and re-arms it if the next instant is within the end
    /// time.
    pub fn on_tick<E>(
        &mut self,
        q: &mut EventQueue<E>,
        network: &Network,
        stats: &impl LinkStats,
        tick: SampleTick,
    ) -> Result<(), TrackerError>
    where
        E: From<SampleTick>,
    {
        let SampleTick { iface, .. } = tick;
        let chan = network
            .channel(iface)
            .ok_or(TrackerError::UnknownInterface(iface.index()))?;
        let now = q.now();
        let value = self.sampler.sample(stats, iface, chan, now)?;
        let series = &mut self.series[iface.index()];
        series.push(LinkSample {
            from: chan.src,
            to: chan.dst,
            index: series.len() as u64,
            start: now.saturating_sub(self.interval),
            end: now,
            value,
            fraction: S::fraction(value, chan, self.interval),
        });
        let next = now + self.interval;
        self.timers[iface.index()] = (next <= self.end).then(|| q.schedule(next, tick.into()));
        Ok(())
    }

    /// The samples taken so far on `iface`.
    pub fn samples(&self, iface: EdgeIndex) -> &[LinkSample] {
        self.series.get(iface.index()).map_or(&[], |s| s.as_slice())
    }

    /// Cancels outstanding sampling events and freezes the records.
    pub fn finalize<E>(&mut self, q: &mut EventQueue<E>) {
        for timer in self.timers.iter_mut().filter_map(Option::take) {
            q.cancel(timer);
        }
        if self.records.is_none() {
            self.records = Some(self.series.iter().flatten().cloned().collect());
        }
    }

    /// All samples, grouped by interface in interface order.
    pub fn write_results(&self) -> Result<&[LinkSample], TrackerError> {
        self.records.as_deref().ok_or(TrackerError::NotFinalized)
    }

    /// Per-interface summaries, in interface order.
    pub fn summaries(&self) -> Result<Vec<LinkSummary>, TrackerError> {
        self.write_results()?;
        Ok(summarize(self.series.iter().map(|s| s.as_slice())))
    }
}

/// Summarizes per-interface series. Empty series are skipped.
pub fn summarize<'a>(series: impl IntoIterator<Item = &'a [LinkSample]>) -> Vec<LinkSummary> {
    series
        .into_iter()
        .filter_map(|s| {
            let first = s.first()?;
            let n = s.len() as f64;
            Some(LinkSummary {
                from: first.from,
                to: first.to,
                nr_samples: s.len(),
                mean_value: s.iter().map(|x| x.value as f64).sum::<f64>() / n,
                max_value: s.iter().map(|x| x.value).max().unwrap_or(0),
                mean_fraction: s.iter().map(|x| x.fraction).sum::<f64>() / n,
            })
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracking interval must be nonzero")]
    ZeroInterval,

    #[error("no interface with index {0}")]
    UnknownInterface(usize),

    #[error("byte counter of link {from}->{to} went backwards ({before} to {after})")]
    CounterDecreased {
        from: NodeId,
        to: NodeId,
        before: Bytes,
        after: Bytes,
    },

    #[error("queue of link {from}->{to} holds {value} {unit}, above its capacity of {limit}")]
    OverCapacity {
        from: NodeId,
        to: NodeId,
        value: u64,
        limit: u64,
        unit: &'static str,
    },

    #[error("results requested before the tracker was finalized")]
    NotFinalized,
}
