//! The discrete-event kernel: a virtual clock and a queue of timestamped events.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

use crate::units::Nanosecs;

identifier!(EventId, u64);

#[derive(Debug)]
struct Scheduled<E> {
    at: Nanosecs,
    id: EventId,
    event: E,
}

// Min-heap on (time, scheduling order)
impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.id.cmp(&self.id))
    }
}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<E> Eq for Scheduled<E> {}

/// A queue of events ordered by time. Events scheduled for the same instant are delivered in
/// the order they were scheduled.
#[derive(Debug)]
pub struct EventQueue<E> {
    now: Nanosecs,
    next_id: EventId,
    heap: BinaryHeap<Scheduled<E>>,
    // IDs of scheduled events that have neither run nor been cancelled
    live: FxHashSet<EventId>,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: Nanosecs::ZERO,
            next_id: EventId::ZERO,
            heap: BinaryHeap::new(),
            live: FxHashSet::default(),
        }
    }

    /// The current simulated time.
    pub fn now(&self) -> Nanosecs {
        self.now
    }

    /// Schedules `event` at absolute time `at`, which must not lie in the past.
    pub fn schedule(&mut self, at: Nanosecs, event: E) -> EventId {
        assert!(at >= self.now, "event scheduled in the past ({at} < {})", self.now);
        let id = self.next_id;
        self.next_id = id.next();
        self.heap.push(Scheduled { at, id, event });
        self.live.insert(id);
        id
    }

    /// Schedules `event` `delay` after the current time.
    pub fn schedule_in(&mut self, delay: Nanosecs, event: E) -> EventId {
        self.schedule(self.now + delay, event)
    }

    /// Cancels a pending event. Cancelling an event that already ran is a no-op.
    pub fn cancel(&mut self, id: EventId) {
        self.live.remove(&id);
    }

    /// Removes the next live event if it is due no later than `end`, advancing the clock to
    /// its time.
    pub fn pop_until(&mut self, end: Nanosecs) -> Option<(Nanosecs, E)> {
        while let Some(top) = self.heap.peek() {
            if top.at > end {
                return None;
            }
            let Scheduled { at, id, event } = self.heap.pop()?;
            if !self.live.remove(&id) {
                continue;
            }
            self.now = at;
            return Some((at, event));
        }
        None
    }

    /// Advances the clock to `at` without running anything.
    pub fn advance_to(&mut self, at: Nanosecs) {
        self.now = self.now.max(at);
    }

    /// The number of pending events.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<E>(q: &mut EventQueue<E>, end: Nanosecs) -> Vec<(Nanosecs, E)> {
        std::iter::from_fn(|| q.pop_until(end)).collect()
    }

    #[test]
    fn events_pop_in_time_order() {
        let mut q = EventQueue::new();
        q.schedule(Nanosecs::new(30), "c");
        q.schedule(Nanosecs::new(10), "a");
        q.schedule(Nanosecs::new(20), "b");
        let order = drain(&mut q, Nanosecs::MAX)
            .into_iter()
            .map(|(_, e)| e)
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(q.now(), Nanosecs::new(30));
    }

    #[test]
    fn ties_pop_in_scheduling_order() {
        let mut q = EventQueue::new();
        for i in 0..10 {
            q.schedule(Nanosecs::new(5), i);
        }
        let order = drain(&mut q, Nanosecs::MAX)
            .into_iter()
            .map(|(_, e)| e)
            .collect::<Vec<_>>();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn cancelled_events_never_run() {
        let mut q = EventQueue::new();
        let a = q.schedule(Nanosecs::new(1), 'a');
        q.schedule(Nanosecs::new(2), 'b');
        q.cancel(a);
        assert_eq!(drain(&mut q, Nanosecs::MAX), vec![(Nanosecs::new(2), 'b')]);
        assert!(q.is_empty());
    }

    #[test]
    fn pop_until_stops_at_end() {
        let mut q = EventQueue::new();
        q.schedule(Nanosecs::new(100), 1);
        q.schedule(Nanosecs::new(101), 2);
        assert_eq!(drain(&mut q, Nanosecs::new(100)), vec![(Nanosecs::new(100), 1)]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.now(), Nanosecs::new(100));
    }

    #[test]
    fn schedule_in_is_relative() {
        let mut q = EventQueue::new();
        q.schedule(Nanosecs::new(50), 0);
        q.pop_until(Nanosecs::MAX);
        q.schedule_in(Nanosecs::new(25), 1);
        assert_eq!(q.pop_until(Nanosecs::MAX), Some((Nanosecs::new(75), 1)));
    }
}
