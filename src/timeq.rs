/*
Time-queue for the cache/bus performance model.

Every unit in the model reacts to events that carry an explicit delay.  Nothing blocks and nothing
runs concurrently: the queue hands events out one at a time in (tick, phase, insertion) order, so
that "simultaneous" simulated activity resolves deterministically.

Units live in clock domains.  A domain is just a period expressed in ticks; unit-local delays are
counted in the owner's cycles and converted to ticks before they reach the queue.  Crossing from
one domain into another lands on the first destination edge at or after the requested tick.

A unit that cannot make progress (no credit, structure full, bus busy) simply does nothing and
relies on whichever future event clears the condition to schedule it again.
*/

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::hash::Hash;

pub type Cycle = u64;

/// Sub-cycle ordering.  Everything at an earlier phase of the same tick runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Update,
    PortUpdate,
    Tick,
    PostTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDomain {
    name: &'static str,
    period: Cycle,
}

impl ClockDomain {
    pub fn new(name: &'static str, period: Cycle) -> Self {
        assert!(period > 0, "clock period must be > 0");
        Self { name, period }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Cycle {
        self.period
    }

    // Number of ticks spanned by `cycles` cycles of this clock.
    pub fn to_ticks(&self, cycles: Cycle) -> Cycle {
        cycles.saturating_mul(self.period)
    }

    // Cycle count of this clock at tick `t` (rounded down).
    pub fn cycle_at(&self, t: Cycle) -> Cycle {
        t / self.period
    }

    // First edge of this clock at or after tick `t`.
    pub fn next_edge(&self, t: Cycle) -> Cycle {
        t.div_ceil(self.period).saturating_mul(self.period)
    }
}

#[derive(Debug)]
struct Scheduled<E> {
    at: Cycle,
    phase: Phase,
    seq: u64,
    event: E,
}

impl<E> Scheduled<E> {
    fn key(&self) -> (Cycle, Phase, u64) {
        (self.at, self.phase, self.seq)
    }
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap
        other.key().cmp(&self.key())
    }
}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Discrete event queue.  Events at the same tick and phase pop in insertion order.
#[derive(Debug)]
pub struct EventQueue<E> {
    heap: BinaryHeap<Scheduled<E>>,
    unique: HashSet<(Cycle, Phase, E)>,
    now: Cycle,
    seq: u64,
}

impl<E: Copy + Eq + Hash> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Copy + Eq + Hash> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            unique: HashSet::new(),
            now: 0,
            seq: 0,
        }
    }

    pub fn now(&self) -> Cycle {
        self.now
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn peek_time(&self) -> Option<Cycle> {
        self.heap.peek().map(|s| s.at)
    }

    pub fn schedule(&mut self, at: Cycle, phase: Phase, event: E) {
        assert!(at >= self.now, "cannot schedule into the past ({at} < {})", self.now);
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Scheduled { at, phase, seq, event });
    }

    /// Schedule an event that collapses with an identical one already pending for the same tick
    /// and phase.  Returns false if it was collapsed.
    pub fn schedule_unique(&mut self, at: Cycle, phase: Phase, event: E) -> bool {
        if !self.unique.insert((at, phase, event)) {
            return false;
        }
        self.schedule(at, phase, event);
        true
    }

    pub fn pop(&mut self) -> Option<(Cycle, Phase, E)> {
        let next = self.heap.pop()?;
        self.unique.remove(&(next.at, next.phase, next.event));
        self.now = next.at;
        Some((next.at, next.phase, next.event))
    }
}
