//! Ports and self-events.
//!
//! A unit never calls into another unit.  It records sends on its out-ports and self-events on
//! its event set; after every handler the simulator drains both and turns them into scheduled
//! deliveries.  The delay declared on a port is the link latency in the sender's cycles.
use crate::timeq::{Cycle, Phase};

/// One send waiting to be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<T> {
    pub delay: Cycle,
    pub data: T,
}

#[derive(Debug)]
pub struct OutPort<T> {
    name: &'static str,
    delay: Cycle,
    sent: Vec<Delivery<T>>,
}

impl<T> OutPort<T> {
    pub fn new(name: &'static str, delay: Cycle) -> Self {
        Self {
            name,
            delay,
            sent: Vec::new(),
        }
    }

    pub fn send(&mut self, data: T) {
        self.sent.push(Delivery {
            delay: self.delay,
            data,
        });
    }

    /// Sends not yet picked up by the simulator.
    pub fn pending(&self) -> &[Delivery<T>] {
        &self.sent
    }
}

/// What the simulator needs from any out-port when it collects sends.
pub trait Outbox<T> {
    fn name(&self) -> &'static str;
    fn drain(&mut self) -> std::vec::Drain<'_, Delivery<T>>;
}

impl<T> Outbox<T> for OutPort<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn drain(&mut self) -> std::vec::Drain<'_, Delivery<T>> {
        self.sent.drain(..)
    }
}

/// Control-only port: the payload is the fact that something was sent.
pub type SignalOutPort = OutPort<()>;

/// Out-port whose receiver runs on a different clock.  The delay is in the sender's cycles and
/// the data lands on the first receiver edge at or after it; a crossing always costs at least
/// one sender cycle.
#[derive(Debug)]
pub struct SyncOutPort<T> {
    inner: OutPort<T>,
}

impl<T> SyncOutPort<T> {
    pub fn new(name: &'static str, delay: Cycle) -> Self {
        Self {
            inner: OutPort::new(name, delay.max(1)),
        }
    }

    pub fn send(&mut self, data: T) {
        self.inner.send(data);
    }

    pub fn pending(&self) -> &[Delivery<T>] {
        self.inner.pending()
    }
}

impl<T> Outbox<T> for SyncOutPort<T> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn drain(&mut self) -> std::vec::Drain<'_, Delivery<T>> {
        self.inner.drain()
    }
}

/// Unit-local events know which phase of the tick they belong to.
pub trait UnitEvent: Copy {
    fn phase(&self) -> Phase;
}

/// Self-events a unit asked for, with their delay in the unit's own cycles.  Scheduling is
/// collapsing: the same event requested twice for the same cycle runs once.
#[derive(Debug)]
pub struct EventSet<E> {
    scheduled: Vec<(Cycle, E)>,
}

impl<E> Default for EventSet<E> {
    fn default() -> Self {
        Self {
            scheduled: Vec::new(),
        }
    }
}

impl<E: UnitEvent + PartialEq> EventSet<E> {
    pub fn schedule(&mut self, event: E, delay: Cycle) {
        if !self.is_scheduled(event, delay) {
            self.scheduled.push((delay, event));
        }
    }

    pub fn is_scheduled(&self, event: E, delay: Cycle) -> bool {
        self.scheduled.iter().any(|&(d, e)| d == delay && e == event)
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, (Cycle, E)> {
        self.scheduled.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Ev {
        Go,
    }

    impl UnitEvent for Ev {
        fn phase(&self) -> Phase {
            Phase::Tick
        }
    }

    #[test]
    fn out_port_adds_its_delay() {
        let mut port = OutPort::new("out", 1);
        port.send(5u32);
        port.send(6u32);
        assert_eq!("out", port.name());
        let sent: Vec<_> = port.drain().collect();
        assert_eq!(
            vec![Delivery { delay: 1, data: 5 }, Delivery { delay: 1, data: 6 }],
            sent
        );
        assert!(port.pending().is_empty());
    }

    #[test]
    fn sync_port_delay_is_at_least_one() {
        let mut port = SyncOutPort::new("sync", 0);
        port.send(true);
        assert_eq!(1, port.pending()[0].delay);
    }

    #[test]
    fn event_set_collapses_duplicates() {
        let mut events = EventSet::default();
        events.schedule(Ev::Go, 1);
        events.schedule(Ev::Go, 1);
        events.schedule(Ev::Go, 2);
        assert_eq!(2, events.drain().count());
    }
}
