use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::base::module::{module, Ctx, IsModule, ModuleBase, ModuleBehaviors};
use crate::base::port::{EventSet, OutPort, UnitEvent};
use crate::core::access::AccessHandle;
use crate::error::{SimError, SimResult};
use crate::timeq::{ClockDomain, Cycle, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LsuEvent {
    Issue,
}

impl UnitEvent for LsuEvent {
    fn phase(&self) -> Phase {
        Phase::Update
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct LsuStats {
    pub issued: u64,
    pub completed: u64,
    pub flushed: u64,
    pub free_signals: u64,
    pub total_latency: u64,
    pub max_latency: u64,
}

impl LsuStats {
    pub fn avg_latency(&self) -> Option<f64> {
        (self.completed > 0).then(|| self.total_latency as f64 / self.completed as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub access: AccessHandle,
    pub phys_addr: u64,
    pub issued_at: Cycle,
    pub acked_at: Cycle,
}

impl Completion {
    pub fn latency(&self) -> Cycle {
        self.acked_at - self.issued_at
    }
}

/// Load/store unit stand-in.  Holds a queue of accesses to issue and a single DCache lookup
/// slot; a lookup goes out only while the slot is held, and the slot comes back once the DCache
/// reports the lookup as admitted.
#[derive(Debug)]
pub struct Lsu {
    base: ModuleBase<()>,
    issue_queue: VecDeque<AccessHandle>,
    slot_free: bool,
    completions: Vec<Completion>,
    stats: LsuStats,

    pub out_dcache_lookup: OutPort<AccessHandle>,
    pub events: EventSet<LsuEvent>,
}

module!(Lsu, ());

impl Lsu {
    pub fn new(clock: ClockDomain) -> Self {
        Self {
            base: ModuleBase::new("lsu", clock, Arc::new(())),
            issue_queue: VecDeque::new(),
            slot_free: false,
            completions: Vec::new(),
            stats: LsuStats::default(),
            out_dcache_lookup: OutPort::new("out_dcache_lookup", 0),
            events: EventSet::default(),
        }
    }

    pub fn stats(&self) -> LsuStats {
        self.stats
    }

    pub fn completions(&self) -> &[Completion] {
        &self.completions
    }

    pub fn queued(&self) -> usize {
        self.issue_queue.len()
    }

    pub fn slot_free(&self) -> bool {
        self.slot_free
    }

    pub fn push(&mut self, access: AccessHandle) {
        self.issue_queue.push_back(access);
        if self.slot_free {
            self.events.schedule(LsuEvent::Issue, 0);
        }
    }

    pub fn issue(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        if !self.slot_free {
            return Ok(());
        }
        while let Some(access) = self.issue_queue.pop_front() {
            let Some(info) = ctx.accesses.get_mut(access) else {
                continue;
            };
            if !info.is_valid() {
                debug!("[{}] lsu: {access} flushed before issue", ctx.now);
                self.stats.flushed = self.stats.flushed.saturating_add(1);
                ctx.accesses.release(access);
                continue;
            }
            info.issued_at = Some(ctx.now);
            debug!("[{}] lsu: issuing {access} phys_addr={:#x}", ctx.now, info.phys_addr);
            self.out_dcache_lookup.send(access);
            self.slot_free = false;
            self.stats.issued = self.stats.issued.saturating_add(1);
            break;
        }
        Ok(())
    }

    /// The DCache admitted our last lookup into its pipeline.
    pub fn receive_lookup_issued(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) -> SimResult<()> {
        if self.slot_free {
            return Err(SimError::protocol(
                "lsu",
                format!("{access} reported as issued but no lookup was outstanding"),
            ));
        }
        debug!("[{}] lsu: lookup slot free after {access}", ctx.now);
        self.slot_free = true;
        if !self.issue_queue.is_empty() {
            self.events.schedule(LsuEvent::Issue, 1);
        }
        Ok(())
    }

    pub fn receive_lookup_ack(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) -> SimResult<()> {
        let Some(info) = ctx.accesses.release(access) else {
            return Err(SimError::protocol(
                "lsu",
                format!("acknowledgment for released access {access}"),
            ));
        };
        if !info.is_valid() {
            debug!("[{}] lsu: ack for flushed {access} discarded", ctx.now);
            self.stats.flushed = self.stats.flushed.saturating_add(1);
            return Ok(());
        }
        let issued_at = info.issued_at.unwrap_or(ctx.now);
        let done = Completion {
            access,
            phys_addr: info.phys_addr,
            issued_at,
            acked_at: ctx.now,
        };
        info!(
            "[{}] lsu: {access} phys_addr={:#x} complete, latency {}",
            ctx.now,
            done.phys_addr,
            done.latency()
        );
        self.stats.completed = self.stats.completed.saturating_add(1);
        self.stats.total_latency = self.stats.total_latency.saturating_add(done.latency());
        self.stats.max_latency = self.stats.max_latency.max(done.latency());
        self.completions.push(done);
        Ok(())
    }

    pub fn receive_free_req(&mut self, _ctx: &mut Ctx<'_>) -> SimResult<()> {
        self.stats.free_signals = self.stats.free_signals.saturating_add(1);
        Ok(())
    }
}

impl ModuleBehaviors for Lsu {
    fn startup(&mut self, _ctx: &mut Ctx<'_>) -> SimResult<()> {
        self.slot_free = true;
        if !self.issue_queue.is_empty() {
            self.events.schedule(LsuEvent::Issue, 0);
        }
        Ok(())
    }

    fn busy(&self) -> bool {
        !self.issue_queue.is_empty() || !self.slot_free
    }
}
