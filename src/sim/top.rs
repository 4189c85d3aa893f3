use std::sync::Arc;

use log::{error, info, trace, warn};
use serde::Serialize;

use crate::base::module::{Ctx, ModuleBehaviors};
use crate::base::port::{Delivery, EventSet, Outbox, UnitEvent};
use crate::core::access::{AccessArena, AccessHandle, InstRef, MemoryAccessInfo};
use crate::core::dcache::stats::DcacheStats;
use crate::core::dcache::{DCache, DcacheEvent};
use crate::core::lsu::{Lsu, LsuEvent, LsuStats};
use crate::error::SimResult;
use crate::mss::biu::{Biu, BiuEvent, BiuStats};
use crate::mss::l2cache::{L2Cache, L2Event, L2Stats};
use crate::mss::memory::{Mss, MssStats};
use crate::sim::config::ModelConfig;
use crate::timeq::{ClockDomain, Cycle, EventQueue, Phase};

/// Everything the queue can hold: a unit's own event, or a message in flight on one of the
/// links between units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimEvent {
    Lsu(LsuEvent),
    Dcache(DcacheEvent),
    L2(L2Event),
    Biu(BiuEvent),

    // LSU -> DCache
    LsuLookup(AccessHandle),
    // DCache -> LSU
    LookupIssued(AccessHandle),
    LookupAck(AccessHandle),
    FreeReq,
    // DCache <-> L2Cache
    MissReq(AccessHandle),
    L2Credits(u32),
    Refill(AccessHandle),
    // L2Cache <-> BIU
    BiuReq(AccessHandle),
    BiuCredits(u32),
    BiuResp(AccessHandle),
    // BIU <-> MSS
    MssReq(AccessHandle),
    MssAck(bool),
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub final_tick: Cycle,
    pub timed_out: bool,
    pub dl1_hit_miss_ratio: Option<f64>,
    pub avg_latency: Option<f64>,
    pub live_accesses: usize,
    pub lsu: LsuStats,
    pub dcache: DcacheStats,
    pub l2cache: L2Stats,
    pub biu: BiuStats,
    pub mss: MssStats,
}

/// The LSU, DCache, L2Cache, BIU and MSS wired together around one event queue.
///
/// Handlers never reach into other units.  After each one runs, `collect` turns whatever the
/// units sent or scheduled into queue entries, converting cycle delays to ticks with the sender's
/// clock and landing deliveries on the receiver's next edge.
pub struct Sim {
    timeout: Cycle,
    queue: EventQueue<SimEvent>,
    accesses: AccessArena,
    core_clock: ClockDomain,
    mss_clock: ClockDomain,
    started: bool,
    next_uid: u64,

    lsu: Lsu,
    dcache: DCache,
    l2cache: L2Cache,
    biu: Biu,
    mss: Mss,
}

impl Sim {
    pub fn new(config: &ModelConfig) -> SimResult<Self> {
        config.validate()?;
        let core_clock = ClockDomain::new("core", config.sim.core_clock_period);
        let mss_clock = ClockDomain::new("mss", config.sim.mss_clock_period);
        Ok(Self {
            timeout: config.sim.timeout,
            queue: EventQueue::new(),
            accesses: AccessArena::new(),
            core_clock,
            mss_clock,
            started: false,
            next_uid: 0,
            lsu: Lsu::new(core_clock),
            dcache: DCache::new(Arc::new(config.dcache.clone()), core_clock)?,
            l2cache: L2Cache::new(Arc::new(config.l2cache.clone()), core_clock)?,
            biu: Biu::new(Arc::new(config.biu.clone()), core_clock)?,
            mss: Mss::new(Arc::new(config.mss.clone()), mss_clock),
        })
    }

    pub fn now(&self) -> Cycle {
        self.queue.now()
    }

    pub fn accesses(&self) -> &AccessArena {
        &self.accesses
    }

    pub fn lsu(&self) -> &Lsu {
        &self.lsu
    }

    pub fn dcache(&self) -> &DCache {
        &self.dcache
    }

    pub fn l2cache(&self) -> &L2Cache {
        &self.l2cache
    }

    pub fn biu(&self) -> &Biu {
        &self.biu
    }

    pub fn mss(&self) -> &Mss {
        &self.mss
    }

    /// Hand a new access to the LSU.  It goes out as soon as the LSU holds a lookup slot.
    pub fn issue(&mut self, phys_addr: u64, is_store: bool) -> AccessHandle {
        let inst = InstRef {
            uid: self.next_uid,
            is_store,
        };
        self.next_uid += 1;
        let access = self.accesses.insert(MemoryAccessInfo::new(phys_addr, inst));
        self.lsu.push(access);
        self.collect();
        access
    }

    /// Invalidate an in-flight access.  Units that meet it afterwards skip their side effects
    /// and give back whatever they held for it.
    pub fn flush(&mut self, access: AccessHandle) -> bool {
        let flushed = self.accesses.invalidate(access);
        if flushed {
            info!("[{}] flushing {access}", self.now());
        }
        flushed
    }

    pub fn busy(&self) -> bool {
        self.lsu.busy() || self.dcache.busy() || self.l2cache.busy() || self.biu.busy() || self.mss.busy()
    }

    fn start(&mut self) -> SimResult<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        let ctx = &mut Ctx::new(self.queue.now(), &mut self.accesses);
        // downstream units announce their capacity first
        self.biu.startup(ctx)?;
        self.l2cache.startup(ctx)?;
        self.dcache.startup(ctx)?;
        self.mss.startup(ctx)?;
        self.lsu.startup(ctx)?;
        self.collect();
        Ok(())
    }

    /// Run the next event.  Returns false once the queue is drained.
    pub fn step(&mut self) -> SimResult<bool> {
        self.start()?;
        let Some((at, _, event)) = self.queue.pop() else {
            return Ok(false);
        };
        if let Err(err) = self.dispatch(at, event) {
            error!("[{at}] {err}");
            return Err(err);
        }
        self.collect();
        Ok(true)
    }

    /// Run every event scheduled at or before `tick`.
    pub fn run_until(&mut self, tick: Cycle) -> SimResult<()> {
        self.start()?;
        while self.queue.peek_time().is_some_and(|at| at <= tick) {
            self.step()?;
        }
        Ok(())
    }

    /// Run until nothing is left to do or the timeout passes.
    pub fn run(&mut self) -> SimResult<SimReport> {
        self.start()?;
        let mut timed_out = false;
        while let Some(at) = self.queue.peek_time() {
            if at > self.timeout {
                warn!("timeout after {} ticks, stopping with work pending", self.timeout);
                timed_out = true;
                break;
            }
            self.step()?;
        }
        info!("simulation finished at tick {}", self.now());
        Ok(self.report(timed_out))
    }

    pub fn report(&self, timed_out: bool) -> SimReport {
        let dcache = self.dcache.stats();
        let lsu = self.lsu.stats();
        SimReport {
            final_tick: self.now(),
            timed_out,
            dl1_hit_miss_ratio: dcache.hit_miss_ratio(),
            avg_latency: lsu.avg_latency(),
            live_accesses: self.accesses.live(),
            lsu,
            dcache,
            l2cache: self.l2cache.stats(),
            biu: self.biu.stats(),
            mss: self.mss.stats(),
        }
    }

    fn dispatch(&mut self, at: Cycle, event: SimEvent) -> SimResult<()> {
        let ctx = &mut Ctx::new(at, &mut self.accesses);
        match event {
            SimEvent::Lsu(LsuEvent::Issue) => self.lsu.issue(ctx),
            SimEvent::Dcache(DcacheEvent::Arbitrate) => self.dcache.arbitrate(ctx),
            SimEvent::Dcache(DcacheEvent::PipelineStep) => self.dcache.step_pipeline(ctx),
            SimEvent::Dcache(DcacheEvent::MshrRequest) => self.dcache.mshr_request(ctx),
            SimEvent::L2(L2Event::HandleReq) => self.l2cache.handle_req(ctx),
            SimEvent::L2(L2Event::HandleResp) => self.l2cache.handle_resp(ctx),
            SimEvent::Biu(BiuEvent::HandleBiuReq) => self.biu.handle_biu_req(ctx),
            SimEvent::Biu(BiuEvent::HandleMssAck) => self.biu.handle_mss_ack(ctx),

            SimEvent::LsuLookup(access) => self.dcache.receive_mem_req_from_lsu(ctx, access),
            SimEvent::LookupIssued(access) => self.lsu.receive_lookup_issued(ctx, access),
            SimEvent::LookupAck(access) => self.lsu.receive_lookup_ack(ctx, access),
            SimEvent::FreeReq => self.lsu.receive_free_req(ctx),
            SimEvent::MissReq(access) => self.l2cache.receive_req_from_dcache(ctx, access),
            SimEvent::L2Credits(credits) => self.dcache.receive_credits_from_l2cache(ctx, credits),
            SimEvent::Refill(access) => self.dcache.receive_resp_from_l2cache(ctx, access),
            SimEvent::BiuReq(access) => self.biu.receive_req_from_l2cache(ctx, access),
            SimEvent::BiuCredits(credits) => self.l2cache.receive_credits_from_biu(ctx, credits),
            SimEvent::BiuResp(access) => self.l2cache.receive_resp_from_biu(ctx, access),
            SimEvent::MssReq(access) => self.mss.receive_req_from_biu(ctx, access),
            SimEvent::MssAck(done) => self.biu.get_ack_from_mss(ctx, done),
        }
    }

    /// Move every pending send and self-event from the units into the queue.
    fn collect(&mut self) {
        let now = self.queue.now();
        let queue = &mut self.queue;
        let core = self.core_clock;
        let mss = self.mss_clock;

        schedule_events(queue, core, now, &mut self.lsu.events, SimEvent::Lsu);
        schedule_events(queue, core, now, &mut self.dcache.events, SimEvent::Dcache);
        schedule_events(queue, core, now, &mut self.l2cache.events, SimEvent::L2);
        schedule_events(queue, core, now, &mut self.biu.events, SimEvent::Biu);

        deliver(queue, now, core, core, &mut self.lsu.out_dcache_lookup, SimEvent::LsuLookup);

        deliver(queue, now, core, core, &mut self.dcache.out_lsu_lookup_req, SimEvent::LookupIssued);
        deliver(queue, now, core, core, &mut self.dcache.out_lsu_lookup_ack, SimEvent::LookupAck);
        deliver(queue, now, core, core, &mut self.dcache.out_lsu_free_req, |()| SimEvent::FreeReq);
        deliver(queue, now, core, core, &mut self.dcache.out_l2cache_req, SimEvent::MissReq);

        deliver(queue, now, core, core, &mut self.l2cache.out_biu_req, SimEvent::BiuReq);
        deliver(queue, now, core, core, &mut self.l2cache.out_dcache_credits, SimEvent::L2Credits);
        deliver(queue, now, core, core, &mut self.l2cache.out_dcache_resp, SimEvent::Refill);

        deliver(queue, now, core, core, &mut self.biu.out_biu_credits, SimEvent::BiuCredits);
        deliver(queue, now, core, core, &mut self.biu.out_biu_resp, SimEvent::BiuResp);
        deliver(queue, now, core, mss, &mut self.biu.out_mss_req_sync, SimEvent::MssReq);

        deliver(queue, now, mss, core, &mut self.mss.out_biu_ack_sync, SimEvent::MssAck);
    }
}

fn schedule_events<E: UnitEvent + PartialEq>(
    queue: &mut EventQueue<SimEvent>,
    clock: ClockDomain,
    now: Cycle,
    events: &mut EventSet<E>,
    wrap: impl Fn(E) -> SimEvent,
) {
    for (delay, event) in events.drain() {
        let at = clock.next_edge(now) + clock.to_ticks(delay);
        queue.schedule_unique(at, event.phase(), wrap(event));
    }
}

fn deliver<T>(
    queue: &mut EventQueue<SimEvent>,
    now: Cycle,
    src: ClockDomain,
    dst: ClockDomain,
    port: &mut impl Outbox<T>,
    wrap: impl Fn(T) -> SimEvent,
) {
    let name = port.name();
    for Delivery { delay, data } in port.drain() {
        let at = dst.next_edge(now + src.to_ticks(delay));
        trace!("[{now}] {name}: delivery due at tick {at}");
        queue.schedule(at, Phase::PortUpdate, wrap(data));
    }
}
