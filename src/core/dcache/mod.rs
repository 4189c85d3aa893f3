//! L1 data cache timing model.
//!
//! Requests from the LSU and refills from the L2 meet at a one-per-cycle arbiter (refills win)
//! and walk a three stage pipeline: Lookup, DataRead, Deallocate.  Misses are parked in the MSHR
//! file and leave the pipeline without further action; the refill that resolves them re-enters
//! the pipeline and acknowledges every access parked on its entry when it reaches Deallocate.
//! Refill requests to the L2 are gated by the credits the L2 grants.
pub mod cache;
pub mod config;
pub mod mshr;
pub mod policy;
pub mod stats;

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info};
use smallvec::SmallVec;

use crate::base::credit::CreditCounter;
use crate::base::module::{module, Ctx, IsModule, ModuleBase, ModuleBehaviors};
use crate::base::pipeline::Pipeline;
use crate::base::port::{EventSet, OutPort, SignalOutPort, UnitEvent};
use crate::core::access::{AccessHandle, CacheState};
use crate::error::{SimError, SimResult};
use crate::timeq::{ClockDomain, Cycle, Phase};

use self::cache::{CacheFuncModel, Lookup};
use self::config::DcacheConfig;
use self::mshr::{MshrAllocError, MshrFile, MshrId};
use self::stats::DcacheStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DcacheEvent {
    Arbitrate,
    PipelineStep,
    MshrRequest,
}

impl UnitEvent for DcacheEvent {
    fn phase(&self) -> Phase {
        match self {
            Self::Arbitrate | Self::MshrRequest => Phase::Tick,
            Self::PipelineStep => Phase::PostTick,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Lookup = 0,
    DataRead = 1,
    Deallocate = 2,
}

const NUM_STAGES: usize = 3;

#[derive(Debug)]
pub struct DCache {
    base: ModuleBase<DcacheConfig>,
    l1_cache: CacheFuncModel,
    l1_always_hit: bool,
    mshr_file: MshrFile,
    cache_pipeline: Pipeline<AccessHandle>,
    l2cache_credits: CreditCounter,
    // arbitration holders
    l2_mem_access: Option<AccessHandle>,
    lsu_mem_access: Option<AccessHandle>,
    // misses that found the MSHR file full, waiting to re-enter arbitration
    mshr_stalled: VecDeque<AccessHandle>,
    last_admission: Option<Cycle>,
    stats: DcacheStats,

    pub out_lsu_free_req: SignalOutPort,
    pub out_lsu_lookup_ack: OutPort<AccessHandle>,
    pub out_lsu_lookup_req: OutPort<AccessHandle>,
    pub out_l2cache_req: OutPort<AccessHandle>,
    pub events: EventSet<DcacheEvent>,
}

module!(DCache, DcacheConfig);

impl DCache {
    pub fn new(config: Arc<DcacheConfig>, clock: ClockDomain) -> SimResult<Self> {
        config.validate()?;
        let l1_cache = CacheFuncModel::new(
            config.size_bytes(),
            config.l1_line_size as u64,
            config.l1_associativity as usize,
            config.policy()?,
            config.policy_seed,
        );
        Ok(Self {
            l1_cache,
            l1_always_hit: config.l1_always_hit,
            mshr_file: MshrFile::new(config.mshr_entries as usize),
            cache_pipeline: Pipeline::new("DCachePipeline", NUM_STAGES),
            l2cache_credits: CreditCounter::new("dcache"),
            l2_mem_access: None,
            lsu_mem_access: None,
            mshr_stalled: VecDeque::new(),
            last_admission: None,
            stats: DcacheStats::default(),
            out_lsu_free_req: SignalOutPort::new("out_lsu_free_req", 0),
            out_lsu_lookup_ack: OutPort::new("out_lsu_lookup_ack", 0),
            out_lsu_lookup_req: OutPort::new("out_lsu_lookup_req", 1),
            out_l2cache_req: OutPort::new("out_l2cache_req", 1),
            events: EventSet::default(),
            base: ModuleBase::new("dcache", clock, config),
        })
    }

    pub fn stats(&self) -> DcacheStats {
        self.stats
    }

    pub fn mshr_file(&self) -> &MshrFile {
        &self.mshr_file
    }

    pub fn l1_cache(&self) -> &CacheFuncModel {
        &self.l1_cache
    }

    pub fn pipeline(&self) -> &Pipeline<AccessHandle> {
        &self.cache_pipeline
    }

    pub fn l2cache_credits(&self) -> &CreditCounter {
        &self.l2cache_credits
    }

    pub fn pending_refill(&self) -> Option<AccessHandle> {
        self.l2_mem_access
    }

    pub fn pending_lsu(&self) -> Option<AccessHandle> {
        self.lsu_mem_access
    }

    pub fn stalled(&self) -> impl Iterator<Item = &AccessHandle> {
        self.mshr_stalled.iter()
    }

    fn block_addr(&self, addr: u64) -> u64 {
        self.l1_cache.decoder().block_addr(addr)
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Input ports
    ////////////////////////////////////////////////////////////////////////////////

    pub fn receive_mem_req_from_lsu(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) -> SimResult<()> {
        if let Some(held) = self.lsu_mem_access {
            return Err(SimError::protocol(
                "dcache",
                format!("lookup {access} arrived while {held} still waits for admission"),
            ));
        }
        debug!("[{}] dcache: received memory access request from LSU {access}", ctx.now);
        self.lsu_mem_access = Some(access);
        self.events.schedule(DcacheEvent::Arbitrate, 0);
        Ok(())
    }

    pub fn receive_resp_from_l2cache(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) -> SimResult<()> {
        let Some(info) = ctx.accesses.get_mut(access) else {
            return Err(SimError::protocol(
                "dcache",
                format!("refill names released access {access}"),
            ));
        };
        if let Some(held) = self.l2_mem_access {
            return Err(SimError::protocol(
                "dcache",
                format!("refill {access} arrived while refill {held} was not yet admitted"),
            ));
        }
        let block = self.l1_cache.decoder().block_addr(info.phys_addr);
        if self.mshr_file.match_refill(block).is_none() {
            return Err(SimError::protocol(
                "dcache",
                format!("refill {access} for block {block:#x} matches no MSHR entry"),
            ));
        }
        info.is_refill = true;
        info!("[{}] dcache: received cache refill {access} block={block:#x}", ctx.now);
        self.l2_mem_access = Some(access);
        self.events.schedule(DcacheEvent::Arbitrate, 0);
        Ok(())
    }

    pub fn receive_credits_from_l2cache(&mut self, ctx: &mut Ctx<'_>, credits: u32) -> SimResult<()> {
        self.l2cache_credits.grant(credits)?;
        debug!(
            "[{}] dcache: {credits} credit(s) from L2Cache, now {}",
            ctx.now,
            self.l2cache_credits.available()
        );
        if self.mshr_file.has_unsent() {
            self.events.schedule(DcacheEvent::MshrRequest, 0);
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Arbitration
    ////////////////////////////////////////////////////////////////////////////////

    fn replay_ready(&self) -> bool {
        !self.mshr_stalled.is_empty() && !self.mshr_file.is_full()
    }

    fn has_pending_admission(&self) -> bool {
        self.l2_mem_access.is_some() || self.lsu_mem_access.is_some() || self.replay_ready()
    }

    /// Admit at most one request per cycle: a pending refill first, then a miss parked on a
    /// full MSHR file, then the LSU request.  Whatever is not admitted stays held and is retried
    /// next cycle.
    pub fn arbitrate(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        if self.last_admission == Some(ctx.now) || !self.cache_pipeline.can_append() {
            if self.has_pending_admission() {
                self.events.schedule(DcacheEvent::Arbitrate, 1);
            }
            return Ok(());
        }

        let admitted = if let Some(refill) = self.l2_mem_access.take() {
            info!("[{}] dcache: admitting refill {refill}", ctx.now);
            refill
        } else if self.replay_ready() {
            let Some(replay) = self.mshr_stalled.pop_front() else {
                return Ok(());
            };
            debug!("[{}] dcache: replaying {replay}", ctx.now);
            Self::reset_for_lookup(ctx, replay);
            replay
        } else if let Some(request) = self.lsu_mem_access.take() {
            debug!("[{}] dcache: admitting LSU request {request}", ctx.now);
            Self::reset_for_lookup(ctx, request);
            self.out_lsu_lookup_req.send(request);
            request
        } else {
            return Ok(());
        };

        let pipeline = self.cache_pipeline.name();
        self.cache_pipeline.append(admitted).map_err(|h| {
            SimError::protocol("dcache", format!("{pipeline} lookup stage busy admitting {h}"))
        })?;
        self.last_admission = Some(ctx.now);
        self.events.schedule(DcacheEvent::PipelineStep, 0);

        if self.has_pending_admission() {
            self.events.schedule(DcacheEvent::Arbitrate, 1);
        }
        Ok(())
    }

    fn reset_for_lookup(ctx: &mut Ctx<'_>, access: AccessHandle) {
        if let Some(info) = ctx.accesses.get_mut(access) {
            info.cache_state = CacheState::Unknown;
            info.data_ready = false;
        }
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Pipeline
    ////////////////////////////////////////////////////////////////////////////////

    /// Run the stage handlers back to front, then move everything one stage on.
    pub fn step_pipeline(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        if let Some(&access) = self.cache_pipeline.stage(PipelineStage::Deallocate as usize) {
            self.handle_deallocate(ctx, access)?;
        }
        if let Some(&access) = self.cache_pipeline.stage(PipelineStage::DataRead as usize) {
            self.handle_data_read(ctx, access);
        }
        if let Some(&access) = self.cache_pipeline.stage(PipelineStage::Lookup as usize) {
            self.handle_lookup(ctx, access);
        }
        self.cache_pipeline.advance();
        if !self.cache_pipeline.is_empty() {
            self.events.schedule(DcacheEvent::PipelineStep, 1);
        }
        Ok(())
    }

    fn data_lookup(&mut self, now: Cycle, addr: u64) -> bool {
        if self.l1_always_hit {
            debug!("[{now}] dcache: DL1 HIT all the time: phys_addr={addr:#x}");
            self.stats.record_hit();
            return true;
        }
        match self.l1_cache.lookup(addr) {
            Lookup::Hit { set, way } => {
                // MRU update on hit
                self.l1_cache.touch_mru(set, way);
                debug!("[{now}] dcache: DL1 HIT: phys_addr={addr:#x}");
                self.stats.record_hit();
                true
            }
            Lookup::Miss { .. } => {
                debug!("[{now}] dcache: DL1 MISS: phys_addr={addr:#x}");
                self.stats.record_miss();
                false
            }
        }
    }

    fn handle_lookup(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) {
        let Some(info) = ctx.accesses.get(access) else {
            return;
        };
        if info.is_refill {
            debug!("[{}] dcache: incoming cache refill {access} in lookup", ctx.now);
            return;
        }
        if !info.is_valid() {
            debug!("[{}] dcache: {access} flushed, skipping lookup", ctx.now);
            return;
        }
        let addr = info.phys_addr;

        if self.data_lookup(ctx.now, addr) {
            if let Some(info) = ctx.accesses.get_mut(access) {
                info.cache_state = CacheState::Hit;
            }
            return;
        }

        let block = self.block_addr(addr);
        let mshr = match self.mshr_file.allocate(block, access) {
            Ok(id) => {
                info!("[{}] dcache: new MSHR entry {} for {access} block={block:#x}", ctx.now, id.slot());
                self.stats.mshr_allocations = self.stats.mshr_allocations.saturating_add(1);
                self.events.schedule(DcacheEvent::MshrRequest, 1);
                Some(id)
            }
            Err(MshrAllocError::AlreadyTracked(id)) => {
                info!("[{}] dcache: {access} merged onto MSHR entry {} block={block:#x}", ctx.now, id.slot());
                self.mshr_file.attach(id, access);
                self.stats.mshr_merges = self.stats.mshr_merges.saturating_add(1);
                Some(id)
            }
            Err(MshrAllocError::Full) => {
                // replayable only once this pass has left the pipeline
                info!("[{}] dcache: MSHR file full, {access} will be replayed", ctx.now);
                self.stats.mshr_full_stalls = self.stats.mshr_full_stalls.saturating_add(1);
                None
            }
        };
        if let Some(info) = ctx.accesses.get_mut(access) {
            info.cache_state = CacheState::Miss;
            info.mshr = mshr;
        }
    }

    fn handle_data_read(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) {
        let Some(info) = ctx.accesses.get_mut(access) else {
            return;
        };
        debug!("[{}] dcache: {access} in data read stage", ctx.now);
        // misses wait at their MSHR entry, refills carry nothing to read
        if info.is_valid() && !info.is_refill && info.is_cache_hit() {
            info.data_ready = true;
        }
    }

    fn handle_deallocate(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) -> SimResult<()> {
        let Some(info) = ctx.accesses.get(access) else {
            return Ok(());
        };
        if info.is_refill {
            return self.complete_refill(ctx, access);
        }
        match (info.is_valid(), info.cache_state) {
            // already acked by a refill that beat it through the pipeline
            (_, CacheState::Miss) if info.data_ready => {
                debug!("[{}] dcache: {access} served while in flight, not deallocating", ctx.now);
            }
            (_, CacheState::Miss) if info.mshr.is_some() => {
                debug!("[{}] dcache: {access} parked on a miss, not deallocating", ctx.now);
            }
            (true, CacheState::Miss) => {
                info!("[{}] dcache: MSHR file full, {access} parked for replay", ctx.now);
                self.mshr_stalled.push_back(access);
                if !self.mshr_file.is_full() {
                    self.events.schedule(DcacheEvent::Arbitrate, 1);
                }
            }
            (true, CacheState::Hit) => {
                debug!("[{}] dcache: deallocating {access}", ctx.now);
                self.out_lsu_free_req.send(());
                self.out_lsu_lookup_ack.send(access);
            }
            (false, _) => {
                debug!("[{}] dcache: dropping flushed {access}", ctx.now);
                self.stats.flushed_dropped = self.stats.flushed_dropped.saturating_add(1);
                ctx.accesses.release(access);
            }
            (true, CacheState::Unknown) => {
                return Err(SimError::protocol(
                    "dcache",
                    format!("{access} reached deallocate without a lookup result"),
                ));
            }
        }
        Ok(())
    }

    /// Install the line, free the entry and acknowledge everything parked on it.
    fn complete_refill(&mut self, ctx: &mut Ctx<'_>, refill: AccessHandle) -> SimResult<()> {
        let block = match ctx.accesses.get(refill) {
            Some(info) => self.block_addr(info.phys_addr),
            None => return Ok(()),
        };
        let entry = self
            .mshr_file
            .ready_entry(block)
            .and_then(|id| self.mshr_file.free(id))
            .ok_or_else(|| {
                SimError::protocol(
                    "dcache",
                    format!("refill {refill} for block {block:#x} has no MSHR entry to free"),
                )
            })?;

        let parked: SmallVec<[AccessHandle; 8]> = entry.accesses().collect();
        if parked.iter().any(|&a| ctx.accesses.is_valid(a)) {
            let fill = self.l1_cache.allocate(block);
            self.stats.refills = self.stats.refills.saturating_add(1);
            info!(
                "[{}] dcache: reload complete block={block:#x} set={} way={} evicted={:?}",
                ctx.now, fill.set, fill.way, fill.evicted
            );
        }

        for access in parked {
            if !ctx.accesses.is_valid(access) {
                self.stats.flushed_dropped = self.stats.flushed_dropped.saturating_add(1);
                ctx.accesses.release(access);
                continue;
            }
            if let Some(info) = ctx.accesses.get_mut(access) {
                info.is_refill = false;
                info.data_ready = true;
                info.mshr = None;
            }
            self.out_lsu_lookup_ack.send(access);
        }

        if !self.mshr_stalled.is_empty() {
            self.events.schedule(DcacheEvent::Arbitrate, 1);
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Miss requests to L2Cache
    ////////////////////////////////////////////////////////////////////////////////

    /// Send the oldest unsent refill request if a credit is available.  Without a credit the
    /// entry stays allocated; the next credit arrival retries.
    pub fn mshr_request(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        let Some(id) = self.next_sendable_entry(ctx) else {
            return Ok(());
        };
        if !self.l2cache_credits.has_credit() {
            debug!("[{}] dcache: no L2Cache credit, holding MSHR entry {}", ctx.now, id.slot());
            self.stats.credit_stalls = self.stats.credit_stalls.saturating_add(1);
            return Ok(());
        }
        let Some(origin) = self.mshr_file.get(id).map(|e| e.origin()) else {
            return Ok(());
        };
        self.l2cache_credits.consume()?;
        self.out_l2cache_req.send(origin);
        self.mshr_file.mark_sent(id);
        info!(
            "[{}] dcache: sending miss request {origin} to L2Cache, {} credit(s) left",
            ctx.now,
            self.l2cache_credits.available()
        );
        if self.mshr_file.has_unsent() {
            self.events.schedule(DcacheEvent::MshrRequest, 1);
        }
        Ok(())
    }

    /// Oldest unsent entry with a live access to send on its behalf.  Flushed origins are
    /// replaced by their first live waiter; entries nobody waits on any more are freed.
    fn next_sendable_entry(&mut self, ctx: &mut Ctx<'_>) -> Option<MshrId> {
        while let Some(id) = self.mshr_file.next_to_send() {
            let entry = self.mshr_file.get_mut(id)?;
            if ctx.accesses.is_valid(entry.origin()) {
                return Some(id);
            }
            match entry.promote_waiter() {
                Some(flushed) => {
                    self.stats.flushed_dropped = self.stats.flushed_dropped.saturating_add(1);
                    ctx.accesses.release(flushed);
                }
                None => {
                    let flushed = entry.origin();
                    self.mshr_file.free(id);
                    self.stats.flushed_dropped = self.stats.flushed_dropped.saturating_add(1);
                    ctx.accesses.release(flushed);
                    debug!("[{}] dcache: freed MSHR entry {} of flushed {flushed}", ctx.now, id.slot());
                    if !self.mshr_stalled.is_empty() {
                        self.events.schedule(DcacheEvent::Arbitrate, 1);
                    }
                }
            }
        }
        None
    }
}

impl ModuleBehaviors for DCache {
    fn busy(&self) -> bool {
        !self.cache_pipeline.is_empty()
            || !self.mshr_file.is_empty()
            || !self.mshr_stalled.is_empty()
            || self.l2_mem_access.is_some()
            || self.lsu_mem_access.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::access::{AccessArena, InstRef, MemoryAccessInfo};

    fn dcache(cfg: DcacheConfig) -> DCache {
        DCache::new(Arc::new(cfg), ClockDomain::new("core", 1)).unwrap()
    }

    fn load(arena: &mut AccessArena, addr: u64) -> AccessHandle {
        arena.insert(MemoryAccessInfo::new(addr, InstRef::default()))
    }

    // Admit one LSU request at `now` and run the pipeline through all three stages.
    fn run_lookup(dc: &mut DCache, arena: &mut AccessArena, now: Cycle, access: AccessHandle) {
        let mut ctx = Ctx::new(now, arena);
        dc.receive_mem_req_from_lsu(&mut ctx, access).unwrap();
        dc.arbitrate(&mut ctx).unwrap();
        for t in now..now + 3 {
            let mut ctx = Ctx::new(t, arena);
            dc.step_pipeline(&mut ctx).unwrap();
        }
    }

    #[test]
    fn always_hit_acks_after_three_cycles() {
        let mut arena = AccessArena::new();
        let mut dc = dcache(DcacheConfig {
            l1_always_hit: true,
            ..DcacheConfig::default()
        });
        let a = load(&mut arena, 0x1000);
        run_lookup(&mut dc, &mut arena, 0, a);
        assert_eq!(1, dc.stats().hits);
        assert_eq!(1, dc.out_lsu_lookup_ack.pending().len());
        assert_eq!(1, dc.out_lsu_free_req.pending().len());
        assert_eq!(1, dc.out_lsu_lookup_req.pending().len());
        assert!(dc.mshr_file().is_empty());
        assert!(arena.get(a).unwrap().data_ready);
    }

    #[test]
    fn miss_without_credit_is_held() {
        let mut arena = AccessArena::new();
        let mut dc = dcache(DcacheConfig::default());
        let a = load(&mut arena, 0x1000);
        run_lookup(&mut dc, &mut arena, 0, a);
        assert_eq!(1, dc.stats().misses);
        assert_eq!(1, dc.mshr_file().len());
        assert!(dc.out_lsu_lookup_ack.pending().is_empty());

        dc.mshr_request(&mut Ctx::new(3, &mut arena)).unwrap();
        assert!(dc.out_l2cache_req.pending().is_empty());
        assert_eq!(1, dc.stats().credit_stalls);

        dc.receive_credits_from_l2cache(&mut Ctx::new(4, &mut arena), 1).unwrap();
        assert!(dc.events.is_scheduled(DcacheEvent::MshrRequest, 0));
        dc.mshr_request(&mut Ctx::new(4, &mut arena)).unwrap();
        assert_eq!(a, dc.out_l2cache_req.pending()[0].data);
        assert!(!dc.l2cache_credits().has_credit());
    }

    #[test]
    fn refill_with_no_entry_is_fatal() {
        let mut arena = AccessArena::new();
        let mut dc = dcache(DcacheConfig::default());
        let a = load(&mut arena, 0x1000);
        let err = dc
            .receive_resp_from_l2cache(&mut Ctx::new(0, &mut arena), a)
            .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn second_lsu_request_before_admission_is_fatal() {
        let mut arena = AccessArena::new();
        let mut dc = dcache(DcacheConfig::default());
        let a = load(&mut arena, 0x1000);
        let b = load(&mut arena, 0x2000);
        let mut ctx = Ctx::new(0, &mut arena);
        dc.receive_mem_req_from_lsu(&mut ctx, a).unwrap();
        assert!(dc.receive_mem_req_from_lsu(&mut ctx, b).is_err());
    }

    #[test]
    fn refill_beats_lsu_and_lsu_is_kept() {
        let mut arena = AccessArena::new();
        let mut dc = dcache(DcacheConfig::default());
        let a = load(&mut arena, 0x1000);
        run_lookup(&mut dc, &mut arena, 0, a);
        dc.receive_credits_from_l2cache(&mut Ctx::new(3, &mut arena), 1).unwrap();
        dc.mshr_request(&mut Ctx::new(3, &mut arena)).unwrap();

        let b = load(&mut arena, 0x2000);
        let mut ctx = Ctx::new(10, &mut arena);
        dc.receive_resp_from_l2cache(&mut ctx, a).unwrap();
        dc.receive_mem_req_from_lsu(&mut ctx, b).unwrap();
        dc.arbitrate(&mut ctx).unwrap();
        assert_eq!(Some(&a), dc.pipeline().stage(0));
        assert_eq!(Some(b), dc.pending_lsu());
        assert!(dc.events.is_scheduled(DcacheEvent::Arbitrate, 1));

        // a second arbitration in the same cycle admits nothing
        dc.arbitrate(&mut ctx).unwrap();
        assert_eq!(Some(b), dc.pending_lsu());

        dc.step_pipeline(&mut ctx).unwrap();
        let mut ctx = Ctx::new(11, &mut arena);
        dc.arbitrate(&mut ctx).unwrap();
        assert_eq!(None, dc.pending_lsu());
        assert_eq!(Some(&b), dc.pipeline().stage(0));
    }

    #[test]
    fn full_file_miss_replays_only_after_leaving_pipeline() {
        let mut arena = AccessArena::new();
        let mut dc = dcache(DcacheConfig {
            mshr_entries: 1,
            ..DcacheConfig::default()
        });
        let a = load(&mut arena, 0x1000);
        run_lookup(&mut dc, &mut arena, 0, a);
        dc.receive_credits_from_l2cache(&mut Ctx::new(3, &mut arena), 1).unwrap();
        dc.mshr_request(&mut Ctx::new(3, &mut arena)).unwrap();

        // the refill enters one cycle ahead of b
        let b = load(&mut arena, 0x2000);
        let mut ctx = Ctx::new(4, &mut arena);
        dc.receive_resp_from_l2cache(&mut ctx, a).unwrap();
        dc.receive_mem_req_from_lsu(&mut ctx, b).unwrap();
        dc.arbitrate(&mut ctx).unwrap();
        dc.step_pipeline(&mut ctx).unwrap();

        let mut ctx = Ctx::new(5, &mut arena);
        dc.arbitrate(&mut ctx).unwrap();
        dc.step_pipeline(&mut ctx).unwrap();
        assert_eq!(1, dc.stats().mshr_full_stalls);
        assert_eq!(0, dc.stalled().count());

        // the entry frees while b is still in data read
        let mut ctx = Ctx::new(6, &mut arena);
        dc.step_pipeline(&mut ctx).unwrap();
        assert!(dc.mshr_file().is_empty());
        assert_eq!(0, dc.stalled().count());
        dc.arbitrate(&mut ctx).unwrap();
        assert_eq!(None, dc.pipeline().stage(0));

        let _ = dc.events.drain();
        let mut ctx = Ctx::new(7, &mut arena);
        dc.step_pipeline(&mut ctx).unwrap();
        assert_eq!(vec![&b], dc.stalled().collect::<Vec<_>>());
        assert!(dc.events.is_scheduled(DcacheEvent::Arbitrate, 1));

        let mut ctx = Ctx::new(8, &mut arena);
        dc.arbitrate(&mut ctx).unwrap();
        assert_eq!(Some(&b), dc.pipeline().stage(0));
        for t in 8..11 {
            dc.step_pipeline(&mut Ctx::new(t, &mut arena)).unwrap();
        }
        assert_eq!(2, dc.stats().mshr_allocations);
        assert_eq!(1, dc.mshr_file().len());
        let acked: Vec<_> = dc.out_lsu_lookup_ack.pending().iter().map(|d| d.data).collect();
        assert_eq!(vec![a], acked);
    }
}
