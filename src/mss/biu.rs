//! Bus interface unit.
//!
//! Requests from the L2Cache are queued in arrival order and put on the bus one at a time: the
//! head goes to the MSS `biu_latency` cycles after the bus frees up, and nothing else is issued
//! until the MSS acknowledges it.  Every retired request frees a queue slot, which is advertised
//! back to the L2Cache as a credit.  The queue never rejects; overflowing it means the sender
//! ignored its credits.
use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::base::module::{module, Ctx, IsModule, ModuleBase, ModuleBehaviors};
use crate::base::port::{EventSet, OutPort, SyncOutPort, UnitEvent};
use crate::core::access::AccessHandle;
use crate::error::{SimError, SimResult};
use crate::mss::config::BiuConfig;
use crate::timeq::{ClockDomain, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BiuEvent {
    HandleBiuReq,
    HandleMssAck,
}

impl UnitEvent for BiuEvent {
    fn phase(&self) -> Phase {
        Phase::Tick
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BiuStats {
    pub requests: u64,
    pub transactions: u64,
    pub skipped_invalid: u64,
    pub max_queue_occupancy: u64,
}

#[derive(Debug)]
pub struct Biu {
    base: ModuleBase<BiuConfig>,
    biu_req_queue: VecDeque<AccessHandle>,
    biu_busy: bool,
    stats: BiuStats,

    pub out_biu_credits: OutPort<u32>,
    pub out_biu_resp: OutPort<AccessHandle>,
    pub out_mss_req_sync: SyncOutPort<AccessHandle>,
    pub events: EventSet<BiuEvent>,
}

module!(Biu, BiuConfig);

impl Biu {
    pub fn new(config: Arc<BiuConfig>, clock: ClockDomain) -> SimResult<Self> {
        config.validate()?;
        Ok(Self {
            biu_req_queue: VecDeque::with_capacity(config.biu_req_queue_size as usize),
            biu_busy: false,
            stats: BiuStats::default(),
            out_biu_credits: OutPort::new("out_biu_credits", 1),
            out_biu_resp: OutPort::new("out_biu_resp", 1),
            out_mss_req_sync: SyncOutPort::new("out_mss_req_sync", config.biu_latency),
            events: EventSet::default(),
            base: ModuleBase::new("biu", clock, config),
        })
    }

    pub fn stats(&self) -> BiuStats {
        self.stats
    }

    pub fn queue_len(&self) -> usize {
        self.biu_req_queue.len()
    }

    pub fn is_bus_busy(&self) -> bool {
        self.biu_busy
    }

    fn capacity(&self) -> usize {
        self.conf().biu_req_queue_size as usize
    }

    pub fn receive_req_from_l2cache(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) -> SimResult<()> {
        self.append_req_queue(access)?;
        self.stats.requests = self.stats.requests.saturating_add(1);
        info!(
            "[{}] biu: request {access} queued, occupancy {}/{}",
            ctx.now,
            self.biu_req_queue.len(),
            self.capacity()
        );
        if !self.biu_busy {
            self.events.schedule(BiuEvent::HandleBiuReq, 0);
        }
        Ok(())
    }

    fn append_req_queue(&mut self, access: AccessHandle) -> SimResult<()> {
        if self.biu_req_queue.len() >= self.capacity() {
            return Err(SimError::protocol(
                "biu",
                format!(
                    "{access} appended to a full request queue ({} entries)",
                    self.capacity()
                ),
            ));
        }
        self.biu_req_queue.push_back(access);
        self.stats.max_queue_occupancy = self
            .stats
            .max_queue_occupancy
            .max(self.biu_req_queue.len() as u64);
        Ok(())
    }

    /// Put the queue head on the bus.  A flushed head gets no bus transaction: it is answered and
    /// retired right away so the slot and credit are not lost.
    pub fn handle_biu_req(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        if self.biu_busy {
            return Ok(());
        }
        let Some(&head) = self.biu_req_queue.front() else {
            return Ok(());
        };
        if !ctx.accesses.is_valid(head) {
            debug!("[{}] biu: head {head} flushed, skipping bus transaction", ctx.now);
            self.stats.skipped_invalid = self.stats.skipped_invalid.saturating_add(1);
            self.retire_head(head);
            if !self.biu_req_queue.is_empty() {
                self.events.schedule(BiuEvent::HandleBiuReq, 1);
            }
            return Ok(());
        }
        self.biu_busy = true;
        self.out_mss_req_sync.send(head);
        self.stats.transactions = self.stats.transactions.saturating_add(1);
        info!("[{}] biu: bus request {head} sent to MSS", ctx.now);
        Ok(())
    }

    pub fn get_ack_from_mss(&mut self, ctx: &mut Ctx<'_>, done: bool) -> SimResult<()> {
        if !done {
            return Err(SimError::protocol("biu", "MSS returned a negative acknowledgment"));
        }
        if self.biu_req_queue.is_empty() || !self.biu_busy {
            return Err(SimError::protocol(
                "biu",
                "MSS acknowledgment with no bus transaction outstanding",
            ));
        }
        debug!("[{}] biu: MSS ack received", ctx.now);
        self.events.schedule(BiuEvent::HandleMssAck, 0);
        Ok(())
    }

    pub fn handle_mss_ack(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        let Some(&head) = self.biu_req_queue.front() else {
            return Err(SimError::protocol("biu", "MSS acknowledgment with an empty queue"));
        };
        info!("[{}] biu: bus transaction for {head} complete", ctx.now);
        self.retire_head(head);
        self.biu_busy = false;
        if !self.biu_req_queue.is_empty() {
            self.events.schedule(BiuEvent::HandleBiuReq, 0);
        }
        Ok(())
    }

    fn retire_head(&mut self, head: AccessHandle) {
        self.biu_req_queue.pop_front();
        self.out_biu_resp.send(head);
        self.out_biu_credits.send(1);
    }
}

impl ModuleBehaviors for Biu {
    fn startup(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        let credits = self.conf().biu_req_queue_size;
        debug!("[{}] biu: advertising {credits} credit(s) to L2Cache", ctx.now);
        self.out_biu_credits.send(credits);
        Ok(())
    }

    fn busy(&self) -> bool {
        self.biu_busy || !self.biu_req_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::access::{AccessArena, InstRef, MemoryAccessInfo};

    fn biu(queue: u32) -> Biu {
        let cfg = BiuConfig {
            biu_req_queue_size: queue,
            biu_latency: 1,
        };
        Biu::new(Arc::new(cfg), ClockDomain::new("core", 1)).unwrap()
    }

    fn access(arena: &mut AccessArena, addr: u64) -> AccessHandle {
        arena.insert(MemoryAccessInfo::new(addr, InstRef::default()))
    }

    #[test]
    fn startup_grants_full_queue() {
        let mut arena = AccessArena::new();
        let mut biu = biu(3);
        biu.startup(&mut Ctx::new(0, &mut arena)).unwrap();
        assert_eq!(3, biu.out_biu_credits.pending()[0].data);
    }

    #[test]
    fn one_transaction_at_a_time() {
        let mut arena = AccessArena::new();
        let mut biu = biu(2);
        let a = access(&mut arena, 0x40);
        let b = access(&mut arena, 0x80);
        let mut ctx = Ctx::new(0, &mut arena);
        biu.receive_req_from_l2cache(&mut ctx, a).unwrap();
        biu.receive_req_from_l2cache(&mut ctx, b).unwrap();
        biu.handle_biu_req(&mut ctx).unwrap();
        biu.handle_biu_req(&mut ctx).unwrap();
        assert_eq!(1, biu.out_mss_req_sync.pending().len());
        assert!(biu.is_bus_busy());

        biu.get_ack_from_mss(&mut ctx, true).unwrap();
        biu.handle_mss_ack(&mut ctx).unwrap();
        assert_eq!(a, biu.out_biu_resp.pending()[0].data);
        assert_eq!(1, biu.out_biu_credits.pending()[0].data);
        assert!(!biu.is_bus_busy());
        assert!(biu.events.is_scheduled(BiuEvent::HandleBiuReq, 0));
    }

    #[test]
    fn overflow_is_a_protocol_violation() {
        let mut arena = AccessArena::new();
        let mut biu = biu(1);
        let a = access(&mut arena, 0x40);
        let b = access(&mut arena, 0x80);
        let mut ctx = Ctx::new(0, &mut arena);
        biu.receive_req_from_l2cache(&mut ctx, a).unwrap();
        let err = biu.receive_req_from_l2cache(&mut ctx, b).unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(1, biu.queue_len());
    }

    #[test]
    fn bad_acks_are_protocol_violations() {
        let mut arena = AccessArena::new();
        let mut biu = biu(1);
        let mut ctx = Ctx::new(0, &mut arena);
        assert!(biu.get_ack_from_mss(&mut ctx, true).is_err());
        assert!(biu.get_ack_from_mss(&mut ctx, false).is_err());
        assert!(biu.handle_mss_ack(&mut ctx).is_err());
    }

    #[test]
    fn flushed_head_skips_the_bus() {
        let mut arena = AccessArena::new();
        let mut biu = biu(2);
        let a = access(&mut arena, 0x40);
        arena.invalidate(a);
        let mut ctx = Ctx::new(0, &mut arena);
        biu.receive_req_from_l2cache(&mut ctx, a).unwrap();
        biu.handle_biu_req(&mut ctx).unwrap();
        assert!(biu.out_mss_req_sync.pending().is_empty());
        assert_eq!(a, biu.out_biu_resp.pending()[0].data);
        assert_eq!(1, biu.stats().skipped_invalid);
        assert!(!biu.busy());
    }
}
