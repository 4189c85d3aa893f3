use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::base::credit::CreditCounter;
use crate::base::module::{module, Ctx, IsModule, ModuleBase, ModuleBehaviors};
use crate::base::port::{EventSet, OutPort, UnitEvent};
use crate::core::access::AccessHandle;
use crate::error::{SimError, SimResult};
use crate::mss::config::L2Config;
use crate::timeq::{ClockDomain, Cycle, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L2Event {
    HandleReq,
    HandleResp,
}

impl UnitEvent for L2Event {
    fn phase(&self) -> Phase {
        Phase::Tick
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct L2Stats {
    pub requests: u64,
    pub forwarded: u64,
    pub responses: u64,
    pub credit_stalls: u64,
}

/// L2Cache stand-in: every miss from the DCache is forwarded to the BIU after a fixed latency,
/// and every BIU response goes straight back up.  Credits are honored on both sides.
#[derive(Debug)]
pub struct L2Cache {
    base: ModuleBase<L2Config>,
    // (request, first local cycle it may leave)
    req_queue: VecDeque<(AccessHandle, Cycle)>,
    resp_queue: VecDeque<AccessHandle>,
    biu_credits: CreditCounter,
    stats: L2Stats,

    pub out_biu_req: OutPort<AccessHandle>,
    pub out_dcache_credits: OutPort<u32>,
    pub out_dcache_resp: OutPort<AccessHandle>,
    pub events: EventSet<L2Event>,
}

module!(L2Cache, L2Config);

impl L2Cache {
    pub fn new(config: Arc<L2Config>, clock: ClockDomain) -> SimResult<Self> {
        config.validate()?;
        Ok(Self {
            req_queue: VecDeque::new(),
            resp_queue: VecDeque::new(),
            biu_credits: CreditCounter::new("l2cache"),
            stats: L2Stats::default(),
            out_biu_req: OutPort::new("out_biu_req", 1),
            out_dcache_credits: OutPort::new("out_dcache_credits", 1),
            out_dcache_resp: OutPort::new("out_dcache_resp", 1),
            events: EventSet::default(),
            base: ModuleBase::new("l2cache", clock, config),
        })
    }

    pub fn stats(&self) -> L2Stats {
        self.stats
    }

    pub fn queue_len(&self) -> usize {
        self.req_queue.len()
    }

    pub fn biu_credits(&self) -> &CreditCounter {
        &self.biu_credits
    }

    pub fn receive_req_from_dcache(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) -> SimResult<()> {
        if self.req_queue.len() >= self.conf().req_queue_size as usize {
            return Err(SimError::protocol(
                "l2cache",
                format!("{access} arrived at a full request queue"),
            ));
        }
        let latency = self.conf().latency;
        let ready = self.cycle(ctx.now) + latency;
        self.req_queue.push_back((access, ready));
        self.stats.requests = self.stats.requests.saturating_add(1);
        debug!("[{}] l2cache: request {access} queued", ctx.now);
        self.events.schedule(L2Event::HandleReq, latency);
        Ok(())
    }

    pub fn receive_credits_from_biu(&mut self, ctx: &mut Ctx<'_>, credits: u32) -> SimResult<()> {
        self.biu_credits.grant(credits)?;
        debug!(
            "[{}] l2cache: {credits} credit(s) from BIU, now {}",
            ctx.now,
            self.biu_credits.available()
        );
        if !self.req_queue.is_empty() {
            self.events.schedule(L2Event::HandleReq, 0);
        }
        Ok(())
    }

    pub fn receive_resp_from_biu(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) -> SimResult<()> {
        debug!("[{}] l2cache: response {access} from BIU", ctx.now);
        self.resp_queue.push_back(access);
        self.events.schedule(L2Event::HandleResp, 0);
        Ok(())
    }

    pub fn handle_req(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        let Some(&(access, ready)) = self.req_queue.front() else {
            return Ok(());
        };
        let now = self.cycle(ctx.now);
        if ready > now {
            self.events.schedule(L2Event::HandleReq, ready - now);
            return Ok(());
        }
        if !self.biu_credits.has_credit() {
            self.stats.credit_stalls = self.stats.credit_stalls.saturating_add(1);
            return Ok(());
        }
        self.biu_credits.consume()?;
        self.req_queue.pop_front();
        self.out_biu_req.send(access);
        // the slot is free again
        self.out_dcache_credits.send(1);
        self.stats.forwarded = self.stats.forwarded.saturating_add(1);
        debug!("[{}] l2cache: forwarded {access} to BIU", ctx.now);
        if !self.req_queue.is_empty() {
            self.events.schedule(L2Event::HandleReq, 1);
        }
        Ok(())
    }

    pub fn handle_resp(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        if let Some(access) = self.resp_queue.pop_front() {
            debug!("[{}] l2cache: returning {access} to DCache", ctx.now);
            self.out_dcache_resp.send(access);
            self.stats.responses = self.stats.responses.saturating_add(1);
        }
        if !self.resp_queue.is_empty() {
            self.events.schedule(L2Event::HandleResp, 1);
        }
        Ok(())
    }
}

impl ModuleBehaviors for L2Cache {
    fn startup(&mut self, _ctx: &mut Ctx<'_>) -> SimResult<()> {
        self.out_dcache_credits.send(self.conf().req_queue_size);
        Ok(())
    }

    fn busy(&self) -> bool {
        !self.req_queue.is_empty() || !self.resp_queue.is_empty()
    }
}
