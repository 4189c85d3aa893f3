use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::base::module::{module, Ctx, IsModule, ModuleBase, ModuleBehaviors};
use crate::base::port::SyncOutPort;
use crate::core::access::AccessHandle;
use crate::error::SimResult;
use crate::mss::config::MssConfig;
use crate::timeq::ClockDomain;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MssStats {
    pub requests: u64,
}

/// Main memory subsystem stand-in.  Runs on its own clock and answers every bus request with a
/// positive acknowledgment a fixed number of its own cycles later.
#[derive(Debug)]
pub struct Mss {
    base: ModuleBase<MssConfig>,
    stats: MssStats,

    pub out_biu_ack_sync: SyncOutPort<bool>,
}

module!(Mss, MssConfig);

impl Mss {
    pub fn new(config: Arc<MssConfig>, clock: ClockDomain) -> Self {
        Self {
            stats: MssStats::default(),
            out_biu_ack_sync: SyncOutPort::new("out_biu_ack_sync", config.latency),
            base: ModuleBase::new("mss", clock, config),
        }
    }

    pub fn stats(&self) -> MssStats {
        self.stats
    }

    pub fn receive_req_from_biu(&mut self, ctx: &mut Ctx<'_>, access: AccessHandle) -> SimResult<()> {
        debug!(
            "[{}] mss: request {access} at MSS cycle {}",
            ctx.now,
            self.cycle(ctx.now)
        );
        self.stats.requests = self.stats.requests.saturating_add(1);
        self.out_biu_ack_sync.send(true);
        Ok(())
    }
}

impl ModuleBehaviors for Mss {
    // every request is answered by a send in the same handler
    fn busy(&self) -> bool {
        false
    }
}
