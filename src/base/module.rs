use std::sync::Arc;

use crate::core::access::AccessArena;
use crate::error::SimResult;
use crate::timeq::{ClockDomain, Cycle};

/// State every simulated unit carries: its name, the clock domain it runs in and its
/// (immutable, shared) configuration.
#[derive(Debug)]
pub struct ModuleBase<C> {
    pub name: &'static str,
    pub clock: ClockDomain,
    config: Arc<C>,
}

impl<C> ModuleBase<C> {
    pub fn new(name: &'static str, clock: ClockDomain, config: Arc<C>) -> Self {
        Self {
            name,
            clock,
            config,
        }
    }
}

/// Everything a handler may touch besides its own unit: the current tick and the shared access
/// arena.  Units never see each other; they talk through their ports.
pub struct Ctx<'a> {
    pub now: Cycle,
    pub accesses: &'a mut AccessArena,
}

impl<'a> Ctx<'a> {
    pub fn new(now: Cycle, accesses: &'a mut AccessArena) -> Self {
        Self { now, accesses }
    }
}

pub trait IsModule {
    type ConfigType;

    fn base_ref(&self) -> &ModuleBase<Self::ConfigType>;

    fn name(&self) -> &'static str {
        self.base_ref().name
    }

    fn clock(&self) -> ClockDomain {
        self.base_ref().clock
    }

    fn conf(&self) -> &Self::ConfigType {
        &self.base_ref().config
    }

    // Local cycle number at tick `now`
    fn cycle(&self, now: Cycle) -> Cycle {
        self.clock().cycle_at(now)
    }
}

pub trait ModuleBehaviors {
    /// Runs once at tick 0, before any other event.  Units announce credits here.
    fn startup(&mut self, _ctx: &mut Ctx<'_>) -> SimResult<()> {
        Ok(())
    }

    /// True while the unit still holds work it will finish on its own.
    fn busy(&self) -> bool;
}

/// arguments: identifier, config type
macro_rules! module {
    ($comp:ident, $C:ty) => {
        impl IsModule for $comp {
            type ConfigType = $C;

            fn base_ref(&self) -> &ModuleBase<$C> {
                &self.base
            }
        }
    };
}

pub(crate) use module;
