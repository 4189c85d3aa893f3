//! In-flight memory accesses.
//!
//! Accesses are shared by every unit they pass through, so they live in one arena and travel as
//! generation-checked handles.  A handle whose slot has been released (or reused) no longer
//! resolves, which is how a unit notices that an access it still names is gone.
use std::fmt;

use crate::core::dcache::mshr::MshrId;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessHandle {
    index: u32,
    generation: u32,
}

impl AccessHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for AccessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "access#{}.{}", self.index, self.generation)
    }
}

/// The instruction that owns an access.  Only identity and direction matter to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstRef {
    pub uid: u64,
    pub is_store: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheState {
    #[default]
    Unknown,
    Hit,
    Miss,
}

#[derive(Debug, Clone)]
pub struct MemoryAccessInfo {
    pub phys_addr: u64,
    pub inst: InstRef,
    pub cache_state: CacheState,
    pub mshr: Option<MshrId>,
    pub is_refill: bool,
    pub data_ready: bool,
    pub issued_at: Option<Cycle>,
    valid: bool,
}

impl MemoryAccessInfo {
    pub fn new(phys_addr: u64, inst: InstRef) -> Self {
        Self {
            phys_addr,
            inst,
            cache_state: CacheState::Unknown,
            mshr: None,
            is_refill: false,
            data_ready: false,
            issued_at: None,
            valid: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_cache_hit(&self) -> bool {
        self.cache_state == CacheState::Hit
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    access: Option<MemoryAccessInfo>,
}

#[derive(Debug, Default)]
pub struct AccessArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl AccessArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, access: MemoryAccessInfo) -> AccessHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.access = Some(access);
            return AccessHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            access: Some(access),
        });
        AccessHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: AccessHandle) -> Option<&MemoryAccessInfo> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.access.as_ref())
    }

    pub fn get_mut(&mut self, handle: AccessHandle) -> Option<&mut MemoryAccessInfo> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.access.as_mut())
    }

    /// Live and not flushed.
    pub fn is_valid(&self, handle: AccessHandle) -> bool {
        self.get(handle).is_some_and(MemoryAccessInfo::is_valid)
    }

    /// Clear the validity flag.  Units that meet the access afterwards skip their side effects.
    pub fn invalidate(&mut self, handle: AccessHandle) -> bool {
        match self.get_mut(handle) {
            Some(access) => {
                access.valid = false;
                true
            }
            None => false,
        }
    }

    /// Drop the access.  Its handle stops resolving; releasing twice is a no-op.
    pub fn release(&mut self, handle: AccessHandle) -> Option<MemoryAccessInfo> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let access = slot.access.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(access)
    }

    pub fn live(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(addr: u64) -> MemoryAccessInfo {
        MemoryAccessInfo::new(addr, InstRef::default())
    }

    #[test]
    fn released_handle_goes_stale() {
        let mut arena = AccessArena::new();
        let a = arena.insert(access(0x40));
        assert!(arena.is_valid(a));
        assert_eq!(0x40, arena.release(a).unwrap().phys_addr);
        assert!(arena.get(a).is_none());
        assert!(arena.release(a).is_none());

        let b = arena.insert(access(0x80));
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert_eq!(0x80, arena.get(b).unwrap().phys_addr);
        assert_eq!(1, arena.live());
    }

    #[test]
    fn invalidate_keeps_the_slot() {
        let mut arena = AccessArena::new();
        let a = arena.insert(access(0x40));
        assert!(arena.invalidate(a));
        assert!(!arena.is_valid(a));
        assert!(arena.get(a).is_some());
    }
}
