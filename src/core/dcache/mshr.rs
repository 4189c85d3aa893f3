use smallvec::SmallVec;

use crate::core::access::AccessHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MshrId(usize);

impl MshrId {
    pub fn slot(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MshrState {
    /// Allocated, refill request not sent yet (waiting for a credit).
    Allocated,
    AwaitingRefill,
    ReadyToDeallocate,
}

#[derive(Debug)]
pub struct MshrEntry {
    block_addr: u64,
    origin: AccessHandle,
    waiters: SmallVec<[AccessHandle; 4]>,
    state: MshrState,
    seq: u64,
}

impl MshrEntry {
    pub fn block_addr(&self) -> u64 {
        self.block_addr
    }

    /// The access whose miss allocated the entry; it is the one sent downstream.
    pub fn origin(&self) -> AccessHandle {
        self.origin
    }

    /// Accesses merged onto the entry, in attach order.
    pub fn waiters(&self) -> &[AccessHandle] {
        &self.waiters
    }

    pub fn state(&self) -> MshrState {
        self.state
    }

    /// Origin first, then waiters in attach order.
    pub fn accesses(&self) -> impl Iterator<Item = AccessHandle> + '_ {
        std::iter::once(self.origin).chain(self.waiters.iter().copied())
    }

    /// Replace the origin with the first waiter.  Returns the old origin, or None if there is
    /// nobody to promote.
    pub fn promote_waiter(&mut self) -> Option<AccessHandle> {
        if self.waiters.is_empty() {
            return None;
        }
        let next = self.waiters.remove(0);
        Some(std::mem::replace(&mut self.origin, next))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MshrAllocError {
    Full,
    AlreadyTracked(MshrId),
}

/// Bounded table of outstanding misses, at most one entry per block address.
#[derive(Debug)]
pub struct MshrFile {
    slots: Vec<Option<MshrEntry>>,
    occupied: usize,
    next_seq: u64,
    current_refill: Option<MshrId>,
}

impl MshrFile {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "mshr capacity must be > 0");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            occupied: 0,
            next_seq: 0,
            current_refill: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn is_full(&self) -> bool {
        self.occupied >= self.slots.len()
    }

    pub fn lookup(&self, block_addr: u64) -> Option<MshrId> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|e| e.block_addr == block_addr))
            .map(MshrId)
    }

    pub fn allocate(
        &mut self,
        block_addr: u64,
        origin: AccessHandle,
    ) -> Result<MshrId, MshrAllocError> {
        if let Some(id) = self.lookup(block_addr) {
            return Err(MshrAllocError::AlreadyTracked(id));
        }
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(MshrAllocError::Full);
        };
        self.slots[slot] = Some(MshrEntry {
            block_addr,
            origin,
            waiters: SmallVec::new(),
            state: MshrState::Allocated,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.occupied += 1;
        Ok(MshrId(slot))
    }

    pub fn attach(&mut self, id: MshrId, waiter: AccessHandle) -> bool {
        match self.get_mut(id) {
            Some(entry) => {
                entry.waiters.push(waiter);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: MshrId) -> Option<&MshrEntry> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: MshrId) -> Option<&mut MshrEntry> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Oldest entry still waiting to send its refill request.
    pub fn next_to_send(&self) -> Option<MshrId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, e)))
            .filter(|(_, e)| e.state == MshrState::Allocated)
            .min_by_key(|(_, e)| e.seq)
            .map(|(i, _)| MshrId(i))
    }

    pub fn has_unsent(&self) -> bool {
        self.next_to_send().is_some()
    }

    pub fn mark_sent(&mut self, id: MshrId) {
        if let Some(entry) = self.get_mut(id) {
            entry.state = MshrState::AwaitingRefill;
            self.current_refill = Some(id);
        }
    }

    /// The entry whose refill request went out most recently.
    pub fn current_refill(&self) -> Option<MshrId> {
        self.current_refill
    }

    /// Match an arriving refill to its entry and mark it ready to deallocate.  The cursor is
    /// tried first; with several refills in flight the block address decides.
    pub fn match_refill(&mut self, block_addr: u64) -> Option<MshrId> {
        let awaiting = |e: &MshrEntry| {
            e.block_addr == block_addr && e.state == MshrState::AwaitingRefill
        };
        let id = match self.current_refill {
            Some(id) if self.get(id).is_some_and(awaiting) => id,
            _ => self
                .slots
                .iter()
                .position(|s| s.as_ref().is_some_and(awaiting))
                .map(MshrId)?,
        };
        if let Some(entry) = self.get_mut(id) {
            entry.state = MshrState::ReadyToDeallocate;
        }
        Some(id)
    }

    /// Entry for `block_addr` whose refill has arrived.
    pub fn ready_entry(&self, block_addr: u64) -> Option<MshrId> {
        self.lookup(block_addr)
            .filter(|&id| self.get(id).is_some_and(|e| e.state == MshrState::ReadyToDeallocate))
    }

    pub fn free(&mut self, id: MshrId) -> Option<MshrEntry> {
        let entry = self.slots.get_mut(id.0)?.take()?;
        self.occupied -= 1;
        if self.current_refill == Some(id) {
            self.current_refill = None;
        }
        Some(entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MshrId, &MshrEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (MshrId(i), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::access::{AccessArena, InstRef, MemoryAccessInfo};

    fn handles(n: usize) -> Vec<AccessHandle> {
        let mut arena = AccessArena::new();
        (0..n)
            .map(|i| arena.insert(MemoryAccessInfo::new(i as u64 * 64, InstRef::default())))
            .collect()
    }

    #[test]
    fn allocate_then_merge_onto_same_block() {
        let h = handles(3);
        let mut file = MshrFile::new(2);
        let id = file.allocate(0x40, h[0]).unwrap();
        assert_eq!(Some(id), file.lookup(0x40));
        assert_eq!(Err(MshrAllocError::AlreadyTracked(id)), file.allocate(0x40, h[1]));
        assert!(file.attach(id, h[1]));
        assert!(file.attach(id, h[2]));
        let entry = file.get(id).unwrap();
        assert_eq!(vec![h[0], h[1], h[2]], entry.accesses().collect::<Vec<_>>());
        assert_eq!(1, file.len());
    }

    #[test]
    fn full_file_rejects_new_blocks() {
        let h = handles(2);
        let mut file = MshrFile::new(1);
        let id = file.allocate(0x40, h[0]).unwrap();
        assert!(file.is_full());
        assert_eq!(Err(MshrAllocError::Full), file.allocate(0x80, h[1]));
        file.free(id).unwrap();
        assert!(file.allocate(0x80, h[1]).is_ok());
    }

    #[test]
    fn send_order_is_allocation_order() {
        let h = handles(3);
        let mut file = MshrFile::new(4);
        let a = file.allocate(0x100, h[0]).unwrap();
        let b = file.allocate(0x200, h[1]).unwrap();
        file.free(a);
        let c = file.allocate(0x300, h[2]).unwrap();
        // c reuses slot 0 but was allocated after b
        assert_eq!(Some(b), file.next_to_send());
        file.mark_sent(b);
        assert_eq!(Some(c), file.next_to_send());
        file.mark_sent(c);
        assert!(!file.has_unsent());
        assert_eq!(Some(c), file.current_refill());
    }

    #[test]
    fn refill_matches_by_block_address_off_the_cursor() {
        let h = handles(2);
        let mut file = MshrFile::new(4);
        let a = file.allocate(0x100, h[0]).unwrap();
        let b = file.allocate(0x200, h[1]).unwrap();
        file.mark_sent(a);
        file.mark_sent(b);
        assert_eq!(Some(a), file.match_refill(0x100));
        assert_eq!(MshrState::ReadyToDeallocate, file.get(a).unwrap().state());
        assert_eq!(Some(a), file.ready_entry(0x100));
        assert_eq!(Some(b), file.match_refill(0x200));
        assert_eq!(None, file.match_refill(0x300));
    }

    #[test]
    fn unsent_entry_does_not_match_a_refill() {
        let h = handles(1);
        let mut file = MshrFile::new(1);
        file.allocate(0x100, h[0]).unwrap();
        assert_eq!(None, file.match_refill(0x100));
    }

    #[test]
    fn promote_waiter_replaces_origin() {
        let h = handles(3);
        let mut file = MshrFile::new(1);
        let id = file.allocate(0x40, h[0]).unwrap();
        file.attach(id, h[1]);
        file.attach(id, h[2]);
        let entry = file.get_mut(id).unwrap();
        assert_eq!(Some(h[0]), entry.promote_waiter());
        assert_eq!(h[1], entry.origin());
        assert_eq!(&[h[2]], entry.waiters());
    }

    #[test]
    fn fill_and_drain_repeatedly() {
        let h = handles(1);
        let mut file = MshrFile::new(4);
        for round in 0..100 {
            let ids: Vec<_> = (0..4u64)
                .map(|line| file.allocate(line * 64, h[0]).unwrap())
                .collect();
            assert!(file.is_full(), "round {round}");
            for id in ids {
                assert!(file.free(id).is_some(), "round {round}");
            }
            assert!(file.is_empty(), "round {round}");
        }
    }
}
