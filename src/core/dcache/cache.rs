use crate::core::dcache::policy::{ReplacementKind, ReplacementPolicy};

/// Splits physical addresses into block address and set index.
#[derive(Debug, Clone, Copy)]
pub struct AddrDecoder {
    line_size: u64,
    line_shift: u32,
    sets: usize,
}

impl AddrDecoder {
    pub fn new(line_size: u64, sets: usize) -> Self {
        assert!(line_size.is_power_of_two(), "line size must be a power of two");
        assert!(sets > 0, "sets must be > 0");
        Self {
            line_size,
            line_shift: line_size.trailing_zeros(),
            sets,
        }
    }

    pub fn block_addr(&self, addr: u64) -> u64 {
        addr & !(self.line_size - 1)
    }

    pub fn set_index(&self, addr: u64) -> usize {
        ((addr >> self.line_shift) % self.sets as u64) as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CacheLine {
    valid: bool,
    block_addr: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit { set: usize, way: usize },
    Miss { set: usize },
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Install {
    pub set: usize,
    pub way: usize,
    pub evicted: Option<u64>,
}

/// Functional tag/valid/replacement state of one cache.  Holds no data.
#[derive(Debug)]
pub struct CacheFuncModel {
    decoder: AddrDecoder,
    lines: Vec<Vec<CacheLine>>,
    policy: Box<dyn ReplacementPolicy>,
}

impl CacheFuncModel {
    pub fn new(size_bytes: u64, line_size: u64, ways: usize, policy: ReplacementKind, seed: u64) -> Self {
        assert!(ways > 0, "ways must be > 0");
        let sets = (size_bytes / line_size / ways as u64).max(1) as usize;
        Self {
            decoder: AddrDecoder::new(line_size, sets),
            lines: vec![vec![CacheLine::default(); ways]; sets],
            policy: policy.build(sets, ways, seed),
        }
    }

    pub fn decoder(&self) -> &AddrDecoder {
        &self.decoder
    }

    /// Find the way holding `addr`'s block without touching replacement state.
    pub fn peek_line(&self, addr: u64) -> Option<(usize, usize)> {
        let set = self.decoder.set_index(addr);
        let block = self.decoder.block_addr(addr);
        self.lines[set]
            .iter()
            .position(|line| line.valid && line.block_addr == block)
            .map(|way| (set, way))
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.peek_line(addr).is_some()
    }

    /// Hit with its way, or miss with the set a fill would go to.  Victim selection waits for
    /// the fill, so a miss leaves replacement state alone.
    pub fn lookup(&self, addr: u64) -> Lookup {
        match self.peek_line(addr) {
            Some((set, way)) => Lookup::Hit { set, way },
            None => Lookup::Miss {
                set: self.decoder.set_index(addr),
            },
        }
    }

    pub fn touch_mru(&mut self, set: usize, way: usize) {
        self.policy.on_access(set, way);
    }

    /// An invalid way if the set has one, otherwise the policy's pick.
    pub fn victim_way(&mut self, set: usize) -> usize {
        match self.lines[set].iter().position(|line| !line.valid) {
            Some(way) => way,
            None => self.policy.select_victim(set),
        }
    }

    pub fn install(&mut self, addr: u64, way: usize) -> Install {
        let set = self.decoder.set_index(addr);
        let line = &mut self.lines[set][way];
        let evicted = line.valid.then_some(line.block_addr);
        *line = CacheLine {
            valid: true,
            block_addr: self.decoder.block_addr(addr),
        };
        self.policy.on_access(set, way);
        Install { set, way, evicted }
    }

    /// Install `addr`'s block, choosing the way by victim selection.  Refreshes an already
    /// resident block in place.
    pub fn allocate(&mut self, addr: u64) -> Install {
        if let Some((set, way)) = self.peek_line(addr) {
            self.touch_mru(set, way);
            return Install { set, way, evicted: None };
        }
        let set = self.decoder.set_index(addr);
        let way = self.victim_way(set);
        self.install(addr, way)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(sets: u64, ways: usize) -> CacheFuncModel {
        CacheFuncModel::new(sets * ways as u64 * 64, 64, ways, ReplacementKind::Lru, 0)
    }

    #[test]
    fn decoder_truncates_to_line() {
        let dec = AddrDecoder::new(64, 4);
        assert_eq!(0x1000, dec.block_addr(0x103f));
        assert_eq!(1, dec.set_index(0x1040));
        assert_eq!(0, dec.set_index(0x1100));
    }

    #[test]
    fn miss_then_install_then_hit() {
        let mut tags = cache(4, 2);
        let Lookup::Miss { set } = tags.lookup(0x2008) else {
            panic!("cold cache must miss");
        };
        let way = tags.victim_way(set);
        tags.install(0x2008, way);
        assert!(tags.lookup(0x2000).is_hit());
        assert!(tags.lookup(0x203f).is_hit());
        assert!(!tags.lookup(0x2040).is_hit());
    }

    #[test]
    fn fill_prefers_invalid_ways_then_evicts() {
        let mut tags = cache(1, 2);
        assert_eq!(None, tags.allocate(0x000).evicted);
        assert_eq!(None, tags.allocate(0x040).evicted);
        let (set, way) = tags.peek_line(0x000).unwrap();
        tags.touch_mru(set, way);
        let fill = tags.allocate(0x080);
        assert_eq!(Some(0x040), fill.evicted);
        assert!(tags.contains(0x000));
        assert!(!tags.contains(0x040));
    }

    #[test]
    fn missing_lookups_leave_random_victims_alone() {
        let fill = |lookups: usize| {
            let mut tags = CacheFuncModel::new(4 * 64, 64, 4, ReplacementKind::Random, 7);
            for block in 0..4u64 {
                tags.allocate(block * 64);
            }
            for _ in 0..lookups {
                assert!(!tags.lookup(0x1000).is_hit());
            }
            tags.allocate(0x1000).way
        };
        assert_eq!(fill(0), fill(5));
    }

    #[test]
    fn allocate_resident_block_is_in_place() {
        let mut tags = cache(2, 2);
        let first = tags.allocate(0x80);
        let again = tags.allocate(0x80);
        assert_eq!(first.way, again.way);
        assert_eq!(None, again.evicted);
    }
}
