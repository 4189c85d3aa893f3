//! Replacement policies for the functional cache array.
//!
//! - `TreePlru`: binary tree of direction bits, `ways - 1` per set.
//! - `Lru`: exact recency stack per set.
//! - `Random`: seeded uniform choice.
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SimError;

pub trait ReplacementPolicy: fmt::Debug {
    /// Record a hit on or fill of `way`.
    fn on_access(&mut self, set: usize, way: usize);

    /// Way to evict from `set` when every way is valid.
    fn select_victim(&mut self, set: usize) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacementKind {
    #[default]
    TreePlru,
    Lru,
    Random,
}

impl FromStr for ReplacementKind {
    type Err = SimError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "treeplru" | "tree_plru" | "plru" => Ok(Self::TreePlru),
            "lru" => Ok(Self::Lru),
            "random" => Ok(Self::Random),
            _ => Err(SimError::UnknownPolicy(value.to_string())),
        }
    }
}

impl fmt::Display for ReplacementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TreePlru => "TreePLRU",
            Self::Lru => "LRU",
            Self::Random => "Random",
        };
        f.write_str(name)
    }
}

impl ReplacementKind {
    pub fn build(self, sets: usize, ways: usize, seed: u64) -> Box<dyn ReplacementPolicy> {
        match self {
            Self::TreePlru => Box::new(TreePlru::new(sets, ways)),
            Self::Lru => Box::new(Lru::new(sets, ways)),
            Self::Random => Box::new(RandomReplacement::new(ways, seed)),
        }
    }
}

/// Node `n` of the tree lives in bit `n` (root is 1, children of `n` are `2n` and `2n + 1`).
/// A clear bit sends the victim search left, a set bit right.
#[derive(Debug)]
pub struct TreePlru {
    bits: Vec<u64>,
    ways: usize,
    levels: u32,
}

impl TreePlru {
    pub fn new(sets: usize, ways: usize) -> Self {
        assert!(ways.is_power_of_two(), "TreePLRU needs a power-of-two way count");
        assert!(ways <= 64, "TreePLRU supports at most 64 ways");
        Self {
            bits: vec![0; sets],
            ways,
            levels: ways.trailing_zeros(),
        }
    }

    fn bit(&self, set: usize, node: usize) -> bool {
        (self.bits[set] >> node) & 1 == 1
    }

    fn set_bit(&mut self, set: usize, node: usize, value: bool) {
        if value {
            self.bits[set] |= 1 << node;
        } else {
            self.bits[set] &= !(1 << node);
        }
    }
}

impl ReplacementPolicy for TreePlru {
    fn on_access(&mut self, set: usize, way: usize) {
        let mut node = 1;
        for level in (0..self.levels).rev() {
            let right = (way >> level) & 1 == 1;
            // point away from the half that was just used
            self.set_bit(set, node, !right);
            node = 2 * node + right as usize;
        }
    }

    fn select_victim(&mut self, set: usize) -> usize {
        let mut node = 1;
        for _ in 0..self.levels {
            node = 2 * node + self.bit(set, node) as usize;
        }
        node - self.ways
    }
}

/// Index 0 of each stack is MRU, the last index is LRU.
#[derive(Debug)]
pub struct Lru {
    usage: Vec<Vec<usize>>,
}

impl Lru {
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            usage: (0..sets).map(|_| (0..ways).collect()).collect(),
        }
    }
}

impl ReplacementPolicy for Lru {
    fn on_access(&mut self, set: usize, way: usize) {
        let stack = &mut self.usage[set];
        if let Some(pos) = stack.iter().position(|&w| w == way) {
            stack.remove(pos);
        }
        stack.insert(0, way);
    }

    fn select_victim(&mut self, set: usize) -> usize {
        self.usage[set].last().copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct RandomReplacement {
    ways: usize,
    rng: StdRng,
}

impl RandomReplacement {
    pub fn new(ways: usize, seed: u64) -> Self {
        Self {
            ways,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ReplacementPolicy for RandomReplacement {
    fn on_access(&mut self, _set: usize, _way: usize) {}

    fn select_victim(&mut self, _set: usize) -> usize {
        self.rng.gen_range(0..self.ways)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_names_parse_case_insensitively() {
        assert_eq!(ReplacementKind::TreePlru, "TreePLRU".parse().unwrap());
        assert_eq!(ReplacementKind::Lru, "lru".parse().unwrap());
        assert_eq!(ReplacementKind::Random, "RANDOM".parse().unwrap());
        assert!(matches!(
            "fifo".parse::<ReplacementKind>(),
            Err(SimError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn tree_plru_victim_avoids_recent_ways() {
        let mut plru = TreePlru::new(1, 4);
        for way in 0..4 {
            plru.on_access(0, way);
        }
        // after touching 0,1,2,3 in order the tree points at 0
        assert_eq!(0, plru.select_victim(0));
        plru.on_access(0, 0);
        assert_eq!(2, plru.select_victim(0));
        plru.on_access(0, 2);
        assert_eq!(1, plru.select_victim(0));
    }

    #[test]
    fn tree_plru_never_picks_the_mru_way() {
        let mut plru = TreePlru::new(2, 8);
        for way in [3, 7, 1, 6, 0, 5, 2, 4, 4, 1] {
            plru.on_access(1, way);
            assert_ne!(way, plru.select_victim(1));
        }
    }

    #[test]
    fn tree_plru_single_way() {
        let mut plru = TreePlru::new(1, 1);
        plru.on_access(0, 0);
        assert_eq!(0, plru.select_victim(0));
    }

    #[test]
    fn lru_evicts_least_recent() {
        let mut lru = Lru::new(1, 3);
        lru.on_access(0, 0);
        lru.on_access(0, 1);
        lru.on_access(0, 2);
        assert_eq!(0, lru.select_victim(0));
        lru.on_access(0, 0);
        assert_eq!(1, lru.select_victim(0));
    }

    #[test]
    fn random_is_seeded_and_in_range() {
        let mut a = RandomReplacement::new(8, 42);
        let mut b = RandomReplacement::new(8, 42);
        for _ in 0..64 {
            let way = a.select_victim(0);
            assert!(way < 8);
            assert_eq!(way, b.select_victim(0));
        }
    }
}
