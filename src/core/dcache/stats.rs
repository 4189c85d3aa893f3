use serde::Serialize;

/// DL1 telemetry.  Read-only; nothing in the model branches on it.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DcacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub refills: u64,
    pub mshr_allocations: u64,
    pub mshr_merges: u64,
    pub mshr_full_stalls: u64,
    pub credit_stalls: u64,
    pub flushed_dropped: u64,
}

impl DcacheStats {
    /// dl1 hits / dl1 misses.  None until the first miss.
    pub fn hit_miss_ratio(&self) -> Option<f64> {
        (self.misses > 0).then(|| self.hits as f64 / self.misses as f64)
    }

    pub fn record_hit(&mut self) {
        self.lookups = self.lookups.saturating_add(1);
        self.hits = self.hits.saturating_add(1);
    }

    pub fn record_miss(&mut self) {
        self.lookups = self.lookups.saturating_add(1);
        self.misses = self.misses.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::DcacheStats;

    #[test]
    fn ratio_needs_a_miss() {
        let mut stats = DcacheStats::default();
        stats.record_hit();
        assert_eq!(None, stats.hit_miss_ratio());
        stats.record_hit();
        stats.record_miss();
        assert_eq!(Some(2.0), stats.hit_miss_ratio());
        assert_eq!(3, stats.lookups);
    }
}
