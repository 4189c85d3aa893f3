use serde::Deserialize;

use crate::core::dcache::policy::ReplacementKind;
use crate::error::{SimError, SimResult};
use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DcacheConfig {
    /// DL1 line size in bytes (power of 2)
    pub l1_line_size: u32,
    /// Size of DL1 in KB (power of 2)
    pub l1_size_kb: u32,
    /// DL1 associativity (power of 2)
    pub l1_associativity: u32,
    /// DL1 will always hit
    pub l1_always_hit: bool,
    pub mshr_entries: u32,
    pub replacement_policy: String,
    /// Seed for the Random policy
    pub policy_seed: u64,
}

impl Config for DcacheConfig {}

impl Default for DcacheConfig {
    fn default() -> Self {
        Self {
            l1_line_size: 64,
            l1_size_kb: 32,
            l1_associativity: 8,
            l1_always_hit: false,
            mshr_entries: 8,
            replacement_policy: "TreePLRU".to_string(),
            policy_seed: 0,
        }
    }
}

impl DcacheConfig {
    pub fn size_bytes(&self) -> u64 {
        self.l1_size_kb as u64 * 1024
    }

    pub fn num_lines(&self) -> u64 {
        self.size_bytes() / self.l1_line_size.max(1) as u64
    }

    pub fn num_sets(&self) -> usize {
        (self.num_lines() / self.l1_associativity.max(1) as u64) as usize
    }

    pub fn policy(&self) -> SimResult<ReplacementKind> {
        self.replacement_policy.parse()
    }

    pub fn validate(&self) -> SimResult<()> {
        let invalid = |msg: String| Err(SimError::InvalidConfig(format!("dcache: {msg}")));
        if !self.l1_line_size.is_power_of_two() {
            return invalid(format!("l1_line_size {} is not a power of two", self.l1_line_size));
        }
        if self.l1_size_kb == 0 {
            return invalid("l1_size_kb must be > 0".into());
        }
        if !self.l1_associativity.is_power_of_two() || self.l1_associativity > 64 {
            return invalid(format!(
                "l1_associativity {} must be a power of two no larger than 64",
                self.l1_associativity
            ));
        }
        if self.num_lines() < self.l1_associativity as u64
            || self.num_lines() % self.l1_associativity as u64 != 0
        {
            return invalid(format!(
                "{} lines cannot be split into {}-way sets",
                self.num_lines(),
                self.l1_associativity
            ));
        }
        if self.mshr_entries == 0 {
            return invalid("mshr_entries must be > 0".into());
        }
        self.policy().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::DcacheConfig;
    use crate::error::SimError;

    #[test]
    fn defaults_are_valid() {
        let cfg = DcacheConfig::default();
        cfg.validate().unwrap();
        assert_eq!(64, cfg.num_sets());
    }

    #[test]
    fn rejects_bad_geometry() {
        let cfg = DcacheConfig {
            l1_line_size: 48,
            ..DcacheConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SimError::InvalidConfig(_))));

        let cfg = DcacheConfig {
            l1_size_kb: 1,
            l1_line_size: 512,
            l1_associativity: 4,
            ..DcacheConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_mshr_file_and_unknown_policy() {
        let cfg = DcacheConfig {
            mshr_entries: 0,
            ..DcacheConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DcacheConfig {
            replacement_policy: "MRU".into(),
            ..DcacheConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SimError::UnknownPolicy(_))));
    }

    #[test]
    fn deserializes_partial_toml() {
        let cfg: DcacheConfig = toml::from_str("mshr_entries = 2\nl1_always_hit = true").unwrap();
        assert_eq!(2, cfg.mshr_entries);
        assert!(cfg.l1_always_hit);
        assert_eq!(64, cfg.l1_line_size);
    }
}
