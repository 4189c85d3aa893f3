use serde::Deserialize;

use crate::error::{SimError, SimResult};
use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct L2Config {
    /// Request queue capacity, advertised to the DCache as credits
    pub req_queue_size: u32,
    /// Cycles a request spends in L2Cache before it may go to the BIU
    pub latency: u64,
}

impl Config for L2Config {}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            req_queue_size: 8,
            latency: 2,
        }
    }
}

impl L2Config {
    pub fn validate(&self) -> SimResult<()> {
        if self.req_queue_size == 0 {
            return Err(SimError::InvalidConfig(
                "l2cache: req_queue_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BiuConfig {
    /// BIU request queue size
    pub biu_req_queue_size: u32,
    /// BIU latency
    pub biu_latency: u64,
}

impl Config for BiuConfig {}

impl Default for BiuConfig {
    fn default() -> Self {
        Self {
            biu_req_queue_size: 4,
            biu_latency: 1,
        }
    }
}

impl BiuConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.biu_req_queue_size == 0 {
            return Err(SimError::InvalidConfig(
                "biu: biu_req_queue_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MssConfig {
    /// Access latency in MSS cycles
    pub latency: u64,
}

impl Config for MssConfig {}

impl Default for MssConfig {
    fn default() -> Self {
        Self { latency: 4 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_queues_are_rejected() {
        let l2 = L2Config {
            req_queue_size: 0,
            ..L2Config::default()
        };
        assert!(l2.validate().is_err());
        let biu = BiuConfig {
            biu_req_queue_size: 0,
            ..BiuConfig::default()
        };
        assert!(biu.validate().is_err());
        BiuConfig::default().validate().unwrap();
    }
}
