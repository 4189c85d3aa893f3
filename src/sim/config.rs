use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::{Table, Value};

use crate::core::dcache::config::DcacheConfig;
use crate::error::{SimError, SimResult};
use crate::mss::config::{BiuConfig, L2Config, MssConfig};
use crate::sim::traffic::TrafficConfig;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> SimResult<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .map_err(|err| SimError::InvalidConfig(format!("cannot deserialize config: {err}"))),
            None => {
                warn!("config section not found");
                Ok(Self::default())
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    /// Stop after this many ticks
    pub timeout: u64,
    /// Ticks per core-domain cycle (LSU, DCache, L2Cache, BIU)
    pub core_clock_period: u64,
    /// Ticks per MSS cycle
    pub mss_clock_period: u64,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            timeout: 1_000_000,
            core_clock_period: 1,
            mss_clock_period: 2,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.core_clock_period == 0 || self.mss_clock_period == 0 {
            return Err(SimError::InvalidConfig(
                "sim: clock periods must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Every section of a model configuration file.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    pub sim: SimConfig,
    pub dcache: DcacheConfig,
    pub l2cache: L2Config,
    pub biu: BiuConfig,
    pub mss: MssConfig,
    pub traffic: TrafficConfig,
}

impl ModelConfig {
    pub fn from_table(table: &Table) -> SimResult<Self> {
        Ok(Self {
            sim: SimConfig::from_section(table.get("sim"))?,
            dcache: DcacheConfig::from_section(table.get("dcache"))?,
            l2cache: L2Config::from_section(table.get("l2cache"))?,
            biu: BiuConfig::from_section(table.get("biu"))?,
            mss: MssConfig::from_section(table.get("mss"))?,
            traffic: TrafficConfig::from_section(table.get("traffic"))?,
        })
    }

    pub fn from_toml_str(text: &str) -> SimResult<Self> {
        let table: Table = toml::from_str(text)
            .map_err(|err| SimError::InvalidConfig(format!("cannot parse config toml: {err}")))?;
        Self::from_table(&table)
    }

    pub fn validate(&self) -> SimResult<()> {
        self.sim.validate()?;
        self.dcache.validate()?;
        self.l2cache.validate()?;
        self.biu.validate()?;
        self.traffic.validate()
    }
}
