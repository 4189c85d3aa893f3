use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dcachesim::sim::config::ModelConfig;
use dcachesim::sim::top::Sim;
use dcachesim::sim::traffic::TrafficGen;
use log::info;

#[derive(Parser)]
#[command(version, about)]
struct DcachesimArgs {
    #[arg(help = "Path to config.toml (defaults for every section if omitted)")]
    config_path: Option<PathBuf>,
    #[arg(long, help = "Override replacement policy (TreePLRU, LRU, Random)")]
    policy: Option<String>,
    #[arg(long, help = "Override number of MSHR entries")]
    mshr_entries: Option<u32>,
    #[arg(long, help = "Make every DL1 lookup hit")]
    always_hit: Option<bool>,
    #[arg(long, help = "Override number of accesses to issue")]
    count: Option<u64>,
    #[arg(long, help = "Override traffic seed")]
    seed: Option<u64>,
}

pub fn main() -> anyhow::Result<()> {
    env_logger::init();

    let argv = DcachesimArgs::parse();
    let mut config = match &argv.config_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            ModelConfig::from_toml_str(&text)?
        }
        None => ModelConfig::default(),
    };

    // override toml configs with argv
    if let Some(policy) = argv.policy {
        config.dcache.replacement_policy = policy;
    }
    config.dcache.mshr_entries = argv.mshr_entries.unwrap_or(config.dcache.mshr_entries);
    config.dcache.l1_always_hit = argv.always_hit.unwrap_or(config.dcache.l1_always_hit);
    config.traffic.count = argv.count.unwrap_or(config.traffic.count);
    config.traffic.seed = argv.seed.unwrap_or(config.traffic.seed);

    let mut sim = Sim::new(&config)?;
    for (addr, is_store) in TrafficGen::new(config.traffic.clone()) {
        sim.issue(addr, is_store);
    }
    info!("issued {} accesses ({:?} pattern)", config.traffic.count, config.traffic.pattern);

    let report = sim.run()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
