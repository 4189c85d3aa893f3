pub mod biu;
pub mod config;
pub mod l2cache;
pub mod memory;
