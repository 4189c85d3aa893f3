pub mod base;
pub mod core;
pub mod error;
pub mod mss;
pub mod sim;
pub mod timeq;
