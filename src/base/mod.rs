pub mod credit;
pub mod module;
pub mod pipeline;
pub mod port;
