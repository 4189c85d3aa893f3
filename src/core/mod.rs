pub mod access;
pub mod dcache;
pub mod lsu;
