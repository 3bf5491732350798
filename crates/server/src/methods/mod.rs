//! RPC method handlers, one module per method family.

pub mod agent;
pub mod exec_approval;
