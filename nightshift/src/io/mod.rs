//! Side-effecting adapters: filesystem, git, processes, network.

pub mod config;
pub mod git;
pub mod memory;
pub mod model;
pub mod notify;
pub mod process;
pub mod run_log;
pub mod validation;
pub mod workspace;
