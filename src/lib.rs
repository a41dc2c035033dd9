//! Provisioner: asynchronous job façade in front of a cluster registry,
//! a resource scheduler and an orchestration service.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! in `tests/` drive the router directly.

pub mod api;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod state;
pub mod store;

pub use state::AppState;
