//! Driftwatch daemon library.
//!
//! Exposes the daemon's building blocks for integration testing.
//! In production the crate is used through the `driftwatch` binary (main.rs).

pub mod cli;
pub mod consumer;
pub mod health;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
pub mod reload;
