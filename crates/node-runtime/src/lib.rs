//! # Node Runtime Library
//!
//! Building blocks of the peer executable, exposed for testing. The main
//! entry point is the `main.rs` binary.
//!
//! - `config` - peer file, row selection, environment overrides
//! - `telemetry` - tracing subscriber setup
//! - `frontend` - interactive prompt driving the local bids

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod frontend;
pub mod telemetry;

pub use config::{ConfigError, NodeConfig, PeerEntry, TimingConfig, Topology};
pub use frontend::{Command, Frontend};
