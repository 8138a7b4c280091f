//! Cross-peer integration tests.

pub mod mutual_exclusion;
pub mod scenarios;
pub mod tcp_transport;
