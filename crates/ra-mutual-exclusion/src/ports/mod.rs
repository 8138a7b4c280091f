//! # Ports Module
//!
//! Hexagonal architecture ports.
//!
//! - `inbound` - the `AskPermission` RPC this peer serves
//! - `outbound` - transport handles used to reach other peers

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
