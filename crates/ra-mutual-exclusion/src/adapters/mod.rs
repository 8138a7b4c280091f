//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements the outbound transport ports and serves the inbound one.
//!
//! ## Adapters Provided
//!
//! - `LocalNetwork` - in-process transport with failure injection
//! - `TcpPermissionServer` / `TcpPeerConnector` - JSON lines over TCP
//!   (requires "network" feature)

mod local;

#[cfg(feature = "network")]
mod tcp;

pub use local::{LocalNetwork, LocalPeerClient};

#[cfg(feature = "network")]
pub use tcp::{TcpPeerClient, TcpPeerConnector, TcpPermissionServer, DEFAULT_CONNECT_TIMEOUT};
