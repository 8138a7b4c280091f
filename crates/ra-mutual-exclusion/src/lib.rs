//! # RA Mutual Exclusion
//!
//! Ricart-Agrawala distributed mutual exclusion over Lamport clocks.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! A fixed-but-growable set of peers agree on which one may enter a shared
//! critical section. There is no coordinator:
//! - Every bid is stamped with a Lamport clock and sent to every known peer
//! - A peer answers at once unless it holds the section or has an older bid
//! - Withheld answers are queued and sent in arrival order on release
//! - Ties on timestamp are broken by `(address, port)`
//!
//! ## Module Structure
//!
//! ```text
//! ra-mutual-exclusion/
//! ├── domain/          # Clock, identities, messages, engine, registry
//! ├── ports/           # PermissionApi (inbound), PeerClient/PeerConnector (outbound)
//! ├── service/         # ExclusionService: fan-out, quorum, deferred replies
//! └── adapters/        # LocalNetwork, TCP transport (feature "network")
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use ra_mutual_exclusion::{ExclusionService, PeerIdentity, TcpPeerConnector};
//!
//! let service = ExclusionService::new(me, TcpPeerConnector::new());
//! service.register_peers(peers);
//! let section = service.acquire().await?;
//! // ... critical section ...
//! section.release()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

// Re-exports
pub use adapters::{LocalNetwork, LocalPeerClient};
#[cfg(feature = "network")]
pub use adapters::{TcpPeerClient, TcpPeerConnector, TcpPermissionServer, DEFAULT_CONNECT_TIMEOUT};
pub use domain::{
    invariant_clock_strictly_increasing, invariant_queue_drained, invariant_single_holder, Answer,
    BidTicket, Decision, ExclusionEngine, LamportClock, LocalState, MutexError, MutexResult,
    PeerIdentity, PeerRegistry, ReplyOutcome, Request, Timestamp,
};
pub use ports::{
    MockPeerClient, MockPeerConnector, PeerClient, PeerConnector, PermissionApi, TransportError,
};
pub use service::{ExclusionService, HeldSection, ServiceConfig, ServiceStatus};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
