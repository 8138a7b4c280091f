//! # Outbound Ports
//!
//! How the core reaches other peers. The core is transport-agnostic beyond
//! requiring ordered, reliable delivery per peer pair.

use crate::domain::{Answer, PeerIdentity, Request, Timestamp};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a transport when calling a peer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer could not be reached.
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// Connection dropped before an answer arrived.
    #[error("Connection closed by {0}")]
    ConnectionClosed(String),

    /// Connecting took too long.
    #[error("Connect to {0} timed out")]
    Timeout(String),

    /// Malformed message on the wire.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The remote peer failed to process the request.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to one remote peer - outbound port.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Send `AskPermission` and wait for the answer.
    async fn ask_permission(&self, request: Request) -> Result<Answer, TransportError>;
}

/// Factory of peer handles - outbound port.
///
/// `connect` is lazy: it prepares a handle without checking that the peer
/// is alive. Failures surface on the first call.
pub trait PeerConnector: Send + Sync + 'static {
    /// Handle type stored in the registry.
    type Client: PeerClient + Clone + 'static;

    /// Prepare a handle for `peer`.
    fn connect(&self, peer: &PeerIdentity) -> Self::Client;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Mock connector: every peer grants at once unless marked down.
#[derive(Clone, Default)]
pub struct MockPeerConnector {
    down: Arc<RwLock<HashSet<PeerIdentity>>>,
    calls: Arc<AtomicU64>,
    reply_timestamp: Timestamp,
}

impl MockPeerConnector {
    /// Create a connector where every peer is up.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp every answer with this timestamp.
    pub fn with_reply_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.reply_timestamp = timestamp;
        self
    }

    /// Make calls to `peer` fail.
    pub fn set_down(&self, peer: &PeerIdentity) {
        self.down.write().insert(peer.clone());
    }

    /// Number of calls made through any handle.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Handle produced by `MockPeerConnector`.
#[derive(Clone)]
pub struct MockPeerClient {
    target: PeerIdentity,
    connector: MockPeerConnector,
}

#[async_trait]
impl PeerClient for MockPeerClient {
    async fn ask_permission(&self, _request: Request) -> Result<Answer, TransportError> {
        self.connector.calls.fetch_add(1, Ordering::SeqCst);
        if self.connector.down.read().contains(&self.target) {
            return Err(TransportError::Unreachable(self.target.to_string()));
        }
        Ok(Answer::granted(self.connector.reply_timestamp))
    }
}

impl PeerConnector for MockPeerConnector {
    type Client = MockPeerClient;

    fn connect(&self, peer: &PeerIdentity) -> MockPeerClient {
        MockPeerClient {
            target: peer.clone(),
            connector: self.clone(),
        }
    }
}
