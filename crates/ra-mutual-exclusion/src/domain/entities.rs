//! # Domain Entities
//!
//! Peer identities, protocol messages and the local state of the machine.

use super::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

// =============================================================================
// PeerIdentity
// =============================================================================

/// Network identity of a peer.
///
/// Equality, hashing and ordering use `(address, port)` only. The name is
/// informational and never takes part in lookups or tie-breaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Host address (e.g. "127.0.0.1").
    pub address: String,
    /// Listening port.
    pub port: u16,
    /// Display name.
    pub name: String,
}

impl PeerIdentity {
    /// Create a new identity.
    pub fn new(address: impl Into<String>, port: u16, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            name: name.into(),
        }
    }

    /// `address:port`, suitable for dialing.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    fn key(&self) -> (&str, u16) {
        (self.address.as_str(), self.port)
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Ord for PeerIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for PeerIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}:{}", self.address, self.port)
        } else {
            write!(f, "{}@{}:{}", self.name, self.address, self.port)
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// A bid to enter the critical section, stamped with the requester's clock.
///
/// Wire shape:
/// `{requester_address, requester_port, requester_name, logical_timestamp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireRequest", into = "WireRequest")]
pub struct Request {
    /// Who is bidding.
    pub requester: PeerIdentity,
    /// Requester's clock when the bid was stamped.
    pub timestamp: Timestamp,
}

impl Request {
    /// Create a new request.
    pub fn new(requester: PeerIdentity, timestamp: Timestamp) -> Self {
        Self {
            requester,
            timestamp,
        }
    }

    /// Priority pair `(timestamp, identity)`. Lower wins.
    pub fn priority(&self) -> (Timestamp, &PeerIdentity) {
        (self.timestamp, &self.requester)
    }

    /// True if this request wins against a bid `(timestamp, identity)`.
    pub fn precedes(&self, timestamp: Timestamp, identity: &PeerIdentity) -> bool {
        self.priority() < (timestamp, identity)
    }
}

#[derive(Serialize, Deserialize)]
struct WireRequest {
    requester_address: String,
    requester_port: u16,
    #[serde(default)]
    requester_name: String,
    logical_timestamp: Timestamp,
}

impl From<WireRequest> for Request {
    fn from(wire: WireRequest) -> Self {
        Request::new(
            PeerIdentity::new(wire.requester_address, wire.requester_port, wire.requester_name),
            wire.logical_timestamp,
        )
    }
}

impl From<Request> for WireRequest {
    fn from(request: Request) -> Self {
        WireRequest {
            requester_address: request.requester.address,
            requester_port: request.requester.port,
            requester_name: request.requester.name,
            logical_timestamp: request.timestamp,
        }
    }
}

// =============================================================================
// Answer
// =============================================================================

/// Reply to a `Request`.
///
/// `granted` is always `true` in a correct run: permission is either given
/// at once or withheld until release, never denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Permission granted.
    pub granted: bool,
    /// Replier's clock when answering, observed by the bidder.
    #[serde(
        default,
        rename = "logical_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<Timestamp>,
}

impl Answer {
    /// Affirmative answer stamped with the replier's clock.
    pub fn granted(timestamp: Timestamp) -> Self {
        Self {
            granted: true,
            timestamp: Some(timestamp),
        }
    }
}

// =============================================================================
// LocalState
// =============================================================================

/// State of the local peer with respect to the critical section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalState {
    /// No interest in the critical section.
    #[default]
    Released,
    /// Bid outstanding, collecting replies.
    Wanted,
    /// Critical section in use.
    Held,
}

impl fmt::Display for LocalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LocalState::Released => "Released",
            LocalState::Wanted => "Wanted",
            LocalState::Held => "Held",
        };
        f.write_str(label)
    }
}
