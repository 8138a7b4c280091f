//! # Peer Registry
//!
//! Identity → communication handle. Internally synchronized; the lock is
//! never held across an `.await` and never while taking the engine lock.
//!
//! Every registration carries a generation number, so a caller holding an
//! old handle can remove the peer without evicting a newer registration.

use super::entities::PeerIdentity;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

struct Entry<H> {
    handle: H,
    generation: u64,
}

struct Entries<H> {
    by_identity: HashMap<PeerIdentity, Entry<H>>,
    next_generation: u64,
}

/// Registry of known peers and their handles.
pub struct PeerRegistry<H> {
    peers: RwLock<Entries<H>>,
}

impl<H: Clone> PeerRegistry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(Entries {
                by_identity: HashMap::new(),
                next_generation: 0,
            }),
        }
    }

    /// Insert or replace a peer.
    ///
    /// Returns `true` if the identity was not known before.
    pub fn register(&self, identity: PeerIdentity, handle: H) -> bool {
        let mut peers = self.peers.write();
        peers.next_generation += 1;
        let generation = peers.next_generation;
        // Drop the old key so a changed display name is picked up.
        let replaced = peers.by_identity.remove(&identity).is_some();
        if replaced {
            debug!(peer = %identity, generation, "Replaced peer handle");
        } else {
            info!(peer = %identity, "Registered peer");
        }
        peers.by_identity.insert(identity, Entry { handle, generation });
        !replaced
    }

    /// Handle for a peer, if registered.
    pub fn lookup(&self, identity: &PeerIdentity) -> Option<H> {
        self.lookup_entry(identity).map(|(handle, _)| handle)
    }

    /// Handle for a peer together with the generation of its registration.
    pub fn lookup_entry(&self, identity: &PeerIdentity) -> Option<(H, u64)> {
        self.peers
            .read()
            .by_identity
            .get(identity)
            .map(|entry| (entry.handle.clone(), entry.generation))
    }

    /// Forget a peer. Returns its handle if it was registered.
    pub fn remove(&self, identity: &PeerIdentity) -> Option<H> {
        let removed = self.peers.write().by_identity.remove(identity);
        if removed.is_some() {
            info!(peer = %identity, "Removed peer from registry");
        }
        removed.map(|entry| entry.handle)
    }

    /// Forget a peer if it is still registered under `generation`.
    ///
    /// Returns `false` when a newer registration exists; that entry is kept.
    /// An identity that is already gone counts as retired.
    pub fn retire(&self, identity: &PeerIdentity, generation: u64) -> bool {
        let mut peers = self.peers.write();
        let current = peers.by_identity.get(identity).map(|entry| entry.generation);
        match current {
            Some(current) if current != generation => false,
            Some(_) => {
                peers.by_identity.remove(identity);
                info!(peer = %identity, "Removed peer from registry");
                true
            }
            None => true,
        }
    }

    /// Identities registered right now, in identity order.
    pub fn snapshot(&self) -> Vec<PeerIdentity> {
        let mut identities: Vec<_> = self.peers.read().by_identity.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Is this identity registered?
    pub fn contains(&self, identity: &PeerIdentity) -> bool {
        self.peers.read().by_identity.contains_key(identity)
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.read().by_identity.len()
    }

    /// True if no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.peers.read().by_identity.is_empty()
    }
}

impl<H: Clone> Default for PeerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
