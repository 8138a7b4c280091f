//! In-process transport.
//!
//! Routes `AskPermission` calls straight to the target peer's service.
//! Used by the multi-peer test suite and for single-process demos; peers can
//! be disconnected to simulate crashes.

use crate::domain::{Answer, PeerIdentity, Request};
use crate::ports::{PeerClient, PeerConnector, PermissionApi, TransportError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
struct Endpoint {
    api: Arc<dyn PermissionApi>,
    reachable: bool,
}

/// Shared in-memory network of peers.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    endpoints: Arc<RwLock<HashMap<PeerIdentity, Endpoint>>>,
}

impl LocalNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `api` reachable as `identity`.
    pub fn attach(&self, identity: PeerIdentity, api: Arc<dyn PermissionApi>) {
        self.endpoints.write().insert(
            identity,
            Endpoint {
                api,
                reachable: true,
            },
        );
    }

    /// Remove a peer from the network.
    pub fn detach(&self, identity: &PeerIdentity) {
        self.endpoints.write().remove(identity);
    }

    /// Make calls to `identity` fail until `reconnect`.
    pub fn disconnect(&self, identity: &PeerIdentity) {
        if let Some(endpoint) = self.endpoints.write().get_mut(identity) {
            endpoint.reachable = false;
        }
    }

    /// Undo `disconnect`.
    pub fn reconnect(&self, identity: &PeerIdentity) {
        if let Some(endpoint) = self.endpoints.write().get_mut(identity) {
            endpoint.reachable = true;
        }
    }

    /// Is `identity` attached and reachable?
    pub fn is_reachable(&self, identity: &PeerIdentity) -> bool {
        self.endpoints
            .read()
            .get(identity)
            .is_some_and(|endpoint| endpoint.reachable)
    }
}

/// Handle produced by `LocalNetwork`.
#[derive(Clone)]
pub struct LocalPeerClient {
    target: PeerIdentity,
    network: LocalNetwork,
}

#[async_trait]
impl PeerClient for LocalPeerClient {
    async fn ask_permission(&self, request: Request) -> Result<Answer, TransportError> {
        let api = {
            let endpoints = self.network.endpoints.read();
            match endpoints.get(&self.target) {
                Some(endpoint) if endpoint.reachable => Arc::clone(&endpoint.api),
                _ => return Err(TransportError::Unreachable(self.target.to_string())),
            }
        };
        api.ask_permission(request)
            .await
            .map_err(|e| TransportError::Remote(e.to_string()))
    }
}

impl PeerConnector for LocalNetwork {
    type Client = LocalPeerClient;

    fn connect(&self, peer: &PeerIdentity) -> LocalPeerClient {
        LocalPeerClient {
            target: peer.clone(),
            network: self.clone(),
        }
    }
}
