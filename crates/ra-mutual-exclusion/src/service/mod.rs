//! Exclusion Service - the peer-facing side of the protocol
//!
//! # Architecture
//! - One `ExclusionEngine` per peer behind a single mutex
//! - Inbound: `PermissionApi::ask_permission` decides grant vs defer
//! - Outbound: `acquire` runs the bid on its own task and fans it out, one
//!   task per peer
//! - Deferred replies and the quorum are one-shot continuations, never polled
//!
//! Lock order: engine, then registry. The registry lock is never held while
//! taking the engine lock, and neither is held across an `.await`.

use crate::domain::{
    Answer, BidTicket, Decision, ExclusionEngine, LocalState, MutexError, MutexResult,
    PeerIdentity, PeerRegistry, Request, Timestamp,
};
use crate::ports::{PeerClient, PeerConnector, PermissionApi};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Runtime knobs of the service.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Give up on silent peers after this long. `None` waits forever.
    pub bid_timeout: Option<Duration>,
    /// Pause between entering `Wanted` and sending the bid. Lets several
    /// peers bid concurrently when driven by hand.
    pub fanout_delay: Option<Duration>,
}

impl ServiceConfig {
    /// Set the bid timeout.
    pub fn with_bid_timeout(mut self, timeout: Duration) -> Self {
        self.bid_timeout = Some(timeout);
        self
    }

    /// Set the fan-out delay.
    pub fn with_fanout_delay(mut self, delay: Duration) -> Self {
        self.fanout_delay = Some(delay);
        self
    }
}

/// Point-in-time view of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Local state.
    pub state: LocalState,
    /// Clock value.
    pub clock: Timestamp,
    /// Timestamp of the bid in flight.
    pub bid_timestamp: Option<Timestamp>,
    /// Replies still awaited.
    pub pending_replies: usize,
    /// Requests waiting for our release.
    pub deferred: usize,
    /// Registered peers.
    pub peers: usize,
}

struct Shared<C: PeerConnector> {
    local: PeerIdentity,
    engine: Mutex<ExclusionEngine>,
    registry: PeerRegistry<C::Client>,
    connector: C,
    config: ServiceConfig,
}

/// Ricart-Agrawala service for one peer.
///
/// Cheap to clone; every clone drives the same engine.
pub struct ExclusionService<C: PeerConnector> {
    inner: Arc<Shared<C>>,
}

impl<C: PeerConnector> Clone for ExclusionService<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: PeerConnector> ExclusionService<C> {
    /// Create a service with the default configuration.
    pub fn new(local: PeerIdentity, connector: C) -> Self {
        Self::with_config(local, connector, ServiceConfig::default())
    }

    /// Create a service.
    pub fn with_config(local: PeerIdentity, connector: C, config: ServiceConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                engine: Mutex::new(ExclusionEngine::new(local.clone())),
                local,
                registry: PeerRegistry::new(),
                connector,
                config,
            }),
        }
    }

    /// Local identity.
    pub fn local(&self) -> &PeerIdentity {
        &self.inner.local
    }

    /// Known peers.
    pub fn registry(&self) -> &PeerRegistry<C::Client> {
        &self.inner.registry
    }

    /// Register a peer, preparing a handle through the connector.
    ///
    /// Returns `true` if the peer was not known before. The local identity
    /// is never registered.
    pub fn register_peer(&self, identity: PeerIdentity) -> bool {
        if identity == self.inner.local {
            return false;
        }
        let client = self.inner.connector.connect(&identity);
        self.inner.registry.register(identity, client)
    }

    /// Register the initial peer set. Returns how many were new.
    pub fn register_peers(&self, peers: impl IntoIterator<Item = PeerIdentity>) -> usize {
        peers
            .into_iter()
            .filter(|peer| self.register_peer(peer.clone()))
            .count()
    }

    /// Current status.
    pub fn status(&self) -> ServiceStatus {
        let peers = self.inner.registry.len();
        let engine = self.inner.engine.lock();
        ServiceStatus {
            state: engine.state(),
            clock: engine.now(),
            bid_timestamp: engine.bid_timestamp(),
            pending_replies: engine.pending_replies(),
            deferred: engine.deferred_len(),
            peers,
        }
    }

    /// Requests deferred until our release, in arrival order.
    pub fn deferred_requests(&self) -> Vec<Request> {
        self.inner.engine.lock().deferred_requests()
    }

    /// A local event happened; advance the clock.
    pub fn local_event(&self) -> Timestamp {
        self.inner.engine.lock().tick()
    }

    /// Bid for the critical section and wait until it is held.
    ///
    /// The bid runs on its own task. If the caller stops waiting, the bid
    /// still completes and the section is released as soon as it is won.
    ///
    /// # Errors
    ///
    /// `MutexError::DuplicateBid` if a bid is already `Wanted` or `Held`.
    pub async fn acquire(&self) -> MutexResult<HeldSection<C>> {
        let service = self.clone();
        tokio::spawn(async move { service.run_bid().await })
            .await
            .map_err(|e| {
                error!(peer = %self.inner.local, error = %e, "Bid task failed");
                MutexError::BidAbandoned
            })?
    }

    async fn run_bid(self) -> MutexResult<HeldSection<C>> {
        let ticket = {
            let mut engine = self.inner.engine.lock();
            let peers = self.inner.registry.snapshot();
            engine.begin_bid(peers)?
        };

        let BidTicket {
            request,
            targets,
            quorum,
        } = ticket;
        let bid_timestamp = request.timestamp;

        info!(
            peer = %self.inner.local,
            bid_timestamp,
            peers = targets.len(),
            "Asking peers for permission"
        );

        if let Some(delay) = self.inner.config.fanout_delay {
            tokio::time::sleep(delay).await;
        }

        for peer in targets {
            self.dispatch(peer, request.clone());
        }

        self.await_quorum(bid_timestamp, quorum).await?;

        info!(peer = %self.inner.local, bid_timestamp, "Starting critical section");
        Ok(HeldSection {
            service: self,
            bid_timestamp,
            released: false,
        })
    }

    fn dispatch(&self, peer: PeerIdentity, request: Request) {
        let service = self.clone();
        tokio::spawn(async move {
            service.ask_peer(peer, request).await;
        });
    }

    async fn ask_peer(&self, peer: PeerIdentity, request: Request) {
        let bid_timestamp = request.timestamp;

        let Some((client, generation)) = self.inner.registry.lookup_entry(&peer) else {
            debug!(peer = %peer, "Peer left the registry before fan-out, excluding it");
            self.inner.engine.lock().exclude_peer(&peer, bid_timestamp);
            return;
        };

        match client.ask_permission(request.clone()).await {
            Ok(answer) if answer.granted => {
                let outcome = {
                    let mut engine = self.inner.engine.lock();
                    engine.record_reply(&peer, bid_timestamp, answer.timestamp)
                };
                debug!(peer = %peer, bid_timestamp, ?outcome, "Reply settled");
            }
            Ok(_) => {
                error!(peer = %peer, "Peer answered with a denial, treating it as faulty");
                self.drop_peer(&peer, generation, request);
            }
            Err(e) => {
                warn!(
                    peer = %peer,
                    error = %e,
                    "Peer no longer available, removed from connected peers"
                );
                self.drop_peer(&peer, generation, request);
            }
        }
    }

    /// Exclude a failed peer from the bid, unless it registered again while
    /// the call was in flight. A fresh registration is asked again instead.
    fn drop_peer(&self, peer: &PeerIdentity, generation: u64, request: Request) {
        let bid_timestamp = request.timestamp;
        if !self.inner.registry.retire(peer, generation) {
            if self.inner.engine.lock().bid_timestamp() == Some(bid_timestamp) {
                debug!(
                    peer = %peer,
                    bid_timestamp,
                    "Peer registered again during the call, asking the new handle"
                );
                self.dispatch(peer.clone(), request);
            }
            return;
        }
        let outcome = self.inner.engine.lock().exclude_peer(peer, bid_timestamp);
        debug!(peer = %peer, bid_timestamp, ?outcome, "Reply settled");
    }

    async fn await_quorum(
        &self,
        bid_timestamp: Timestamp,
        quorum: oneshot::Receiver<()>,
    ) -> MutexResult<()> {
        let Some(limit) = self.inner.config.bid_timeout else {
            return quorum.await.map_err(|_| MutexError::BidAbandoned);
        };

        match tokio::time::timeout(limit, quorum).await {
            Ok(reached) => reached.map_err(|_| MutexError::BidAbandoned),
            Err(_) => {
                let expired = self.inner.engine.lock().expire_bid(bid_timestamp);
                for peer in &expired {
                    warn!(
                        peer = %peer,
                        timeout_ms = limit.as_millis() as u64,
                        "No reply before bid timeout, removed from connected peers"
                    );
                    self.inner.registry.remove(peer);
                }
                Ok(())
            }
        }
    }

    fn release_section(&self) -> MutexResult<usize> {
        let answered = self.inner.engine.lock().release()?;
        info!(
            peer = %self.inner.local,
            released_replies = answered,
            "Ending critical section"
        );
        Ok(answered)
    }
}

#[async_trait]
impl<C: PeerConnector> PermissionApi for ExclusionService<C> {
    async fn ask_permission(&self, request: Request) -> Result<Answer, MutexError> {
        let requester = request.requester.clone();
        info!(
            requester = %requester,
            remote_timestamp = request.timestamp,
            "Peer asked for the critical section"
        );

        let discovered =
            !self.inner.registry.contains(&requester) && self.register_peer(requester.clone());

        let (decision, late_bid) = {
            let mut engine = self.inner.engine.lock();
            let late_bid = if discovered {
                engine.add_late_joiner(requester.clone())
            } else {
                None
            };
            (engine.decide(request), late_bid)
        };

        if let Some(bid_request) = late_bid {
            self.dispatch(requester.clone(), bid_request);
        }

        let answer = match decision {
            Decision::Grant(answer) => answer,
            Decision::Defer(reply) => reply.await.map_err(|_| MutexError::ReplyDropped)?,
        };

        info!(requester = %requester, "Peer authorized to enter the critical section");
        Ok(answer)
    }
}

/// Guard for a held critical section. Releases on drop.
#[must_use = "the critical section is released as soon as the guard is dropped"]
pub struct HeldSection<C: PeerConnector> {
    service: ExclusionService<C>,
    bid_timestamp: Timestamp,
    released: bool,
}

impl<C: PeerConnector> HeldSection<C> {
    /// Timestamp of the bid that won the section.
    pub fn bid_timestamp(&self) -> Timestamp {
        self.bid_timestamp
    }

    /// Release the section. Returns how many deferred requests were answered.
    pub fn release(mut self) -> MutexResult<usize> {
        self.released = true;
        self.service.release_section()
    }
}

impl<C: PeerConnector> Drop for HeldSection<C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.service.release_section() {
            warn!(error = %e, "Failed to release critical section on drop");
        }
    }
}
