//! # Exclusion Engine
//!
//! The Ricart-Agrawala state machine.
//!
//! ```text
//! Released ──begin_bid──→ Wanted ──last reply──→ Held ──release──→ Released
//! ```
//!
//! Decision rule for a remote request `(T_remote, P)` against the local bid
//! `(T_bid, S)`:
//!
//! | Local state | Condition                       | Outcome |
//! |-------------|---------------------------------|---------|
//! | Released    | -                               | grant   |
//! | Wanted      | `(T_remote, P) < (T_bid, S)`    | grant   |
//! | Wanted      | `(T_remote, P) >= (T_bid, S)`   | defer   |
//! | Held        | -                               | defer   |
//!
//! The engine itself is not synchronized. The service wraps it in a single
//! mutex so every transition and decision is atomic.

use super::clock::{LamportClock, Timestamp};
use super::entities::{Answer, LocalState, PeerIdentity, Request};
use super::errors::{MutexError, MutexResult};
use std::collections::{BTreeSet, VecDeque};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// A withheld reply and the continuation that will deliver it.
struct DeferredReply {
    request: Request,
    reply_to: oneshot::Sender<Answer>,
}

/// The local bid in flight.
struct Bid {
    timestamp: Timestamp,
    awaiting: BTreeSet<PeerIdentity>,
    on_quorum: Option<oneshot::Sender<()>>,
}

/// Outcome of a decision on a remote request.
#[derive(Debug)]
pub enum Decision {
    /// Reply now.
    Grant(Answer),
    /// Reply withheld; resolves on local release.
    Defer(oneshot::Receiver<Answer>),
}

impl Decision {
    /// True if the request was deferred.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Decision::Defer(_))
    }
}

/// Everything the bidder needs to run the fan-out.
#[derive(Debug)]
pub struct BidTicket {
    /// Request to send to every target.
    pub request: Request,
    /// Peers whose reply is awaited.
    pub targets: Vec<PeerIdentity>,
    /// Fires once the engine reaches `Held`.
    pub quorum: oneshot::Receiver<()>,
}

/// Effect of a reply (or an exclusion) on the bid in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Still waiting on this many peers.
    Pending(usize),
    /// That was the last one; the engine is now `Held`.
    QuorumReached,
    /// Not part of the current bid (old bid, duplicate, or unknown peer).
    Ignored,
}

/// Ricart-Agrawala state machine for one peer.
pub struct ExclusionEngine {
    local: PeerIdentity,
    clock: LamportClock,
    state: LocalState,
    bid: Option<Bid>,
    deferred: VecDeque<DeferredReply>,
}

impl ExclusionEngine {
    /// Create an engine in `Released` with a zero clock.
    pub fn new(local: PeerIdentity) -> Self {
        Self::with_clock(local, LamportClock::new())
    }

    /// Create an engine with a given clock.
    pub fn with_clock(local: PeerIdentity, clock: LamportClock) -> Self {
        Self {
            local,
            clock,
            state: LocalState::Released,
            bid: None,
            deferred: VecDeque::new(),
        }
    }

    // === ACCESSORS ===

    /// Local identity.
    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    /// Current state.
    pub fn state(&self) -> LocalState {
        self.state
    }

    /// Current clock value.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Timestamp of the bid in flight, if any.
    pub fn bid_timestamp(&self) -> Option<Timestamp> {
        self.bid.as_ref().map(|bid| bid.timestamp)
    }

    /// Replies still awaited for the current bid. Zero unless `Wanted`.
    pub fn pending_replies(&self) -> usize {
        match (&self.state, &self.bid) {
            (LocalState::Wanted, Some(bid)) => bid.awaiting.len(),
            _ => 0,
        }
    }

    /// Number of deferred requests.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Requests currently deferred, in arrival order.
    pub fn deferred_requests(&self) -> Vec<Request> {
        self.deferred.iter().map(|d| d.request.clone()).collect()
    }

    // === CLOCK ===

    /// Local event.
    pub fn tick(&mut self) -> Timestamp {
        self.clock.tick()
    }

    /// Remote timestamp received.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.clock.observe(remote)
    }

    // === TRANSITIONS ===

    /// `Released → Wanted`.
    ///
    /// Stamps the bid, expects a reply from every peer in `peers`, and goes
    /// straight to `Held` if there is nobody to ask.
    pub fn begin_bid(&mut self, peers: Vec<PeerIdentity>) -> MutexResult<BidTicket> {
        if self.state != LocalState::Released {
            return Err(MutexError::DuplicateBid { state: self.state });
        }

        let timestamp = self.clock.tick();
        let awaiting: BTreeSet<_> = peers.into_iter().filter(|p| *p != self.local).collect();
        let targets: Vec<_> = awaiting.iter().cloned().collect();
        let (tx, rx) = oneshot::channel();

        self.state = LocalState::Wanted;
        self.bid = Some(Bid {
            timestamp,
            awaiting,
            on_quorum: Some(tx),
        });

        info!(
            timestamp,
            expected_replies = targets.len(),
            "Bid started, state Released -> Wanted"
        );

        if targets.is_empty() {
            self.enter_held();
        }

        Ok(BidTicket {
            request: Request::new(self.local.clone(), timestamp),
            targets,
            quorum: rx,
        })
    }

    /// Decide whether to answer a remote request now or defer it.
    ///
    /// The request's timestamp is observed first in every branch.
    pub fn decide(&mut self, request: Request) -> Decision {
        let now = self.clock.observe(request.timestamp);

        let grant = match (self.state, &self.bid) {
            (LocalState::Released, _) => true,
            (LocalState::Wanted, Some(bid)) => request.precedes(bid.timestamp, &self.local),
            (LocalState::Wanted, None) => true,
            (LocalState::Held, _) => false,
        };

        if grant {
            debug!(
                requester = %request.requester,
                remote_timestamp = request.timestamp,
                state = %self.state,
                "Granting request immediately"
            );
            return Decision::Grant(Answer::granted(now));
        }

        debug!(
            requester = %request.requester,
            remote_timestamp = request.timestamp,
            state = %self.state,
            queued = self.deferred.len() + 1,
            "Deferring request"
        );
        let (tx, rx) = oneshot::channel();
        self.deferred.push_back(DeferredReply {
            request,
            reply_to: tx,
        });
        Decision::Defer(rx)
    }

    /// Reply from `peer` for the bid stamped `bid_timestamp`.
    ///
    /// The reply's own timestamp is observed even when the reply turns out
    /// to be stale.
    pub fn record_reply(
        &mut self,
        peer: &PeerIdentity,
        bid_timestamp: Timestamp,
        reply_timestamp: Option<Timestamp>,
    ) -> ReplyOutcome {
        if let Some(remote) = reply_timestamp {
            self.clock.observe(remote);
        }
        self.settle(peer, bid_timestamp)
    }

    /// `peer` is unreachable; count it as answered for the bid stamped
    /// `bid_timestamp`.
    pub fn exclude_peer(&mut self, peer: &PeerIdentity, bid_timestamp: Timestamp) -> ReplyOutcome {
        self.settle(peer, bid_timestamp)
    }

    /// Add a newly discovered peer to the bid in flight.
    ///
    /// Returns the request to send it, or `None` if there is no `Wanted` bid
    /// or the peer is already awaited.
    pub fn add_late_joiner(&mut self, peer: PeerIdentity) -> Option<Request> {
        if self.state != LocalState::Wanted || peer == self.local {
            return None;
        }
        let bid = self.bid.as_mut()?;
        if !bid.awaiting.insert(peer.clone()) {
            return None;
        }
        info!(
            peer = %peer,
            bid_timestamp = bid.timestamp,
            pending = bid.awaiting.len(),
            "Late joiner added to bid in flight"
        );
        Some(Request::new(self.local.clone(), bid.timestamp))
    }

    /// Give up on every outstanding reply of the bid stamped
    /// `bid_timestamp` and enter `Held`.
    ///
    /// Returns the peers that were still awaited.
    pub fn expire_bid(&mut self, bid_timestamp: Timestamp) -> Vec<PeerIdentity> {
        if self.state != LocalState::Wanted {
            return Vec::new();
        }
        let Some(bid) = self.bid.as_mut() else {
            return Vec::new();
        };
        if bid.timestamp != bid_timestamp {
            return Vec::new();
        }
        let expired: Vec<_> = std::mem::take(&mut bid.awaiting).into_iter().collect();
        self.enter_held();
        expired
    }

    /// `Held → Released`.
    ///
    /// Sends an affirmative answer to every deferred request in FIFO order
    /// and empties the queue. Returns how many were answered.
    pub fn release(&mut self) -> MutexResult<usize> {
        if self.state != LocalState::Held {
            return Err(MutexError::NotHeld(self.state));
        }

        self.state = LocalState::Released;
        self.bid = None;

        let now = self.clock.now();
        let mut answered = 0;
        while let Some(deferred) = self.deferred.pop_front() {
            let requester = deferred.request.requester;
            if deferred.reply_to.send(Answer::granted(now)).is_err() {
                debug!(requester = %requester, "Deferred requester went away before release");
            }
            answered += 1;
        }

        info!(
            timestamp = now,
            released_replies = answered,
            "Critical section released, state Held -> Released"
        );
        Ok(answered)
    }

    fn settle(&mut self, peer: &PeerIdentity, bid_timestamp: Timestamp) -> ReplyOutcome {
        if self.state != LocalState::Wanted {
            return ReplyOutcome::Ignored;
        }
        let Some(bid) = self.bid.as_mut() else {
            return ReplyOutcome::Ignored;
        };
        if bid.timestamp != bid_timestamp || !bid.awaiting.remove(peer) {
            return ReplyOutcome::Ignored;
        }

        let remaining = bid.awaiting.len();
        if remaining > 0 {
            return ReplyOutcome::Pending(remaining);
        }

        self.enter_held();
        ReplyOutcome::QuorumReached
    }

    fn enter_held(&mut self) {
        self.state = LocalState::Held;
        if let Some(bid) = self.bid.as_mut() {
            info!(bid_timestamp = bid.timestamp, "Quorum reached, state Wanted -> Held");
            if let Some(tx) = bid.on_quorum.take() {
                // The bidder may have stopped waiting (timeout); nothing to do then.
                let _ = tx.send(());
            }
        }
    }
}
