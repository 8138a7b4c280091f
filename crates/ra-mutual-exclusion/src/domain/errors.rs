//! # Domain Errors
//!
//! Error types for the mutual-exclusion core.
//!
//! Unreachable peers and unknown requesters are recovered locally and never
//! show up here; only contract violations and shutdown do.

use super::entities::LocalState;
use thiserror::Error;

/// Mutual-exclusion error types.
#[derive(Debug, Error)]
pub enum MutexError {
    /// A bid was issued while a previous one is still `Wanted` or `Held`.
    #[error("Duplicate bid: local peer is already {state}")]
    DuplicateBid {
        /// State at the time of the rejected bid
        state: LocalState,
    },

    /// Release attempted outside the critical section.
    #[error("Cannot release: local peer is {0}, not Held")]
    NotHeld(LocalState),

    /// A deferred reply was dropped without being sent (peer shutting down).
    #[error("Deferred reply dropped before release")]
    ReplyDropped,

    /// The bid's completion was dropped before the quorum was reached.
    #[error("Bid abandoned before quorum was reached")]
    BidAbandoned,
}

/// Convenience alias.
pub type MutexResult<T> = Result<T, MutexError>;
