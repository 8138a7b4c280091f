//! # Domain Invariants
//!
//! Properties that must hold in every execution. Used by the multi-peer
//! test suite to check observed histories.

use super::clock::Timestamp;
use super::entities::LocalState;

/// Invariant: at most one peer is `Held` at any instant.
pub fn invariant_single_holder(states: &[LocalState]) -> bool {
    states.iter().filter(|s| **s == LocalState::Held).count() <= 1
}

/// Invariant: a peer's clock strictly increases across a sequence of events.
pub fn invariant_clock_strictly_increasing(samples: &[Timestamp]) -> bool {
    samples.windows(2).all(|pair| pair[0] < pair[1])
}

/// Invariant: after release the deferred queue is empty and every request
/// that was queued got exactly one answer.
pub fn invariant_queue_drained(queued_before: usize, answered: usize, queued_after: usize) -> bool {
    queued_after == 0 && answered == queued_before
}
