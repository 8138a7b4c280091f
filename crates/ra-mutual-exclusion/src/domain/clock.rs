//! # Lamport Clock
//!
//! Monotonic logical clock owned by a single peer.
//!
//! - `tick()` on every local event: `local + 1`
//! - `observe(r)` on every received timestamp: `max(local, r) + 1`

/// Logical timestamp carried on every protocol message.
pub type Timestamp = u64;

/// Lamport logical clock. Never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock {
    value: Timestamp,
}

impl LamportClock {
    /// Create a clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at a given value.
    pub fn starting_at(value: Timestamp) -> Self {
        Self { value }
    }

    /// Current value, without advancing.
    pub fn now(&self) -> Timestamp {
        self.value
    }

    /// Advance for a local event and return the new value.
    pub fn tick(&mut self) -> Timestamp {
        self.value = self.value.saturating_add(1);
        self.value
    }

    /// Merge a remote timestamp and return the new value.
    ///
    /// Must be called exactly once per received message carrying a
    /// timestamp, replies included.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.value = self.value.max(remote).saturating_add(1);
        self.value
    }
}
