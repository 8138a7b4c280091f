//! # Domain Module
//!
//! Core types and the protocol state machine: clock, identities and
//! messages, registry, exclusion engine.

pub mod clock;
pub mod engine;
pub mod entities;
pub mod errors;
pub mod invariants;
pub mod registry;

pub use clock::*;
pub use engine::*;
pub use entities::*;
pub use errors::*;
pub use invariants::*;
pub use registry::*;
