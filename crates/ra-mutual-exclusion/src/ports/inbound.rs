//! # Inbound Ports
//!
//! The single RPC every peer exposes to every other peer.

use crate::domain::{Answer, MutexError, Request};
use async_trait::async_trait;

/// `AskPermission(Request) -> Answer` - inbound port.
///
/// Returns at once when permission can be given, otherwise suspends until
/// the local critical section is released. Never answers with a denial.
#[async_trait]
pub trait PermissionApi: Send + Sync {
    /// Ask for permission to enter the critical section.
    async fn ask_permission(&self, request: Request) -> Result<Answer, MutexError>;
}
