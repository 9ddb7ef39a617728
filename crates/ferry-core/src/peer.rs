//! §4.6 — leadership contract.

use crate::Result;
use async_trait::async_trait;
use chrono::Duration;

/// Default lease window (§3.3): a leader that hasn't refreshed within this
/// long is considered gone and any node may claim leadership.
pub const DEFAULT_LEASE: Duration = Duration::seconds(30);

#[async_trait]
pub trait Peer: Send + Sync {
    /// Attempts to (re-)claim leadership for `instance_name` on behalf of
    /// `node`. Returns `true` iff this call made/kept this node leader.
    async fn claim_leadership(&self, instance_name: &str, node: &str, lease: Duration) -> Result<bool>;

    /// Cheap local check — does not hit the database, reflects the result
    /// of the most recent `claim_leadership` call.
    fn is_leader(&self) -> bool;

    /// Clean-shutdown path: releases the lease immediately rather than
    /// waiting for it to expire. `Peer` has no `Notifier` of its own, so
    /// broadcasting the relinquish on the leader channel (so other nodes
    /// compete right away instead of waiting out the lease) is the caller's
    /// responsibility — `Instance::shutdown` does it right after this call.
    async fn relinquish(&self, instance_name: &str, node: &str) -> Result<()>;
}
