//! §4.1.5 — periodically deletes aged terminal rows, leader-only so a
//! multi-node deployment doesn't have every node racing the same delete.

use ferry_core::{Engine, Peer};
use std::sync::Arc;
use std::time::Duration;

pub fn spawn(
    engine: Arc<dyn Engine>,
    interval: Duration,
    max_age: chrono::Duration,
    limit: i64,
    leader: Arc<dyn Peer>,
) {
    tokio::spawn(run(engine, interval, max_age, limit, leader));
}

async fn run(engine: Arc<dyn Engine>, interval: Duration, max_age: chrono::Duration, limit: i64, leader: Arc<dyn Peer>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if !leader.is_leader() {
            continue;
        }
        match engine.prune(max_age, limit).await {
            Ok(deleted) if deleted > 0 => {
                tracing::debug!(deleted, "pruned terminal jobs");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "prune tick failed");
            }
        }
    }
}
