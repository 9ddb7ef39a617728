//! §4.1.6 — reclaims jobs stuck in `executing`, e.g. after a node crashes
//! mid-job without ever acking. Leader-only, same rationale as the pruner.

use ferry_core::{Engine, Peer};
use std::sync::Arc;
use std::time::Duration;

pub fn spawn(engine: Arc<dyn Engine>, interval: Duration, stuck_threshold: chrono::Duration, leader: Arc<dyn Peer>) {
    tokio::spawn(run(engine, interval, stuck_threshold, leader));
}

async fn run(engine: Arc<dyn Engine>, interval: Duration, stuck_threshold: chrono::Duration, leader: Arc<dyn Peer>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if !leader.is_leader() {
            continue;
        }
        match engine.rescue(stuck_threshold).await {
            Ok(ids) if !ids.is_empty() => {
                tracing::warn!(count = ids.len(), ids = ?ids, "rescued jobs stuck in executing");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "rescue tick failed");
            }
        }
    }
}
