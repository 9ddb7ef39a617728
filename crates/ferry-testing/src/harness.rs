//! Helpers for §6.4's "manual" testing mode: jobs are inserted but no
//! producers run, and a test drains the queue itself, asserting on outcomes
//! without needing a running `Instance`.

use ferry_core::{Claimant, ClaimedJob, Engine};

/// Fetches and immediately returns every currently-available job in `queue`,
/// without running any worker — the caller decides what "running" means.
pub async fn drain_available(engine: &dyn Engine, queue: &str, claimant: &Claimant) -> Vec<ClaimedJob> {
    let mut all = Vec::new();
    loop {
        let batch = engine.fetch(queue, 50, claimant).await.expect("fetch in test harness");
        if batch.is_empty() {
            break;
        }
        let exhausted = batch.len() < 50;
        all.extend(batch);
        if exhausted {
            break;
        }
    }
    all
}

/// A fixed claimant identity for tests that don't care about node/producer
/// identity, only about job state transitions.
pub fn test_claimant() -> Claimant {
    Claimant {
        node: "test-node".to_string(),
        producer: uuid::Uuid::nil(),
    }
}
