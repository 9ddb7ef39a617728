//! §4.4 — periodically promotes due `scheduled`/`retryable` rows to
//! `available` and wakes the producers for whichever queues just gained
//! work. Global (leader-only): a non-leader instance does no staging here
//! and relies on each `Producer`'s own local-mode fallback (§4.4, `producer`
//! module) when pub/sub notifications aren't arriving.

use crate::producer::ProducerHandle;
use dashmap::DashMap;
use ferry_core::{Engine, Peer};
use std::sync::Arc;
use std::time::Duration;

const STAGE_BATCH_LIMIT: i64 = 10_000;

pub fn spawn(engine: Arc<dyn Engine>, interval: Duration, queues: Arc<DashMap<String, ProducerHandle>>, leader: Arc<dyn Peer>) {
    tokio::spawn(run(engine, interval, queues, leader));
}

async fn run(engine: Arc<dyn Engine>, interval: Duration, queues: Arc<DashMap<String, ProducerHandle>>, leader: Arc<dyn Peer>) {
    // Jittered startup so many instances sharing a database don't all stage
    // on the same tick.
    let jitter_ceiling = (interval.as_millis() as u64).max(1);
    tokio::time::sleep(Duration::from_millis(fastrand::u64(0..jitter_ceiling))).await;
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if !leader.is_leader() {
            continue;
        }
        match engine.stage(STAGE_BATCH_LIMIT).await {
            Ok(staged) if !staged.is_empty() => {
                let mut woken = std::collections::HashSet::new();
                for job in staged {
                    if woken.insert(job.queue.clone()) {
                        if let Some(producer) = queues.get(&job.queue) {
                            producer.notify_insert().await;
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "stage tick failed");
            }
        }
    }
}
