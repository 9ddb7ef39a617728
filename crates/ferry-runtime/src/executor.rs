//! §4.3 — runs exactly one job from claim to ack.

use crate::cancellation::CancellationToken;
use crate::registry::WorkerRegistry;
use ferry_core::{Engine, Job, Outcome};
use std::future::Future;
use std::sync::Arc;

/// Runs `job` to completion (success, failure, timeout, or cancellation) and
/// acknowledges the outcome to `engine`, retrying the ack forever (§4.3 step
/// 5) so a transient database failure can never orphan the job. Returns the
/// job id so the caller (the owning `Producer`) can remove it from its
/// `running` map.
pub async fn execute(
    engine: Arc<dyn Engine>,
    registry: WorkerRegistry,
    job: Job,
    mut cancel: CancellationToken,
) -> i64 {
    let job_id = job.id;

    let Some(worker) = registry.lookup(&job.worker) else {
        tracing::warn!(job_id, worker = %job.worker, "discarding job with no registered worker");
        ack_with_retry(|| {
            let engine = engine.clone();
            async move { engine.discard(job_id, &format!("unknown worker {:?}", job.worker)).await }
        })
        .await;
        return job_id;
    };

    let perform = worker.perform(job.args.clone(), job.meta.clone());
    let outcome = match worker.timeout() {
        Some(timeout) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancel("producer shutdown".to_string()),
                result = tokio::time::timeout(timeout, perform) => match result {
                    Ok(outcome) => outcome,
                    Err(_) => Outcome::error(anyhow::anyhow!("job exceeded {timeout:?} timeout")),
                },
            }
        }
        None => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancel("producer shutdown".to_string()),
                outcome = perform => outcome,
            }
        }
    };

    tracing::debug!(job_id, outcome = ?outcome, "job finished");

    match outcome {
        Outcome::Ok => {
            ack_with_retry(|| {
                let engine = engine.clone();
                async move { engine.complete(job_id).await }
            })
            .await;
        }
        Outcome::Error(err) => {
            let message = format!("{err:#}");
            if job.attempt >= job.max_attempts {
                ack_with_retry(|| {
                    let engine = engine.clone();
                    let message = message.clone();
                    async move { engine.discard(job_id, &message).await }
                })
                .await;
            } else {
                let delay = worker.backoff(job.attempt);
                ack_with_retry(|| {
                    let engine = engine.clone();
                    let message = message.clone();
                    async move { engine.error(job_id, &message, delay).await }
                })
                .await;
            }
        }
        Outcome::Discard(reason) => {
            ack_with_retry(|| {
                let engine = engine.clone();
                let reason = reason.clone();
                async move { engine.discard(job_id, &reason).await }
            })
            .await;
        }
        Outcome::Cancel(reason) => {
            ack_with_retry(|| {
                let engine = engine.clone();
                let reason = reason.clone();
                async move { engine.cancel(job_id, Some(&reason)).await }
            })
            .await;
        }
        Outcome::Snooze(seconds) => {
            let delay = chrono::Duration::seconds(seconds as i64);
            ack_with_retry(|| {
                let engine = engine.clone();
                async move { engine.snooze(job_id, delay).await }
            })
            .await;
        }
    }

    job_id
}

/// The infinite-retry ack loop from §4.3 step 5: acking must never give up,
/// so a struggling database creates backpressure instead of an orphaned
/// job. Linear backoff (`ferry_core::backoff::ack_retry_delay`) keeps
/// retries frequent without hammering a database that's already failing.
async fn ack_with_retry<F, Fut>(mut call: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ferry_core::Result<()>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(()) => return,
            Err(error) => {
                tracing::warn!(%error, attempt, "ack failed, retrying");
                tokio::time::sleep(ferry_core::backoff::ack_retry_delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}
