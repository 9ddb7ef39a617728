//! §4.2 — one `Producer` per (instance, queue): fetch loop, concurrency
//! gate, executor tracking, pause/resume/scale, graceful shutdown.

use crate::cancellation::{cancellation_pair, CancellationSource};
use crate::executor;
use crate::registry::WorkerRegistry;
use ferry_core::engine::Claimant;
use ferry_core::{Engine, Notifier};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A point-in-time view of a producer, returned by `check`.
#[derive(Debug, Clone)]
pub struct ProducerSnapshot {
    pub queue: String,
    pub limit: usize,
    pub paused: bool,
    pub running: usize,
}

enum Command {
    Pause,
    Resume,
    Scale(usize),
    Check(oneshot::Sender<ProducerSnapshot>),
    NotifyInsert,
    CancelJob(i64),
    Shutdown {
        grace_period: Duration,
        reply: oneshot::Sender<Vec<i64>>,
    },
}

/// Cheap-clone handle to a running `Producer`. Every public operation on a
/// queue (§6.2's `pause_queue`/`resume_queue`/`scale_queue`/`check_queue`)
/// goes through one of these.
#[derive(Clone)]
pub struct ProducerHandle {
    tx: mpsc::Sender<Command>,
    limit: Arc<AtomicUsize>,
    paused: Arc<AtomicBool>,
}

impl ProducerHandle {
    pub async fn pause(&self) {
        let _ = self.tx.send(Command::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.tx.send(Command::Resume).await;
    }

    pub async fn scale(&self, new_limit: usize) {
        let _ = self.tx.send(Command::Scale(new_limit)).await;
    }

    pub async fn notify_insert(&self) {
        let _ = self.tx.send(Command::NotifyInsert).await;
    }

    pub async fn cancel_job(&self, job_id: i64) {
        let _ = self.tx.send(Command::CancelJob(job_id)).await;
    }

    pub async fn check(&self) -> Option<ProducerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Check(reply)).await.ok()?;
        rx.await.ok()
    }

    /// §4.2 graceful shutdown: pauses the queue, signals every running
    /// executor to cancel, and waits up to `grace_period` for them to drain.
    /// Returns the ids still running past the grace period — orphans the
    /// caller should report via telemetry and leave for the Lifeline.
    pub async fn shutdown(&self, grace_period: Duration) -> Vec<i64> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { grace_period, reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Cheap local reads, no round trip to the producer task.
    pub fn limit_hint(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn paused_hint(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }
}

struct RunningEntry {
    cancel: CancellationSource,
}

/// Due rows staged per tick when a producer falls back to local mode (§4.4):
/// small relative to the global Stager's batch, since every affected
/// producer in the cluster may be doing this at once while pub/sub is down.
const LOCAL_STAGE_LIMIT: i64 = 256;

pub struct Producer {
    queue: String,
    node: String,
    producer_id: uuid::Uuid,
    limit: Arc<AtomicUsize>,
    paused: Arc<AtomicBool>,
    engine: Arc<dyn Engine>,
    notifier: Arc<dyn Notifier>,
    registry: WorkerRegistry,
    stage_interval: Duration,
    commands: mpsc::Receiver<Command>,
    running: HashMap<i64, RunningEntry>,
}

/// Spawns a producer task for `queue` and returns a handle to it.
pub fn spawn(
    config: &crate::config::QueueConfig,
    engine: Arc<dyn Engine>,
    notifier: Arc<dyn Notifier>,
    registry: WorkerRegistry,
    node: String,
) -> ProducerHandle {
    let (tx, rx) = mpsc::channel(256);
    let limit = Arc::new(AtomicUsize::new(config.limit));
    let paused = Arc::new(AtomicBool::new(false));

    let producer = Producer {
        queue: config.queue.clone(),
        node,
        producer_id: uuid::Uuid::new_v4(),
        limit: limit.clone(),
        paused: paused.clone(),
        engine,
        notifier,
        registry,
        stage_interval: config.stage_interval,
        commands: rx,
        running: HashMap::new(),
    };

    tokio::spawn(producer.run());

    ProducerHandle { tx, limit, paused }
}

impl Producer {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.stage_interval);
        let mut in_flight: FuturesUnordered<JoinHandle<i64>> = FuturesUnordered::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // §4.4 local mode: when pub/sub is unreachable, nothing
                    // promotes our due `scheduled`/`retryable` rows on our
                    // behalf, so poll for them directly.
                    if !self.notifier.is_reachable() {
                        if let Err(error) = self.engine.stage(LOCAL_STAGE_LIMIT).await {
                            tracing::warn!(%error, queue = %self.queue, "local-mode stage failed");
                        }
                    }
                    self.try_fetch(&mut in_flight).await;
                }
                Some(cmd) = self.commands.recv() => {
                    if self.handle_command(cmd, &mut in_flight).await {
                        return;
                    }
                }
                Some(finished) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Ok(job_id) = finished {
                        self.running.remove(&job_id);
                    }
                    self.try_fetch(&mut in_flight).await;
                }
            }
        }
    }

    /// Returns `true` if the producer should stop running (shutdown completed).
    async fn handle_command(&mut self, cmd: Command, in_flight: &mut FuturesUnordered<JoinHandle<i64>>) -> bool {
        match cmd {
            Command::Pause => {
                self.paused.store(true, Ordering::Relaxed);
            }
            Command::Resume => {
                self.paused.store(false, Ordering::Relaxed);
                self.try_fetch(in_flight).await;
            }
            Command::Scale(new_limit) => {
                self.limit.store(new_limit, Ordering::Relaxed);
                self.try_fetch(in_flight).await;
            }
            Command::Check(reply) => {
                let _ = reply.send(ProducerSnapshot {
                    queue: self.queue.clone(),
                    limit: self.limit.load(Ordering::Relaxed),
                    paused: self.paused.load(Ordering::Relaxed),
                    running: self.running.len(),
                });
            }
            Command::NotifyInsert => {
                self.try_fetch(in_flight).await;
            }
            Command::CancelJob(job_id) => {
                if let Some(entry) = self.running.get(&job_id) {
                    entry.cancel.cancel();
                }
            }
            Command::Shutdown { grace_period, reply } => {
                self.paused.store(true, Ordering::Relaxed);
                for entry in self.running.values() {
                    entry.cancel.cancel();
                }
                let deadline = tokio::time::sleep(grace_period);
                tokio::pin!(deadline);
                loop {
                    if self.running.is_empty() {
                        break;
                    }
                    tokio::select! {
                        _ = &mut deadline => break,
                        Some(finished) = in_flight.next(), if !in_flight.is_empty() => {
                            if let Ok(job_id) = finished {
                                self.running.remove(&job_id);
                            }
                        }
                    }
                }
                let orphans: Vec<i64> = self.running.keys().copied().collect();
                if !orphans.is_empty() {
                    tracing::warn!(queue = %self.queue, orphans = ?orphans, "shutdown grace period expired with jobs still running");
                }
                let _ = reply.send(orphans);
                return true;
            }
        }
        false
    }

    async fn try_fetch(&mut self, in_flight: &mut FuturesUnordered<JoinHandle<i64>>) {
        if self.paused.load(Ordering::Relaxed) {
            return;
        }
        let limit = self.limit.load(Ordering::Relaxed);
        if self.running.len() >= limit {
            return;
        }
        let demand = (limit - self.running.len()) as i64;
        let claimant = Claimant {
            node: self.node.clone(),
            producer: self.producer_id,
        };
        let claimed = match self.engine.fetch(&self.queue, demand, &claimant).await {
            Ok(jobs) => jobs,
            Err(error) => {
                tracing::warn!(%error, queue = %self.queue, "fetch failed");
                return;
            }
        };

        for job in claimed {
            let (cancel_source, cancel_token) = cancellation_pair();
            self.running.insert(job.id, RunningEntry { cancel: cancel_source });
            let handle = tokio::spawn(executor::execute(
                self.engine.clone(),
                self.registry.clone(),
                job,
                cancel_token,
            ));
            in_flight.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::registry::WorkerRegistryBuilder;
    use ferry_core::engine::NewJob;
    use ferry_core::JobState;
    use ferry_testing::{InMemoryJobStore, InMemoryNotifier};
    use std::time::Duration as StdDuration;

    /// §4.4 local mode: a scheduled job due in the near future should still
    /// get promoted to `available` by the producer's own stage call once the
    /// notifier reports unreachable, even though no global Stager is running.
    #[tokio::test]
    async fn local_mode_stages_its_own_due_jobs_when_notifier_unreachable() {
        let store = Arc::new(InMemoryJobStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        notifier.set_reachable(false);

        let inserted = store
            .insert(
                NewJob::new("reports", "generate_report", serde_json::json!({}))
                    .with_scheduled_at(chrono::Utc::now() + chrono::Duration::milliseconds(20)),
            )
            .await
            .unwrap();
        assert_eq!(inserted.job.state, JobState::Scheduled);

        let config = QueueConfig::new("reports", 1).with_stage_interval(StdDuration::from_millis(30));
        let _handle = spawn(
            &config,
            store.clone(),
            notifier.clone(),
            WorkerRegistryBuilder::new().build(),
            "test-node".to_string(),
        );

        tokio::time::sleep(StdDuration::from_millis(150)).await;

        let job = store.get(inserted.job.id).expect("job still present");
        assert_ne!(job.state, JobState::Scheduled);
    }
}
