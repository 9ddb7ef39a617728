//! §4.10 — the public facade. Wires an `Engine`/`Notifier`/`Peer` triple and
//! a `WorkerRegistry` into the full background fleet (producers, stager,
//! pruner, lifeline, cron, leader refresh) and exposes the operator surface
//! the rest of the application calls into.

use crate::cancellation::cancellation_pair;
use crate::config::{InstanceConfig, TestingMode};
use crate::executor;
use crate::producer::{self, ProducerHandle, ProducerSnapshot};
use crate::registry::WorkerRegistry;
use crate::{cron, lifeline, pruner, stager};
use dashmap::DashMap;
use ferry_core::notifier::{decode_payload, notify, Channel, Notification};
use ferry_core::{Engine, Job, NewJob, Notifier, Peer, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// A running Ferry instance — the handle application code holds for the
/// lifetime of the process.
pub struct Instance {
    config: InstanceConfig,
    engine: Arc<dyn Engine>,
    notifier: Arc<dyn Notifier>,
    peer: Arc<dyn Peer>,
    registry: WorkerRegistry,
    queues: Arc<DashMap<String, ProducerHandle>>,
}

impl Instance {
    /// Starts every background task `config.testing_mode` calls for and
    /// returns the handle. `notifications` is the receiver half of the
    /// concrete notifier's broadcast channel (e.g. `PgNotifier::subscribe`),
    /// passed in separately because subscribing isn't part of the
    /// object-safe `Notifier` trait. Pass `None` when running without a live
    /// notifier (e.g. `ferry-testing`'s in-memory fakes).
    pub async fn start(
        config: InstanceConfig,
        engine: Arc<dyn Engine>,
        notifier: Arc<dyn Notifier>,
        notifications: Option<broadcast::Receiver<Notification>>,
        peer: Arc<dyn Peer>,
        registry: WorkerRegistry,
    ) -> Result<Self> {
        let queues: Arc<DashMap<String, ProducerHandle>> = Arc::new(DashMap::new());

        if config.testing_mode == TestingMode::Disabled {
            for queue_config in &config.queues {
                let handle = producer::spawn(
                    queue_config,
                    engine.clone(),
                    notifier.clone(),
                    registry.clone(),
                    config.node.clone(),
                );
                queues.insert(queue_config.queue.clone(), handle);
            }

            stager::spawn(engine.clone(), config.stage_interval, queues.clone(), peer.clone());
            spawn_leader_refresh(peer.clone(), config.name.clone(), config.node.clone(), config.lease);
            pruner::spawn(
                engine.clone(),
                config.prune_interval,
                config.prune_max_age,
                config.prune_limit,
                peer.clone(),
            );
            lifeline::spawn(engine.clone(), config.lifeline_interval, config.stuck_threshold, peer.clone());
            cron::spawn_all(config.cron.clone(), engine.clone(), peer.clone());

            notifier.listen(&[Channel::Insert, Channel::Signal, Channel::Leader]).await?;
            if let Some(notifications) = notifications {
                spawn_notification_listener(
                    notifications,
                    queues.clone(),
                    peer.clone(),
                    config.name.clone(),
                    config.node.clone(),
                    config.lease,
                );
            }
        }

        Ok(Self {
            config,
            engine,
            notifier,
            peer,
            registry,
            queues,
        })
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        self.engine.clone()
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.peer.is_leader()
    }

    /// §6.4 — behavior branches on `testing_mode`: `Disabled` inserts and
    /// wakes the relevant producer (locally and, via `NOTIFY`, every other
    /// node); `Manual` just inserts; `Inline` runs the worker synchronously
    /// and returns the terminal job.
    pub async fn insert(&self, job: NewJob) -> Result<Job> {
        let queue = job.queue.clone();
        let inserted = self.engine.insert(job).await?;

        match self.config.testing_mode {
            TestingMode::Disabled => {
                if let Some(producer) = self.queues.get(&queue) {
                    producer.notify_insert().await;
                }
                let payload = serde_json::json!({ "queue": queue });
                let _ = notify(self.notifier.as_ref(), Channel::Insert, &payload).await;
                Ok(inserted.job)
            }
            TestingMode::Manual => Ok(inserted.job),
            TestingMode::Inline => {
                if inserted.conflict {
                    return Ok(inserted.job);
                }
                self.run_inline(inserted.job).await
            }
        }
    }

    pub async fn insert_all(&self, jobs: Vec<NewJob>) -> Result<Vec<Job>> {
        let mut out = Vec::with_capacity(jobs.len());
        for job in jobs {
            out.push(self.insert(job).await?);
        }
        Ok(out)
    }

    async fn run_inline(&self, job: Job) -> Result<Job> {
        let job_id = job.id;
        // Kept alive for the duration of the call: if dropped immediately,
        // the watch channel closes and `cancelled()` resolves spuriously.
        let (_source, token) = cancellation_pair();
        executor::execute(self.engine.clone(), self.registry.clone(), job, token).await;
        match self.engine.get(job_id).await? {
            Some(job) => Ok(job),
            None => Err(ferry_core::Error::Database(format!("job {job_id} vanished after inline execution"))),
        }
    }

    pub async fn pause_queue(&self, queue: &str) {
        if let Some(producer) = self.queues.get(queue) {
            producer.pause().await;
        }
    }

    pub async fn resume_queue(&self, queue: &str) {
        if let Some(producer) = self.queues.get(queue) {
            producer.resume().await;
        }
    }

    pub async fn scale_queue(&self, queue: &str, limit: usize) {
        if let Some(producer) = self.queues.get(queue) {
            producer.scale(limit).await;
        }
    }

    pub async fn check_queue(&self, queue: &str) -> Option<ProducerSnapshot> {
        let producer = self.queues.get(queue)?;
        producer.check().await
    }

    /// Cancels a job wherever it is: if it's currently running, every
    /// producer is asked to cancel it (cheap — only the owner has an entry);
    /// the database row is cancelled either way.
    pub async fn cancel_job(&self, job_id: i64) -> Result<()> {
        for producer in self.queues.iter() {
            producer.cancel_job(job_id).await;
        }
        let payload = serde_json::json!({ "type": "cancel_job", "job_id": job_id });
        let _ = notify(self.notifier.as_ref(), Channel::Signal, &payload).await;
        self.engine.cancel(job_id, Some("cancelled by operator")).await
    }

    /// Cancels every non-terminal job, optionally filtered to one queue.
    /// `cancel_all` doesn't hand back which ids it touched, so running
    /// executors aren't individually signaled here — they'll notice their
    /// row is already `cancelled` the next time they try to ack.
    pub async fn cancel_all_jobs(&self, queue: Option<&str>) -> Result<u64> {
        self.engine.cancel_all(queue).await
    }

    /// Resurrects a job from any state back to `available`.
    pub async fn retry_job(&self, job_id: i64) -> Result<()> {
        self.engine.retry(job_id).await?;
        if let Some(queue) = self.job_queue(job_id).await {
            if let Some(producer) = self.queues.get(&queue) {
                producer.notify_insert().await;
            }
        }
        Ok(())
    }

    /// Resurrects every job matching a queue filter.
    pub async fn retry_all_jobs(&self, queue: Option<&str>) -> Result<u64> {
        let count = self.engine.retry_all(queue).await?;
        match queue {
            Some(queue) => {
                if let Some(producer) = self.queues.get(queue) {
                    producer.notify_insert().await;
                }
            }
            None => {
                for producer in self.queues.iter() {
                    producer.notify_insert().await;
                }
            }
        }
        Ok(count)
    }

    /// Hard-deletes a single job regardless of state.
    pub async fn delete_job(&self, job_id: i64) -> Result<()> {
        self.engine.delete(job_id).await
    }

    /// Hard-deletes every job matching a queue filter.
    pub async fn delete_all_jobs(&self, queue: Option<&str>) -> Result<u64> {
        self.engine.delete_all(queue).await
    }

    /// Snapshots of every configured queue's producer, in configuration order.
    pub async fn check_all_queues(&self) -> Vec<ProducerSnapshot> {
        let mut out = Vec::with_capacity(self.config.queues.len());
        for queue_config in &self.config.queues {
            if let Some(producer) = self.queues.get(&queue_config.queue) {
                if let Some(snapshot) = producer.check().await {
                    out.push(snapshot);
                }
            }
        }
        out
    }

    async fn job_queue(&self, job_id: i64) -> Option<String> {
        self.engine.get(job_id).await.ok().flatten().map(|job| job.queue)
    }

    /// §4.2 — asks every producer to stop claiming and wait up to its
    /// configured grace period, returning the ids still running past it.
    pub async fn shutdown(&self) -> Vec<i64> {
        let mut orphans = Vec::new();
        for entry in self.queues.iter() {
            let grace = self
                .config
                .queues
                .iter()
                .find(|q| q.queue.as_str() == entry.key().as_str())
                .map(|q| q.shutdown_grace_period)
                .unwrap_or(Duration::from_secs(15));
            orphans.extend(entry.value().shutdown(grace).await);
        }
        let _ = self.peer.relinquish(&self.config.name, &self.config.node).await;
        let payload = serde_json::json!({ "node": self.config.node });
        let _ = notify(self.notifier.as_ref(), Channel::Leader, &payload).await;
        orphans
    }
}

fn spawn_leader_refresh(peer: Arc<dyn Peer>, instance: String, node: String, lease: chrono::Duration) {
    tokio::spawn(async move {
        let refresh_interval = chrono::Duration::milliseconds(lease.num_milliseconds() / 3)
            .to_std()
            .unwrap_or(Duration::from_secs(10));
        let mut ticker = tokio::time::interval(refresh_interval);
        loop {
            ticker.tick().await;
            if let Err(error) = peer.claim_leadership(&instance, &node, lease).await {
                tracing::warn!(%error, "leadership claim failed");
            }
        }
    });
}

/// §6.2/§4.6 — the other half of the `Notifier` loop: wakes local producers
/// on `Insert`, forwards foreign-node cancellations on `Signal`, and reacts
/// to `Leader` relinquish broadcasts by competing for leadership immediately
/// rather than waiting out the lease's own refresh cadence.
fn spawn_notification_listener(
    mut rx: broadcast::Receiver<Notification>,
    queues: Arc<DashMap<String, ProducerHandle>>,
    peer: Arc<dyn Peer>,
    instance: String,
    node: String,
    lease: chrono::Duration,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => match notification.channel {
                    Channel::Insert => {
                        if let Ok(payload) = decode_payload::<serde_json::Value>(&notification.raw) {
                            if let Some(queue) = payload.get("queue").and_then(|v| v.as_str()) {
                                if let Some(producer) = queues.get(queue) {
                                    producer.notify_insert().await;
                                }
                            }
                        }
                    }
                    Channel::Signal => {
                        if let Ok(payload) = decode_payload::<serde_json::Value>(&notification.raw) {
                            if payload.get("type").and_then(|v| v.as_str()) == Some("cancel_job") {
                                if let Some(job_id) = payload.get("job_id").and_then(|v| v.as_i64()) {
                                    for producer in queues.iter() {
                                        producer.cancel_job(job_id).await;
                                    }
                                }
                            }
                        }
                    }
                    Channel::Leader => {
                        if let Err(error) = peer.claim_leadership(&instance, &node, lease).await {
                            tracing::warn!(%error, "leadership claim failed after relinquish broadcast");
                        }
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification listener lagged behind the broadcast channel");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
