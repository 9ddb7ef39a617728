//! The `Engine` trait: one method per SQL-level operation in §4.1.
//!
//! This is the trait `ferry-postgres::PgEngine` implements. A SQLite or
//! MySQL engine would implement the same trait; per §9's open question, they
//! would just implement `fetch` as "select then update by id" rather than
//! relying on the CTE fence Postgres gives us for free (see
//! `ferry-postgres::engine` for that fence).

use crate::job::Job;
use crate::uniqueness::UniqueOpts;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies the producer making a claim, recorded in `attempted_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claimant {
    pub node: String,
    pub producer: uuid::Uuid,
}

/// Input to `insert`/`insert_all`: everything a caller may specify about a
/// new job. Fields left `None`/empty fall back to engine-side defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub queue: String,
    pub worker: String,
    pub args: serde_json::Value,
    pub meta: serde_json::Value,
    pub tags: Vec<String>,
    pub priority: i16,
    pub max_attempts: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub unique: Option<UniqueOpts>,
}

impl NewJob {
    pub fn new(queue: impl Into<String>, worker: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            queue: queue.into(),
            worker: worker.into(),
            args,
            meta: serde_json::json!({}),
            tags: Vec::new(),
            priority: 0,
            max_attempts: 20,
            scheduled_at: None,
            unique: None,
        }
    }

    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_unique(mut self, unique: UniqueOpts) -> Self {
        self.unique = Some(unique);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = crate::job::normalize_tags(tags);
        self
    }
}

/// Result of an `insert`/`insert_all` call: the materialized row plus
/// whether it was an existing row matched by a uniqueness fingerprint.
#[derive(Debug, Clone)]
pub struct InsertedJob {
    pub job: Job,
    pub conflict: bool,
}

/// A row moved by `stage`, enough to drive queue notifications without a
/// second round trip.
#[derive(Debug, Clone)]
pub struct StagedJob {
    pub id: i64,
    pub queue: String,
    pub state: crate::job::JobState,
}

/// One job claimed by `fetch`, ready to execute.
pub type ClaimedJob = Job;

#[async_trait]
pub trait Engine: Send + Sync {
    /// Point lookup by id, used by the `Inline` testing mode to hand back
    /// the terminal job after running its worker synchronously.
    async fn get(&self, job_id: i64) -> Result<Option<Job>>;

    /// §4.1.1 — claim up to `demand` available rows for `queue`.
    async fn fetch(&self, queue: &str, demand: i64, claimant: &Claimant) -> Result<Vec<ClaimedJob>>;

    /// §4.1.2 — unconditional success ack.
    async fn complete(&self, job_id: i64) -> Result<()>;

    /// §4.1.2 — terminal failure, no further retries.
    async fn discard(&self, job_id: i64, error: &str) -> Result<()>;

    /// §4.1.2 — transient failure; reschedule after `retry_delay`.
    async fn error(&self, job_id: i64, error: &str, retry_delay: chrono::Duration) -> Result<()>;

    /// §4.1.2 — push back `scheduled_at` without consuming an attempt.
    async fn snooze(&self, job_id: i64, delay: chrono::Duration) -> Result<()>;

    /// §4.1.2 — cancel from any non-terminal state.
    async fn cancel(&self, job_id: i64, reason: Option<&str>) -> Result<()>;

    /// §4.1.3 — operator-invoked resurrection of a job in any state.
    async fn retry(&self, job_id: i64) -> Result<()>;

    /// §4.1.4 — move due `scheduled`/`retryable` rows to `available`.
    async fn stage(&self, limit: i64) -> Result<Vec<StagedJob>>;

    /// §4.1.5 — delete terminal rows older than `max_age`, per-state.
    async fn prune(&self, max_age: chrono::Duration, limit: i64) -> Result<u64>;

    /// §4.1.6 — rescue or discard jobs stuck in `executing`.
    async fn rescue(&self, stuck_threshold: chrono::Duration) -> Result<Vec<i64>>;

    /// §4.1.7 — insert a single job, applying uniqueness if configured.
    async fn insert(&self, change: NewJob) -> Result<InsertedJob>;

    /// §4.1.7 — insert a batch; uniqueness is still applied per-job.
    async fn insert_all(&self, changes: Vec<NewJob>) -> Result<Vec<InsertedJob>>;

    /// Operator surface: cancel every non-terminal job matching a queue
    /// filter. Returns the number affected.
    async fn cancel_all(&self, queue: Option<&str>) -> Result<u64>;

    /// Operator surface: retry every job matching a queue filter.
    async fn retry_all(&self, queue: Option<&str>) -> Result<u64>;

    /// Operator surface: hard-delete a single job regardless of state.
    async fn delete(&self, job_id: i64) -> Result<()>;

    /// Operator surface: hard-delete every job matching a queue filter.
    async fn delete_all(&self, queue: Option<&str>) -> Result<u64>;
}
