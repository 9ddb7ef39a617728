//! An in-process `Engine` implementation. Exercises the same state machine
//! as `ferry-postgres::PgEngine` against a plain `HashMap` instead of a
//! database, so producer/executor/stager logic can be unit-tested without a
//! live Postgres (§6.4's "manual" testing mode leans on exactly this).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ferry_core::engine::{Claimant, ClaimedJob, InsertedJob, NewJob, StagedJob};
use ferry_core::job::{normalize_tags, Attempt, ErrorEntry};
use ferry_core::uniqueness::{fingerprint, ReplaceField, UniqueField, UniquePeriod, UniqueTimestamp};
use ferry_core::{Engine, Error, Job, JobState, Result};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    jobs: HashMap<i64, Job>,
    next_id: i64,
}

pub struct InMemoryJobStore {
    state: Mutex<State>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Test helper: snapshot every job currently held, in id order.
    pub fn all_jobs(&self) -> Vec<Job> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub fn get(&self, id: i64) -> Option<Job> {
        self.state.lock().unwrap().jobs.get(&id).cloned()
    }
}

fn append_error(job: &mut Job, error: &str) {
    job.errors.push(ErrorEntry {
        attempt: job.attempt,
        at: Utc::now(),
        error: error.to_string(),
    });
}

#[async_trait]
impl Engine for InMemoryJobStore {
    async fn get(&self, job_id: i64) -> Result<Option<Job>> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn fetch(&self, queue: &str, demand: i64, claimant: &Claimant) -> Result<Vec<ClaimedJob>> {
        if demand <= 0 {
            return Ok(Vec::new());
        }
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut candidates: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.state == JobState::Available && j.attempt < j.max_attempts && j.scheduled_at <= now)
            .map(|j| j.id)
            .collect();
        candidates.sort_by_key(|id| {
            let job = &state.jobs[id];
            (job.priority, job.scheduled_at, job.id)
        });
        candidates.truncate(demand as usize);

        let mut out = Vec::with_capacity(candidates.len());
        for id in candidates {
            let job = state.jobs.get_mut(&id).unwrap();
            job.state = JobState::Executing;
            job.attempted_at = Some(now);
            job.attempt += 1;
            job.attempted_by.push(Attempt {
                node: claimant.node.clone(),
                producer: claimant.producer,
            });
            out.push(job.clone());
        }
        Ok(out)
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.state = JobState::Completed;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn discard(&self, job_id: i64, error: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            append_error(job, error);
            job.state = JobState::Discarded;
            job.discarded_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn error(&self, job_id: i64, error: &str, retry_delay: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            append_error(job, error);
            job.state = JobState::Retryable;
            job.scheduled_at = Utc::now() + retry_delay;
        }
        Ok(())
    }

    async fn snooze(&self, job_id: i64, delay: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.state = JobState::Scheduled;
            job.scheduled_at = Utc::now() + delay;
            job.max_attempts += 1;
        }
        Ok(())
    }

    async fn cancel(&self, job_id: i64, reason: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            if !job.state.is_terminal() {
                if let Some(reason) = reason {
                    append_error(job, reason);
                }
                job.state = JobState::Cancelled;
                job.cancelled_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn retry(&self, job_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            if !matches!(job.state, JobState::Available | JobState::Executing) {
                job.state = JobState::Available;
                job.scheduled_at = Utc::now();
                job.completed_at = None;
                job.cancelled_at = None;
                job.discarded_at = None;
                job.max_attempts = job.max_attempts.max(job.attempt + 1);
            }
        }
        Ok(())
    }

    async fn stage(&self, limit: i64) -> Result<Vec<StagedJob>> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut due: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Scheduled | JobState::Retryable) && j.scheduled_at <= now)
            .map(|j| j.id)
            .collect();
        due.sort_unstable();
        due.truncate(limit as usize);

        let mut out = Vec::with_capacity(due.len());
        for id in due {
            let job = state.jobs.get_mut(&id).unwrap();
            job.state = JobState::Available;
            out.push(StagedJob {
                id: job.id,
                queue: job.queue.clone(),
                state: job.state,
            });
        }
        Ok(out)
    }

    async fn prune(&self, max_age: Duration, limit: i64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let cutoff = Utc::now() - max_age;
        let mut to_delete: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| is_prunable(j, cutoff))
            .map(|j| j.id)
            .collect();
        to_delete.truncate(limit as usize);
        for id in &to_delete {
            state.jobs.remove(id);
        }
        Ok(to_delete.len() as u64)
    }

    async fn rescue(&self, stuck_threshold: Duration) -> Result<Vec<i64>> {
        let mut state = self.state.lock().unwrap();
        let cutoff = Utc::now() - stuck_threshold;
        let stuck: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Executing && j.attempted_at.map(|at| at < cutoff).unwrap_or(false))
            .map(|j| j.id)
            .collect();
        for id in &stuck {
            let job = state.jobs.get_mut(id).unwrap();
            if job.attempt < job.max_attempts {
                job.state = JobState::Available;
            } else {
                job.state = JobState::Discarded;
                job.discarded_at = Some(Utc::now());
            }
        }
        Ok(stuck)
    }

    async fn insert(&self, change: NewJob) -> Result<InsertedJob> {
        let mut state = self.state.lock().unwrap();
        insert_locked(&mut state, change)
    }

    async fn insert_all(&self, changes: Vec<NewJob>) -> Result<Vec<InsertedJob>> {
        let mut state = self.state.lock().unwrap();
        changes.into_iter().map(|c| insert_locked(&mut state, c)).collect()
    }

    async fn cancel_all(&self, queue: Option<&str>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut count = 0;
        for job in state.jobs.values_mut() {
            if queue.map(|q| q == job.queue).unwrap_or(true) && !job.state.is_terminal() {
                job.state = JobState::Cancelled;
                job.cancelled_at = Some(Utc::now());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn retry_all(&self, queue: Option<&str>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut count = 0;
        for job in state.jobs.values_mut() {
            let matches_queue = queue.map(|q| q == job.queue).unwrap_or(true);
            if matches_queue && !matches!(job.state, JobState::Available | JobState::Executing) {
                job.state = JobState::Available;
                job.scheduled_at = Utc::now();
                job.completed_at = None;
                job.cancelled_at = None;
                job.discarded_at = None;
                job.max_attempts = job.max_attempts.max(job.attempt + 1);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete(&self, job_id: i64) -> Result<()> {
        self.state.lock().unwrap().jobs.remove(&job_id);
        Ok(())
    }

    async fn delete_all(&self, queue: Option<&str>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.jobs.len();
        state.jobs.retain(|_, j| queue.map(|q| q != j.queue).unwrap_or(false));
        Ok((before - state.jobs.len()) as u64)
    }
}

fn is_prunable(job: &Job, cutoff: DateTime<Utc>) -> bool {
    match job.state {
        JobState::Completed => job.completed_at.map(|at| at < cutoff).unwrap_or(false),
        JobState::Cancelled => job.cancelled_at.map(|at| at < cutoff).unwrap_or(false),
        JobState::Discarded => job.discarded_at.map(|at| at < cutoff).unwrap_or(false),
        _ => false,
    }
}

/// §4.1.7 step 3 — overwrites the requested subset of fields on a job that
/// matched a conflicting insert's fingerprint.
fn apply_replace(job: &mut Job, fields: &[ReplaceField], change: &NewJob) {
    for field in fields {
        match field {
            ReplaceField::Args => job.args = change.args.clone(),
            ReplaceField::Meta => job.meta = change.meta.clone(),
            ReplaceField::Tags => job.tags = normalize_tags(change.tags.clone()),
            ReplaceField::Priority => job.priority = change.priority,
            ReplaceField::MaxAttempts => job.max_attempts = change.max_attempts,
            ReplaceField::ScheduledAt => job.scheduled_at = change.scheduled_at.unwrap_or_else(Utc::now),
        }
    }
}

fn insert_locked(state: &mut State, change: NewJob) -> Result<InsertedJob> {
    if change.queue.is_empty() {
        return Err(Error::Validation("queue must not be empty".into()));
    }

    if let Some(opts) = &change.unique {
        let target_fp = fingerprint(opts, &change.queue, &change.worker, &change.args, &change.meta);
        let cutoff = match opts.period {
            UniquePeriod::Infinity => None,
            UniquePeriod::Seconds(secs) => Some(Utc::now() - Duration::seconds(secs)),
        };
        let mut matched_id = None;
        for job in state.jobs.values() {
            if !opts.states.contains(&job.state) {
                continue;
            }
            if opts.fields.contains(&UniqueField::Worker) && job.worker != change.worker {
                continue;
            }
            if opts.fields.contains(&UniqueField::Queue) && job.queue != change.queue {
                continue;
            }
            let ts = match opts.timestamp {
                UniqueTimestamp::InsertedAt => job.inserted_at,
                UniqueTimestamp::ScheduledAt => job.scheduled_at,
            };
            if let Some(cutoff) = cutoff {
                if ts < cutoff {
                    continue;
                }
            }
            let candidate_fp = fingerprint(opts, &job.queue, &job.worker, &job.args, &job.meta);
            if candidate_fp == target_fp {
                matched_id = Some(job.id);
                break;
            }
        }

        if let Some(id) = matched_id {
            if !opts.replace.is_empty() {
                let job = state.jobs.get_mut(&id).unwrap();
                apply_replace(job, &opts.replace, &change);
            }
            return Ok(InsertedJob {
                job: state.jobs[&id].clone(),
                conflict: true,
            });
        }
    }

    state.next_id += 1;
    let id = state.next_id;
    let now = Utc::now();
    let scheduled_at = change.scheduled_at.unwrap_or(now);
    let job = Job {
        id,
        state: if scheduled_at > now { JobState::Scheduled } else { JobState::Available },
        queue: change.queue,
        worker: change.worker,
        args: change.args,
        meta: change.meta,
        tags: normalize_tags(change.tags),
        priority: change.priority,
        attempt: 0,
        max_attempts: change.max_attempts,
        attempted_by: Vec::new(),
        errors: Vec::new(),
        inserted_at: now,
        scheduled_at,
        attempted_at: None,
        completed_at: None,
        cancelled_at: None,
        discarded_at: None,
    };
    state.jobs.insert(id, job.clone());
    Ok(InsertedJob { job, conflict: false })
}
