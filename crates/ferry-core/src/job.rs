//! The `Job` row and the state machine that governs its transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the seven states a job can occupy. Transitions between them are
/// enforced entirely by the SQL in `ferry-postgres` — this enum exists so
/// in-process code (producers, executors, tests) can reason about a job
/// without round-tripping through the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Available,
    Executing,
    Retryable,
    Completed,
    Cancelled,
    Discarded,
}

impl JobState {
    /// `true` for the three states that never transition again (short of an
    /// explicit `retry`, which is an operator escape hatch, not a normal edge).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Discarded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Available => "available",
            Self::Executing => "executing",
            Self::Retryable => "retryable",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Discarded => "discarded",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "scheduled" => Self::Scheduled,
            "available" => Self::Available,
            "executing" => Self::Executing,
            "retryable" => Self::Retryable,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "discarded" => Self::Discarded,
            other => {
                return Err(crate::Error::Validation(format!(
                    "unrecognized job state {other:?}"
                )))
            }
        })
    }
}

/// Who attempted a job: a (node, producer) pair, appended to on every fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub node: String,
    pub producer: uuid::Uuid,
}

/// One recorded failure, appended on every `error`/`discard`/`cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub attempt: i32,
    pub at: DateTime<Utc>,
    pub error: String,
}

/// A fully-hydrated job row, as returned by every `Engine` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub state: JobState,
    pub queue: String,
    pub worker: String,
    pub args: serde_json::Value,
    pub meta: serde_json::Value,
    pub tags: Vec<String>,
    pub priority: i16,
    pub attempt: i32,
    pub max_attempts: i32,
    pub attempted_by: Vec<Attempt>,
    pub errors: Vec<ErrorEntry>,
    pub inserted_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub discarded_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Checks the invariants from §3.2 that can be verified from the row
    /// alone (without consulting the rest of the table). Used by tests and,
    /// in debug builds, by the engine after each write.
    pub fn check_invariants(&self) -> Result<(), crate::Error> {
        let terminal_count = [
            self.completed_at.is_some(),
            self.cancelled_at.is_some(),
            self.discarded_at.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        let expect_terminal = self.state.is_terminal();
        if expect_terminal && terminal_count != 1 {
            return Err(crate::Error::Validation(format!(
                "job {} is in terminal state {} but has {} terminal timestamps set",
                self.id, self.state, terminal_count
            )));
        }
        if !expect_terminal && terminal_count != 0 {
            return Err(crate::Error::Validation(format!(
                "job {} is in non-terminal state {} but has a terminal timestamp set",
                self.id, self.state
            )));
        }
        if self.attempted_at.is_some() != (self.attempt > 0) {
            return Err(crate::Error::Validation(format!(
                "job {} has attempt={} but attempted_at={:?}",
                self.id, self.attempt, self.attempted_at
            )));
        }
        if self.attempt > self.max_attempts {
            return Err(crate::Error::Validation(format!(
                "job {} has attempt {} exceeding max_attempts {}",
                self.id, self.attempt, self.max_attempts
            )));
        }
        Ok(())
    }
}

/// Normalizes a tag list: trims, drops empties, lowercases, dedups while
/// preserving first-seen order. Mirrors the "deduplicated and normalized"
/// requirement in §3.1.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(tags.len());
    for tag in tags {
        let trimmed = tag.trim().to_lowercase();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.clone()) {
            out.push(trimmed);
        }
    }
    out
}

/// Re-encodes a JSON value through a string-keyed round trip so that
/// callers (including the inline testing path) always see the same shape
/// a database round-trip would have produced — string keys, no unit enums.
pub fn normalize_json(value: serde_json::Value) -> Result<serde_json::Value, crate::Error> {
    let encoded = serde_json::to_vec(&value).map_err(|e| crate::Error::Validation(e.to_string()))?;
    serde_json::from_slice(&encoded).map_err(|e| crate::Error::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_tags() {
        let tags = vec![
            " Urgent ".to_string(),
            "urgent".to_string(),
            "".to_string(),
            "Billing".to_string(),
        ];
        assert_eq!(normalize_tags(tags), vec!["urgent", "billing"]);
    }

    #[test]
    fn terminal_invariant_rejects_mismatch() {
        let mut job = sample_job();
        job.state = JobState::Completed;
        job.completed_at = None;
        assert!(job.check_invariants().is_err());
    }

    #[test]
    fn terminal_invariant_accepts_match() {
        let mut job = sample_job();
        job.state = JobState::Completed;
        job.completed_at = Some(Utc::now());
        assert!(job.check_invariants().is_ok());
    }

    fn sample_job() -> Job {
        Job {
            id: 1,
            state: JobState::Available,
            queue: "default".into(),
            worker: "noop".into(),
            args: serde_json::json!({}),
            meta: serde_json::json!({}),
            tags: vec![],
            priority: 0,
            attempt: 0,
            max_attempts: 3,
            attempted_by: vec![],
            errors: vec![],
            inserted_at: Utc::now(),
            scheduled_at: Utc::now(),
            attempted_at: None,
            completed_at: None,
            cancelled_at: None,
            discarded_at: None,
        }
    }
}
