//! §9 — the result variant user worker code returns, replacing
//! exception-based control flow: `{ok | error | discard | cancel | snooze}`.

use std::fmt;

/// What a worker's `perform` call returned (or was classified as, for a
/// timeout/panic). `ferry-runtime::Executor` maps this to an `Engine` call.
pub enum Outcome {
    Ok,
    Error(anyhow::Error),
    Discard(String),
    Cancel(String),
    /// Seconds to push `scheduled_at` out by; `0` reschedules immediately.
    Snooze(u64),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok => write!(f, "Ok"),
            Outcome::Error(e) => write!(f, "Error({e})"),
            Outcome::Discard(reason) => write!(f, "Discard({reason})"),
            Outcome::Cancel(reason) => write!(f, "Cancel({reason})"),
            Outcome::Snooze(secs) => write!(f, "Snooze({secs})"),
        }
    }
}

impl Outcome {
    pub fn error(err: impl Into<anyhow::Error>) -> Self {
        Outcome::Error(err.into())
    }
}

/// A worker's business logic. Implemented by user code, looked up by
/// `worker` key at fetch time (§4.3 step 1).
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    async fn perform(&self, args: serde_json::Value, meta: serde_json::Value) -> Outcome;

    /// Execution timeout; `None` means no timeout is enforced.
    fn timeout(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(30))
    }

    /// Backoff to apply after an `Error` outcome, given the 1-based attempt
    /// number that just ran. Defaults to the shared exponential-with-jitter
    /// policy; workers needing custom pacing override this.
    fn backoff(&self, attempt: i32) -> chrono::Duration {
        crate::backoff::exponential_with_jitter(attempt)
    }
}
