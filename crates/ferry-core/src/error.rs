//! Error kinds shared across every Ferry crate.
//!
//! Per-job failures (user code raising, timeouts, unknown workers) never
//! surface here — they are recorded on the job row and classified by the
//! executor (`ferry-runtime`). This enum is for failures the *caller* of an
//! API needs to react to: bad input, or a database that refused the query.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("no worker registered for {0:?}")]
    UnknownWorker(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("operation timed out")]
    Timeout,

    #[error("cancelled during shutdown: {0}")]
    ShutdownCancel(String),
}

pub type Result<T> = std::result::Result<T, Error>;
