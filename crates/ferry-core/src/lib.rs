//! # ferry-core
//!
//! The data model and storage contract for Ferry, a durable, transactional
//! job queue. This crate has no database driver dependency of its own — it
//! defines the `Job` row, the state machine that governs it, and the traits
//! (`Engine`, `Notifier`, `Peer`) that a concrete backend implements.
//!
//! `ferry-postgres` is the reference implementation of all three traits.
//! `ferry-runtime` composes them into producers, executors, and the other
//! background tasks that actually move jobs through their lifecycle.
//!
//! ## Job lifecycle
//!
//! ```text
//! scheduled ──► available ──► executing ──┬──► completed
//!                  ▲                      ├──► discarded
//!                  │                      ├──► cancelled
//!                  └────── retryable ◄────┘
//! ```
//!
//! Any non-terminal state can transition to `cancelled`. Terminal states
//! only leave via the explicit `retry` operator escape hatch.

pub mod backoff;
pub mod engine;
pub mod error;
pub mod job;
pub mod notifier;
pub mod outcome;
pub mod peer;
pub mod uniqueness;

pub use engine::{Claimant, ClaimedJob, Engine, InsertedJob, NewJob, StagedJob};
pub use error::{Error, Result};
pub use job::{normalize_json, normalize_tags, Attempt, ErrorEntry, Job, JobState};
pub use notifier::{notify, Channel, Notifier, Notification};
pub use outcome::{Outcome, Worker};
pub use peer::Peer;
pub use uniqueness::{ReplaceField, UniqueField, UniqueOpts, UniquePeriod, UniqueTimestamp};
