//! # ferry-runtime
//!
//! Composes `ferry-core`'s traits and a concrete backend (`ferry-postgres`
//! in production, `ferry-testing`'s in-memory fakes in tests) into a running
//! system: one `Producer` per queue, an `Executor` per in-flight job, a
//! `Stager` promoting due rows, a `Pruner` and `Lifeline` running leader-only,
//! and a cron table. `Instance` is the facade application code holds onto.

mod cancellation;
mod config;
mod cron;
mod executor;
mod instance;
mod lifeline;
mod producer;
mod pruner;
mod registry;
mod stager;

pub use config::{CronEntry, InstanceConfig, QueueConfig, TestingMode};
pub use instance::Instance;
pub use producer::{ProducerHandle, ProducerSnapshot};
pub use registry::{WorkerRegistry, WorkerRegistryBuilder};

pub use ferry_core::{
    Attempt, Channel, Claimant, ClaimedJob, Engine, Error, ErrorEntry, InsertedJob, Job, JobState, NewJob, Notification,
    Notifier, Outcome, Peer, ReplaceField, Result, StagedJob, UniqueField, UniqueOpts, UniquePeriod, UniqueTimestamp, Worker,
};
