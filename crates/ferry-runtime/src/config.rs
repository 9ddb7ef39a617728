//! Per-component configuration. One struct per component, builder-style,
//! matching the teacher's `RuntimeBuilder`/`EngineBuilder` pattern — callers
//! construct a config with defaults, then override only what they need.

use std::time::Duration;

/// §6.4 — how `insert` behaves with respect to the async pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestingMode {
    /// Normal operation: insert writes a row, producers fetch and run it.
    #[default]
    Disabled,
    /// `insert` runs the worker synchronously in the caller and returns the
    /// terminal job; no producer is involved.
    Inline,
    /// Jobs are inserted but no producers run; a test drains queues itself
    /// via `ferry-testing`.
    Manual,
}

/// Configuration for a single queue's `Producer`.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue: String,
    pub limit: usize,
    pub stage_interval: Duration,
    pub shutdown_grace_period: Duration,
}

impl QueueConfig {
    pub fn new(queue: impl Into<String>, limit: usize) -> Self {
        Self {
            queue: queue.into(),
            limit,
            stage_interval: Duration::from_secs(1),
            shutdown_grace_period: Duration::from_secs(15),
        }
    }

    pub fn with_stage_interval(mut self, interval: Duration) -> Self {
        self.stage_interval = interval;
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }
}

/// One entry in the cron table (§4.8).
#[derive(Debug, Clone)]
pub struct CronEntry {
    pub expr: String,
    pub worker: String,
    pub queue: String,
    pub args: serde_json::Value,
}

impl CronEntry {
    pub fn new(expr: impl Into<String>, queue: impl Into<String>, worker: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            worker: worker.into(),
            queue: queue.into(),
            args: serde_json::json!({}),
        }
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }
}

/// Top-level configuration for an `Instance`.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub name: String,
    pub node: String,
    pub lease: chrono::Duration,
    pub stage_interval: Duration,
    pub prune_interval: Duration,
    pub prune_max_age: chrono::Duration,
    pub prune_limit: i64,
    pub lifeline_interval: Duration,
    pub stuck_threshold: chrono::Duration,
    pub cron: Vec<CronEntry>,
    pub testing_mode: TestingMode,
    pub queues: Vec<QueueConfig>,
}

impl InstanceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: format!("node-{}", uuid::Uuid::new_v4()),
            lease: ferry_core::peer::DEFAULT_LEASE,
            stage_interval: Duration::from_secs(1),
            prune_interval: Duration::from_secs(30),
            prune_max_age: chrono::Duration::seconds(60),
            prune_limit: 10_000,
            lifeline_interval: Duration::from_secs(60),
            stuck_threshold: chrono::Duration::minutes(60),
            cron: Vec::new(),
            testing_mode: TestingMode::Disabled,
            queues: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn with_testing_mode(mut self, mode: TestingMode) -> Self {
        self.testing_mode = mode;
        self
    }

    pub fn with_cron(mut self, entries: Vec<CronEntry>) -> Self {
        self.cron = entries;
        self
    }

    pub fn with_queues(mut self, queues: Vec<QueueConfig>) -> Self {
        self.queues = queues;
        self
    }
}
