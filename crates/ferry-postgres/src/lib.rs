//! # ferry-postgres
//!
//! PostgreSQL implementation of the Ferry job queue storage contract
//! (`ferry_core::Engine`, `Notifier`, `Peer`).
//!
//! ## Features
//!
//! - `FOR UPDATE SKIP LOCKED` fetch behind a CTE fence, so contended rows
//!   are skipped rather than blocking a producer (§4.1.1).
//! - Transaction-scoped advisory locks for uniqueness enforcement (§4.7).
//! - `LISTEN`/`NOTIFY` pub/sub with gzip+base64 payload compression above
//!   1 KiB, working around Postgres' 8 KiB `NOTIFY` payload ceiling (§4.5).
//! - A leased row (not an advisory lock) for leader election, so leadership
//!   survives connection-pool churn (§4.6).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ferry_postgres::{schema, PgEngine, PgNotifier, PgPeer};
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/ferry").await?;
//! schema::migrate(&pool).await?;
//!
//! let engine = PgEngine::new(pool.clone());
//! let notifier = PgNotifier::connect(pool.clone(), "default").await?;
//! let peer = PgPeer::new(pool);
//! ```

mod engine;
mod notifier;
mod peer;
mod rows;
pub mod schema;
mod uniqueness;

pub use engine::PgEngine;
pub use notifier::PgNotifier;
pub use peer::PgPeer;
