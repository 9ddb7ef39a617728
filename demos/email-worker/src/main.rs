//! A minimal Ferry consumer: one worker sending emails off a single queue.
//!
//! Run against a scratch database with `DATABASE_URL` set; `ferry_postgres`
//! owns the schema, so nothing needs to be migrated by hand first.

use async_trait::async_trait;
use ferry_core::{Engine, NewJob, Outcome, Peer, Worker};
use ferry_runtime::{Instance, InstanceConfig, QueueConfig, WorkerRegistryBuilder};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct SendEmailArgs {
    to: String,
    subject: String,
}

struct SendEmail;

#[async_trait]
impl Worker for SendEmail {
    async fn perform(&self, args: serde_json::Value, _meta: serde_json::Value) -> Outcome {
        let args: SendEmailArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(error) => return Outcome::Discard(format!("malformed args: {error}")),
        };

        tracing::info!(to = %args.to, subject = %args.subject, "sending email");
        // A real worker would call out to an email provider here. Transient
        // failures return `Outcome::error(..)` so the job retries with
        // backoff instead of being discarded.
        Outcome::Ok
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = sqlx::PgPool::connect(&database_url).await?;
    ferry_postgres::schema::migrate(&pool).await?;

    let engine: Arc<dyn Engine> = Arc::new(ferry_postgres::PgEngine::new(pool.clone()));
    let peer: Arc<dyn Peer> = Arc::new(ferry_postgres::PgPeer::new(pool.clone()));
    let notifier = ferry_postgres::PgNotifier::connect(pool.clone(), "email_worker_demo").await?;
    let notifications = notifier.subscribe();

    let registry = WorkerRegistryBuilder::new().register("send_email", Arc::new(SendEmail)).build();

    let config = InstanceConfig::new("email_worker_demo").with_queues(vec![QueueConfig::new("emails", 10)]);

    let instance = Instance::start(config, engine, notifier, Some(notifications), peer, registry).await?;

    instance
        .insert(
            NewJob::new(
                "emails",
                "send_email",
                serde_json::json!({ "to": "ada@example.com", "subject": "welcome" }),
            )
            .with_priority(0)
            .with_max_attempts(5),
        )
        .await?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    let orphans = instance.shutdown().await;
    if !orphans.is_empty() {
        tracing::warn!(?orphans, "jobs still running at shutdown");
    }

    Ok(())
}
