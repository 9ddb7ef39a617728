//! An hourly report job driven entirely by Ferry's cron table — no
//! `insert` call in application code, `ferry-runtime` inserts one job per
//! occurrence on its own.

use async_trait::async_trait;
use ferry_core::{Engine, Outcome, Peer, Worker};
use ferry_runtime::{CronEntry, Instance, InstanceConfig, QueueConfig, WorkerRegistryBuilder};
use std::sync::Arc;
use std::time::Duration;

struct GenerateReport;

#[async_trait]
impl Worker for GenerateReport {
    async fn perform(&self, _args: serde_json::Value, _meta: serde_json::Value) -> Outcome {
        tracing::info!("generating hourly report");
        Outcome::Ok
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
    let notifier = ferry_postgres::PgNotifier::connect(pool.clone(), "reports_cron_demo").await?;
    let notifications = notifier.subscribe();

    let registry = WorkerRegistryBuilder::new()
        .register("generate_report", Arc::new(GenerateReport))
        .build();

    let config = InstanceConfig::new("reports_cron_demo")
        .with_queues(vec![QueueConfig::new("reports", 1)])
        .with_cron(vec![CronEntry::new("@hourly", "reports", "generate_report")]);

    let instance = Instance::start(config, engine, notifier, Some(notifications), peer, registry).await?;

    tokio::signal::ctrl_c().await?;
    instance.shutdown().await;

    Ok(())
}
