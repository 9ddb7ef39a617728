//! Integration tests against the SQL contract in §8. These require a real
//! Postgres reachable via `DATABASE_URL`; when it's unset, the tests skip
//! rather than fail so the workspace stays testable offline.

use chrono::{Duration, Utc};
use ferry_core::engine::{Claimant, NewJob};
use ferry_core::{Engine as _, JobState, UniqueOpts};
use ferry_postgres::{schema, PgEngine};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

macro_rules! skip_without_db {
    () => {
        match database_url() {
            Some(url) => url,
            None => {
                eprintln!("skipping: DATABASE_URL not set");
                return;
            }
        }
    };
}

async fn test_pool(url: &str) -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .expect("connect to test database");
    schema::migrate(&pool).await.expect("migrate schema");
    sqlx::query("TRUNCATE jobs, peers").execute(&pool).await.expect("truncate");
    pool
}

fn claimant(node: &str) -> Claimant {
    Claimant {
        node: node.to_string(),
        producer: uuid::Uuid::new_v4(),
    }
}

#[tokio::test]
async fn fetch_and_complete() {
    let url = skip_without_db!();
    let pool = test_pool(&url).await;
    let engine = PgEngine::new(pool);

    let inserted = engine
        .insert(NewJob::new("default", "noop", serde_json::json!({"n": 1})))
        .await
        .unwrap();
    assert_eq!(inserted.job.state, JobState::Available);

    let claimed = engine.fetch("default", 1, &claimant("node-a")).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].state, JobState::Executing);
    assert_eq!(claimed[0].attempt, 1);

    engine.complete(claimed[0].id).await.unwrap();
    let again = engine.fetch("default", 1, &claimant("node-a")).await.unwrap();
    assert!(again.is_empty(), "completed job must not be refetched");
}

#[tokio::test]
async fn fetch_never_exceeds_demand() {
    let url = skip_without_db!();
    let pool = test_pool(&url).await;
    let engine = PgEngine::new(pool);

    for i in 0..10 {
        engine
            .insert(NewJob::new("bulk", "noop", serde_json::json!({"i": i})))
            .await
            .unwrap();
    }

    let claimed = engine.fetch("bulk", 3, &claimant("node-a")).await.unwrap();
    assert_eq!(claimed.len(), 3, "fetch must not over-fetch beyond demand");
}

#[tokio::test]
async fn fetch_respects_priority_then_scheduled_then_id_order() {
    let url = skip_without_db!();
    let pool = test_pool(&url).await;
    let engine = PgEngine::new(pool);

    let low = engine
        .insert(NewJob::new("ordered", "noop", serde_json::json!({})).with_priority(5))
        .await
        .unwrap();
    let high = engine
        .insert(NewJob::new("ordered", "noop", serde_json::json!({})).with_priority(0))
        .await
        .unwrap();

    let claimed = engine.fetch("ordered", 2, &claimant("node-a")).await.unwrap();
    assert_eq!(claimed[0].id, high.job.id);
    assert_eq!(claimed[1].id, low.job.id);
}

#[tokio::test]
async fn error_then_discard_after_max_attempts() {
    let url = skip_without_db!();
    let pool = test_pool(&url).await;
    let engine = PgEngine::new(pool);

    let inserted = engine
        .insert(NewJob::new("flaky", "explode", serde_json::json!({})).with_max_attempts(2))
        .await
        .unwrap();
    let job_id = inserted.job.id;

    let claimed = engine.fetch("flaky", 1, &claimant("node-a")).await.unwrap();
    assert_eq!(claimed[0].attempt, 1);
    engine.error(job_id, "boom", Duration::seconds(0)).await.unwrap();

    // Staging moves the retryable row back to available once due.
    engine.stage(10).await.unwrap();

    let claimed_again = engine.fetch("flaky", 1, &claimant("node-a")).await.unwrap();
    assert_eq!(claimed_again[0].attempt, 2);
    engine.discard(job_id, "boom again").await.unwrap();

    let final_fetch = engine.fetch("flaky", 1, &claimant("node-a")).await.unwrap();
    assert!(final_fetch.is_empty());
}

#[tokio::test]
async fn snooze_does_not_consume_an_attempt() {
    let url = skip_without_db!();
    let pool = test_pool(&url).await;
    let engine = PgEngine::new(pool);

    let inserted = engine
        .insert(NewJob::new("snoozy", "noop", serde_json::json!({})))
        .await
        .unwrap();
    let claimed = engine.fetch("snoozy", 1, &claimant("node-a")).await.unwrap();
    let attempt_before = claimed[0].attempt;
    let max_before = claimed[0].max_attempts;

    engine.snooze(claimed[0].id, Duration::seconds(0)).await.unwrap();
    engine.stage(10).await.unwrap();

    let claimed_again = engine.fetch("snoozy", 1, &claimant("node-a")).await.unwrap();
    assert_eq!(claimed_again[0].attempt, attempt_before + 1, "re-fetch still increments attempt");
    assert_eq!(claimed_again[0].max_attempts, max_before + 1, "snooze must grow max_attempts by one");
    let _ = inserted;
}

#[tokio::test]
async fn cancel_running_job() {
    let url = skip_without_db!();
    let pool = test_pool(&url).await;
    let engine = PgEngine::new(pool);

    let inserted = engine
        .insert(NewJob::new("cancelme", "noop", serde_json::json!({})))
        .await
        .unwrap();
    let claimed = engine.fetch("cancelme", 1, &claimant("node-a")).await.unwrap();
    engine.cancel(claimed[0].id, Some("operator requested")).await.unwrap();

    let row = sqlx::query("SELECT state, cancelled_at FROM jobs WHERE id = $1")
        .bind(claimed[0].id)
        .fetch_one(engine.pool())
        .await
        .unwrap();
    let state: String = sqlx::Row::get(&row, "state");
    let cancelled_at: Option<chrono::DateTime<Utc>> = sqlx::Row::get(&row, "cancelled_at");
    assert_eq!(state, "cancelled");
    assert!(cancelled_at.is_some());
    let _ = inserted;
}

#[tokio::test]
async fn unique_conflict_returns_existing_job() {
    let url = skip_without_db!();
    let pool = test_pool(&url).await;
    let engine = PgEngine::new(pool);

    let unique = UniqueOpts {
        keys: vec!["id".to_string()],
        ..UniqueOpts::default()
    };

    let first = engine
        .insert(
            NewJob::new("uniq", "charge", serde_json::json!({"id": 1}))
                .with_unique(unique.clone()),
        )
        .await
        .unwrap();
    assert!(!first.conflict);

    let second = engine
        .insert(NewJob::new("uniq", "charge", serde_json::json!({"id": 1})).with_unique(unique))
        .await
        .unwrap();
    assert!(second.conflict);
    assert_eq!(second.job.id, first.job.id);
}

#[tokio::test]
async fn rescue_reclaims_stuck_jobs() {
    let url = skip_without_db!();
    let pool = test_pool(&url).await;
    let engine = PgEngine::new(pool.clone());

    let inserted = engine
        .insert(NewJob::new("stuck", "noop", serde_json::json!({})).with_max_attempts(5))
        .await
        .unwrap();
    engine.fetch("stuck", 1, &claimant("node-a")).await.unwrap();

    // Force the attempted_at back in time to simulate a crashed worker.
    sqlx::query("UPDATE jobs SET attempted_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(inserted.job.id)
        .execute(&pool)
        .await
        .unwrap();

    let rescued = engine.rescue(Duration::minutes(60)).await.unwrap();
    assert_eq!(rescued, vec![inserted.job.id]);

    let refetched = engine.fetch("stuck", 1, &claimant("node-b")).await.unwrap();
    assert_eq!(refetched[0].id, inserted.job.id);
}

#[tokio::test]
async fn prune_deletes_only_aged_terminal_rows() {
    let url = skip_without_db!();
    let pool = test_pool(&url).await;
    let engine = PgEngine::new(pool.clone());

    let inserted = engine
        .insert(NewJob::new("prune", "noop", serde_json::json!({})))
        .await
        .unwrap();
    let claimed = engine.fetch("prune", 1, &claimant("node-a")).await.unwrap();
    engine.complete(claimed[0].id).await.unwrap();

    sqlx::query("UPDATE jobs SET completed_at = NOW() - INTERVAL '2 days' WHERE id = $1")
        .bind(claimed[0].id)
        .execute(&pool)
        .await
        .unwrap();

    let deleted = engine.prune(Duration::days(1), 100).await.unwrap();
    assert_eq!(deleted, 1);

    let remaining = sqlx::query("SELECT COUNT(*) AS c FROM jobs WHERE id = $1")
        .bind(claimed[0].id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let count: i64 = sqlx::Row::get(&remaining, "c");
    assert_eq!(count, 0);
    let _ = inserted;
}
