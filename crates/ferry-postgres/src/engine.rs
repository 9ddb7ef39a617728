//! The Postgres engine: one method per operation in §4.1, each a single
//! atomic statement (or a CTE-fenced statement, per §4.1.1's anti-bug guard).

use crate::rows::{db_err, row_to_job};
use crate::uniqueness;
use async_trait::async_trait;
use chrono::Duration;
use ferry_core::engine::{Claimant, ClaimedJob, InsertedJob, NewJob, StagedJob};
use ferry_core::{JobState, Result};
use sqlx::{PgPool, Row};
use std::str::FromStr;

/// PostgreSQL-backed implementation of `ferry_core::Engine`.
#[derive(Clone)]
pub struct PgEngine {
    pool: PgPool,
}

impl PgEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ferry_core::Engine for PgEngine {
    async fn get(&self, job_id: i64) -> Result<Option<ferry_core::Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_job).transpose()
    }

    /// §4.1.1. The `claimable` CTE is the "optimization fence" the spec
    /// requires: without it Postgres is free to push the `LIMIT` past the
    /// join and the outer `UPDATE` could touch more than `demand` rows.
    async fn fetch(&self, queue: &str, demand: i64, claimant: &Claimant) -> Result<Vec<ClaimedJob>> {
        if demand <= 0 {
            return Ok(Vec::new());
        }
        let claim_entry = serde_json::json!([{ "node": claimant.node, "producer": claimant.producer }]);

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM jobs
                WHERE state = 'available'
                  AND queue = $1
                  AND attempt < max_attempts
                ORDER BY priority ASC, scheduled_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET state = 'executing',
                attempted_at = NOW(),
                attempt = attempt + 1,
                attempted_by = attempted_by || $3::jsonb
            WHERE id IN (SELECT id FROM claimable)
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(demand)
        .bind(claim_entry)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_job).collect()
    }

    /// §4.1.2 `complete` — unconditional on id.
    async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'completed', completed_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// §4.1.2 `discard`.
    async fn discard(&self, job_id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'discarded',
                discarded_at = NOW(),
                errors = errors || jsonb_build_array(
                    jsonb_build_object('attempt', attempt, 'at', NOW(), 'error', $2::text)
                )
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// §4.1.2 `error`.
    async fn error(&self, job_id: i64, error: &str, retry_delay: Duration) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'retryable',
                scheduled_at = NOW() + $3::interval,
                errors = errors || jsonb_build_array(
                    jsonb_build_object('attempt', attempt, 'at', NOW(), 'error', $2::text)
                )
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(interval_literal(retry_delay))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// §4.1.2 `snooze` — must not consume an attempt, so `max_attempts` grows
    /// by one rather than `attempt` being rolled back.
    async fn snooze(&self, job_id: i64, delay: Duration) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'scheduled',
                scheduled_at = NOW() + $2::interval,
                max_attempts = max_attempts + 1
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(interval_literal(delay))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// §4.1.2 `cancel` — permissible from any non-terminal state.
    async fn cancel(&self, job_id: i64, reason: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'cancelled',
                cancelled_at = NOW(),
                errors = CASE
                    WHEN $2::text IS NULL THEN errors
                    ELSE errors || jsonb_build_array(
                        jsonb_build_object('attempt', attempt, 'at', NOW(), 'error', $2::text)
                    )
                END
            WHERE id = $1
              AND state NOT IN ('cancelled', 'completed', 'discarded')
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// §4.1.3 `retry` — operator escape hatch, runs from any state.
    async fn retry(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'available',
                scheduled_at = NOW(),
                completed_at = NULL,
                cancelled_at = NULL,
                discarded_at = NULL,
                max_attempts = GREATEST(max_attempts, attempt + 1)
            WHERE id = $1
              AND state NOT IN ('available', 'executing')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// §4.1.4 `stage`.
    async fn stage(&self, limit: i64) -> Result<Vec<StagedJob>> {
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT id
                FROM jobs
                WHERE state IN ('scheduled', 'retryable')
                  AND scheduled_at <= NOW()
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET state = 'available'
            WHERE id IN (SELECT id FROM due)
            RETURNING id, queue, state
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let state_str: String = row.try_get("state").map_err(db_err)?;
                Ok(StagedJob {
                    id: row.try_get("id").map_err(db_err)?,
                    queue: row.try_get("queue").map_err(db_err)?,
                    state: JobState::from_str(&state_str)?,
                })
            })
            .collect()
    }

    /// §4.1.5 `prune` — the state-specific timestamp per branch is the
    /// whole point: a single shared "archived_at" column would force a
    /// table-wide index scan as the table grows.
    async fn prune(&self, max_age: Duration, limit: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            WITH prunable AS (
                SELECT id FROM jobs
                WHERE (state = 'completed' AND completed_at < NOW() - $1::interval)
                   OR (state = 'cancelled' AND cancelled_at < NOW() - $1::interval)
                   OR (state = 'discarded' AND discarded_at < NOW() - $1::interval)
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM jobs WHERE id IN (SELECT id FROM prunable)
            "#,
        )
        .bind(interval_literal(max_age))
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    /// §4.1.6 `rescue` — one combined UPDATE, branching per-row on whether
    /// attempts remain.
    async fn rescue(&self, stuck_threshold: Duration) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            WITH stuck AS (
                SELECT id FROM jobs
                WHERE state = 'executing'
                  AND attempted_at < NOW() - $1::interval
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET state = CASE WHEN attempt < max_attempts THEN 'available' ELSE 'discarded' END,
                discarded_at = CASE WHEN attempt < max_attempts THEN discarded_at ELSE NOW() END
            WHERE id IN (SELECT id FROM stuck)
            RETURNING id
            "#,
        )
        .bind(interval_literal(stuck_threshold))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(|row| row.try_get("id").map_err(db_err)).collect()
    }

    /// §4.1.7 `insert`.
    async fn insert(&self, change: NewJob) -> Result<InsertedJob> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let inserted = uniqueness::insert_with_uniqueness(&mut tx, change).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(inserted)
    }

    /// §4.1.7 `insert_all` — each job still gets its own uniqueness check,
    /// but the whole batch commits (or fails) together.
    async fn insert_all(&self, changes: Vec<NewJob>) -> Result<Vec<InsertedJob>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut out = Vec::with_capacity(changes.len());
        for change in changes {
            out.push(uniqueness::insert_with_uniqueness(&mut tx, change).await?);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(out)
    }

    async fn cancel_all(&self, queue: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'cancelled', cancelled_at = NOW()
            WHERE state NOT IN ('cancelled', 'completed', 'discarded')
              AND ($1::text IS NULL OR queue = $1)
            "#,
        )
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn retry_all(&self, queue: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'available',
                scheduled_at = NOW(),
                completed_at = NULL,
                cancelled_at = NULL,
                discarded_at = NULL,
                max_attempts = GREATEST(max_attempts, attempt + 1)
            WHERE state NOT IN ('available', 'executing')
              AND ($1::text IS NULL OR queue = $1)
            "#,
        )
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, job_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_all(&self, queue: Option<&str>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE ($1::text IS NULL OR queue = $1)")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

/// Renders a `chrono::Duration` as a Postgres interval literal. `sqlx` has no
/// built-in bind for `chrono::Duration`, and binding two separate numeric
/// parameters (seconds + nanos) is more fragile than letting Postgres parse
/// a literal we fully control the format of.
fn interval_literal(d: Duration) -> String {
    format!("{} microseconds", d.num_microseconds().unwrap_or(d.num_seconds() * 1_000_000))
}
