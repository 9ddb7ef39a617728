//! §4.7 — uniqueness enforcement under concurrent insertion.
//!
//! Runs entirely inside the caller's transaction: a transaction-scoped
//! advisory lock (`pg_advisory_xact_lock`) serializes concurrent inserts
//! that hash to the same fingerprint, and releases automatically on commit
//! or rollback — no manual unlock path to forget.

use crate::rows::{db_err, row_to_job};
use chrono::Utc;
use ferry_core::engine::{InsertedJob, NewJob};
use ferry_core::uniqueness::{fingerprint, ReplaceField, UniqueField, UniquePeriod, UniqueTimestamp};
use ferry_core::{job::normalize_tags, Result};
use sqlx::{Postgres, Transaction};

pub async fn insert_with_uniqueness(
    tx: &mut Transaction<'_, Postgres>,
    change: NewJob,
) -> Result<InsertedJob> {
    let Some(opts) = change.unique.clone() else {
        return Ok(InsertedJob {
            job: plain_insert(tx, &change).await?,
            conflict: false,
        });
    };

    let key = fingerprint(&opts, &change.queue, &change.worker, &change.args, &change.meta) as i64;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

    let worker_filter = opts.fields.contains(&UniqueField::Worker).then_some(change.worker.as_str());
    let queue_filter = opts.fields.contains(&UniqueField::Queue).then_some(change.queue.as_str());
    let states: Vec<&str> = opts.states.iter().map(|s| s.as_str()).collect();
    let cutoff = match opts.period {
        UniquePeriod::Infinity => None,
        UniquePeriod::Seconds(secs) => Some(Utc::now() - chrono::Duration::seconds(secs)),
    };
    let ts_column = match opts.timestamp {
        UniqueTimestamp::InsertedAt => "inserted_at",
        UniqueTimestamp::ScheduledAt => "scheduled_at",
    };

    let query = format!(
        r#"
        SELECT * FROM jobs
        WHERE ($1::text IS NULL OR worker = $1)
          AND ($2::text IS NULL OR queue = $2)
          AND state = ANY($3)
          AND ($4::timestamptz IS NULL OR {ts_column} >= $4)
        ORDER BY id ASC
        "#
    );

    let candidates = sqlx::query(&query)
        .bind(worker_filter)
        .bind(queue_filter)
        .bind(&states)
        .bind(cutoff)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err)?;

    for row in &candidates {
        let job = row_to_job(row)?;
        let candidate_fp = fingerprint(&opts, &job.queue, &job.worker, &job.args, &job.meta) as i64;
        if candidate_fp == key {
            if opts.replace.is_empty() {
                return Ok(InsertedJob { job, conflict: true });
            }
            let replaced = apply_replace(tx, job.id, &opts.replace, &change).await?;
            return Ok(InsertedJob { job: replaced, conflict: true });
        }
    }

    Ok(InsertedJob {
        job: plain_insert(tx, &change).await?,
        conflict: false,
    })
}

/// §4.1.7 step 3 — overwrites the requested subset of fields on the existing
/// row a conflicting insert matched, still inside the caller's advisory-locked
/// transaction. Every column is present in the `SET` list unconditionally;
/// the `CASE` guards are what make only the requested fields change.
async fn apply_replace(
    tx: &mut Transaction<'_, Postgres>,
    job_id: i64,
    fields: &[ReplaceField],
    change: &NewJob,
) -> Result<ferry_core::Job> {
    let tags = normalize_tags(change.tags.clone());
    let scheduled_at = change.scheduled_at.unwrap_or_else(Utc::now);

    let row = sqlx::query(
        r#"
        UPDATE jobs SET
            args = CASE WHEN $2 THEN $3 ELSE args END,
            meta = CASE WHEN $4 THEN $5 ELSE meta END,
            tags = CASE WHEN $6 THEN $7 ELSE tags END,
            priority = CASE WHEN $8 THEN $9 ELSE priority END,
            max_attempts = CASE WHEN $10 THEN $11 ELSE max_attempts END,
            scheduled_at = CASE WHEN $12 THEN $13 ELSE scheduled_at END
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(job_id)
    .bind(fields.contains(&ReplaceField::Args))
    .bind(&change.args)
    .bind(fields.contains(&ReplaceField::Meta))
    .bind(&change.meta)
    .bind(fields.contains(&ReplaceField::Tags))
    .bind(&tags)
    .bind(fields.contains(&ReplaceField::Priority))
    .bind(change.priority)
    .bind(fields.contains(&ReplaceField::MaxAttempts))
    .bind(change.max_attempts)
    .bind(fields.contains(&ReplaceField::ScheduledAt))
    .bind(scheduled_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_err)?;

    row_to_job(&row)
}

async fn plain_insert(tx: &mut Transaction<'_, Postgres>, change: &NewJob) -> Result<ferry_core::Job> {
    let tags = normalize_tags(change.tags.clone());
    let now = Utc::now();
    let scheduled_at = change.scheduled_at.unwrap_or(now);
    let state = if scheduled_at > now { "scheduled" } else { "available" };

    let row = sqlx::query(
        r#"
        INSERT INTO jobs (state, queue, worker, args, meta, tags, priority, max_attempts, scheduled_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(state)
    .bind(&change.queue)
    .bind(&change.worker)
    .bind(&change.args)
    .bind(&change.meta)
    .bind(&tags)
    .bind(change.priority)
    .bind(change.max_attempts)
    .bind(scheduled_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_err)?;

    row_to_job(&row)
}
