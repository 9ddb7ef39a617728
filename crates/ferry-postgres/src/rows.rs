//! Maps a `jobs` row to `ferry_core::Job`. Centralized so every query in
//! `engine.rs` that returns a full row shares one decoding path.

use ferry_core::job::{Attempt, ErrorEntry};
use ferry_core::{Error, Job, JobState};
use sqlx::{postgres::PgRow, Row};
use std::str::FromStr;

pub fn row_to_job(row: &PgRow) -> Result<Job, Error> {
    let state_str: String = row.try_get("state").map_err(db_err)?;
    let attempted_by_json: serde_json::Value = row.try_get("attempted_by").map_err(db_err)?;
    let errors_json: serde_json::Value = row.try_get("errors").map_err(db_err)?;

    Ok(Job {
        id: row.try_get("id").map_err(db_err)?,
        state: JobState::from_str(&state_str)?,
        queue: row.try_get("queue").map_err(db_err)?,
        worker: row.try_get("worker").map_err(db_err)?,
        args: row.try_get("args").map_err(db_err)?,
        meta: row.try_get("meta").map_err(db_err)?,
        tags: row.try_get("tags").map_err(db_err)?,
        priority: row.try_get("priority").map_err(db_err)?,
        attempt: row.try_get("attempt").map_err(db_err)?,
        max_attempts: row.try_get("max_attempts").map_err(db_err)?,
        attempted_by: serde_json::from_value::<Vec<Attempt>>(attempted_by_json)
            .map_err(|e| Error::Validation(format!("decoding attempted_by: {e}")))?,
        errors: serde_json::from_value::<Vec<ErrorEntry>>(errors_json)
            .map_err(|e| Error::Validation(format!("decoding errors: {e}")))?,
        inserted_at: row.try_get("inserted_at").map_err(db_err)?,
        scheduled_at: row.try_get("scheduled_at").map_err(db_err)?,
        attempted_at: row.try_get("attempted_at").map_err(db_err)?,
        completed_at: row.try_get("completed_at").map_err(db_err)?,
        cancelled_at: row.try_get("cancelled_at").map_err(db_err)?,
        discarded_at: row.try_get("discarded_at").map_err(db_err)?,
    })
}

pub fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}
