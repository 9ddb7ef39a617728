//! §6.1 — schema DDL and a minimal `migrate()` entry point.
//!
//! This is deliberately not a migration *framework*: callers who already run
//! `sqlx::migrate!` or a bespoke tool embed this DDL as their first
//! migration. `migrate()` exists so tests and small deployments can stand up
//! the schema without reaching for one.

use sqlx::PgPool;

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              BIGSERIAL PRIMARY KEY,
    state           TEXT NOT NULL DEFAULT 'available',
    queue           TEXT NOT NULL,
    worker          TEXT NOT NULL,
    args            JSONB NOT NULL DEFAULT '{}'::jsonb,
    meta            JSONB NOT NULL DEFAULT '{}'::jsonb,
    tags            TEXT[] NOT NULL DEFAULT '{}',
    priority        SMALLINT NOT NULL DEFAULT 0,
    attempt         INTEGER NOT NULL DEFAULT 0,
    max_attempts    INTEGER NOT NULL DEFAULT 20,
    attempted_by    JSONB NOT NULL DEFAULT '[]'::jsonb,
    errors          JSONB NOT NULL DEFAULT '[]'::jsonb,
    inserted_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    scheduled_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    attempted_at    TIMESTAMPTZ,
    completed_at    TIMESTAMPTZ,
    cancelled_at    TIMESTAMPTZ,
    discarded_at    TIMESTAMPTZ,

    CONSTRAINT jobs_state_check CHECK (
        state IN ('scheduled', 'available', 'executing', 'retryable',
                  'completed', 'cancelled', 'discarded')
    ),
    CONSTRAINT jobs_priority_check CHECK (priority BETWEEN 0 AND 9)
);

-- Fetch path: §6.1's partial index over the fetchable states.
CREATE INDEX IF NOT EXISTS jobs_fetch_idx
    ON jobs (queue, priority, scheduled_at, id)
    WHERE state IN ('available', 'scheduled', 'retryable');

-- Staging path.
CREATE INDEX IF NOT EXISTS jobs_stage_idx
    ON jobs (scheduled_at)
    WHERE state IN ('scheduled', 'retryable');

-- Pruning path: one compound index per terminal timestamp, since a single
-- shared index can't serve three different predicate columns efficiently.
CREATE INDEX IF NOT EXISTS jobs_prune_completed_idx ON jobs (state, completed_at) WHERE state = 'completed';
CREATE INDEX IF NOT EXISTS jobs_prune_cancelled_idx ON jobs (state, cancelled_at) WHERE state = 'cancelled';
CREATE INDEX IF NOT EXISTS jobs_prune_discarded_idx ON jobs (state, discarded_at) WHERE state = 'discarded';

-- Lifeline path.
CREATE INDEX IF NOT EXISTS jobs_rescue_idx
    ON jobs (attempted_at)
    WHERE state = 'executing';

CREATE TABLE IF NOT EXISTS peers (
    name        TEXT PRIMARY KEY,
    node        TEXT NOT NULL,
    started_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    expires_at  TIMESTAMPTZ NOT NULL
);
"#;

/// Applies `DDL` idempotently. Safe to call on every process start.
pub async fn migrate(pool: &PgPool) -> sqlx::Result<()> {
    sqlx::query(DDL).execute(pool).await?;
    Ok(())
}
