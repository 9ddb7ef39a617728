//! §4.8 — cron scheduling. One task per `CronEntry`, sleeping until the next
//! occurrence and inserting a job for it. `@reboot` is special-cased: it
//! fires exactly once, at instance startup, and never again.

use crate::config::CronEntry;
use chrono::Utc;
use cron::Schedule;
use ferry_core::{Engine, NewJob, Peer, UniqueField, UniqueOpts, UniquePeriod, UniqueTimestamp};
use std::str::FromStr;
use std::sync::Arc;

/// Expands the handful of shorthand expressions the `cron` crate doesn't
/// understand natively into its expected 6-field (sec min hour dom mon dow)
/// form. `@reboot` is handled separately by the caller.
fn expand_shorthand(expr: &str) -> &str {
    match expr {
        "@yearly" | "@annually" => "0 0 0 1 1 *",
        "@monthly" => "0 0 0 1 * *",
        "@weekly" => "0 0 0 * * 0",
        "@daily" | "@midnight" => "0 0 0 * * *",
        "@hourly" => "0 0 * * * *",
        other => other,
    }
}

pub fn spawn_all(entries: Vec<CronEntry>, engine: Arc<dyn Engine>, leader: Arc<dyn Peer>) {
    for entry in entries {
        if entry.expr == "@reboot" {
            tokio::spawn(run_reboot(entry, engine.clone(), leader.clone()));
        } else {
            tokio::spawn(run_scheduled(entry, engine.clone(), leader.clone()));
        }
    }
}

async fn run_reboot(entry: CronEntry, engine: Arc<dyn Engine>, leader: Arc<dyn Peer>) {
    if leader.is_leader() {
        insert(&entry, &engine).await;
    }
}

async fn run_scheduled(entry: CronEntry, engine: Arc<dyn Engine>, leader: Arc<dyn Peer>) {
    let expanded = expand_shorthand(&entry.expr);
    let schedule = match Schedule::from_str(expanded) {
        Ok(schedule) => schedule,
        Err(error) => {
            tracing::error!(%error, expr = %entry.expr, "invalid cron expression, entry disabled");
            return;
        }
    };

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            tracing::warn!(expr = %entry.expr, "cron schedule has no further occurrences");
            return;
        };
        let now = Utc::now();
        if next > now {
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(0));
            tokio::time::sleep(wait).await;
        }
        if leader.is_leader() {
            insert(&entry, &engine).await;
        }
    }
}

/// Deduplicated via uniqueness (§4.8) so a leadership handover mid-minute
/// can't leave two nodes both believing they own this occurrence.
async fn insert(entry: &CronEntry, engine: &Arc<dyn Engine>) {
    let unique = UniqueOpts {
        fields: vec![UniqueField::Worker, UniqueField::Queue, UniqueField::Args],
        period: UniquePeriod::Seconds(59),
        timestamp: UniqueTimestamp::InsertedAt,
        ..UniqueOpts::default()
    };
    let job = NewJob::new(entry.queue.clone(), entry.worker.clone(), entry.args.clone()).with_unique(unique);
    if let Err(error) = engine.insert(job).await {
        tracing::error!(%error, worker = %entry.worker, queue = %entry.queue, "cron insert failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_shorthand() {
        assert_eq!(expand_shorthand("@yearly"), "0 0 0 1 1 *");
        assert_eq!(expand_shorthand("@annually"), "0 0 0 1 1 *");
        assert_eq!(expand_shorthand("@monthly"), "0 0 0 1 * *");
        assert_eq!(expand_shorthand("@weekly"), "0 0 0 * * 0");
        assert_eq!(expand_shorthand("@daily"), "0 0 0 * * *");
        assert_eq!(expand_shorthand("@midnight"), "0 0 0 * * *");
        assert_eq!(expand_shorthand("@hourly"), "0 0 * * * *");
    }

    #[test]
    fn leaves_explicit_expressions_untouched() {
        assert_eq!(expand_shorthand("0 30 * * * *"), "0 30 * * * *");
    }

    #[test]
    fn expanded_shorthand_parses_as_a_schedule() {
        for expr in ["@yearly", "@monthly", "@weekly", "@daily", "@midnight", "@hourly"] {
            let expanded = expand_shorthand(expr);
            assert!(Schedule::from_str(expanded).is_ok(), "{expr} -> {expanded} failed to parse");
        }
    }
}
