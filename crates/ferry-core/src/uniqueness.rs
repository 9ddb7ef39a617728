//! §4.7 — uniqueness configuration and fingerprinting.
//!
//! The fingerprint is computed in Rust (not SQL) so that `ferry-postgres`,
//! and any future engine, share bit-identical fingerprints for the same
//! `UniqueOpts` + `NewJob` pair. The engine is responsible for turning the
//! fingerprint into an advisory-lock key and a match query; this module only
//! owns "what counts as the same job".

use crate::job::JobState;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Which fields participate in the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueField {
    Worker,
    Queue,
    Args,
    Meta,
}

/// Which timestamp the `period` window is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueTimestamp {
    InsertedAt,
    ScheduledAt,
}

/// How long a prior insertion counts as a duplicate. `Infinity` never
/// expires — the classic "only one of these, ever" use case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UniquePeriod {
    Seconds(i64),
    Infinity,
}

/// A field on the existing row a conflicting insert is allowed to overwrite
/// (§4.1.7 step 3's "replace" option). Empty `UniqueOpts::replace` means the
/// conflicting row is returned untouched, same as a plain uniqueness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceField {
    Args,
    Meta,
    Tags,
    Priority,
    MaxAttempts,
    ScheduledAt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueOpts {
    pub fields: Vec<UniqueField>,
    /// Restricts `args`/`meta` comparison to these sub-keys. Empty means
    /// "compare the whole object".
    pub keys: Vec<String>,
    pub period: UniquePeriod,
    /// States that count as blocking duplicates. Defaults to everything but
    /// `discarded`/`cancelled` (a failed-out job shouldn't block a retry).
    pub states: Vec<JobState>,
    pub timestamp: UniqueTimestamp,
    /// Fields to overwrite on the existing row when a conflict is found,
    /// instead of leaving it untouched.
    pub replace: Vec<ReplaceField>,
}

impl Default for UniqueOpts {
    fn default() -> Self {
        Self {
            fields: vec![UniqueField::Worker, UniqueField::Queue, UniqueField::Args],
            keys: Vec::new(),
            period: UniquePeriod::Seconds(60),
            states: vec![
                JobState::Scheduled,
                JobState::Available,
                JobState::Executing,
                JobState::Retryable,
                JobState::Completed,
            ],
            timestamp: UniqueTimestamp::InsertedAt,
            replace: Vec::new(),
        }
    }
}

/// Projects `args`/`meta` down to the configured `keys`, sorts object keys so
/// the fingerprint doesn't depend on serialization order, and returns a
/// canonical string ready to hash.
fn canonicalize(value: &serde_json::Value, keys: &[String]) -> String {
    let projected = if keys.is_empty() {
        value.clone()
    } else {
        let mut out = serde_json::Map::new();
        if let Some(obj) = value.as_object() {
            for key in keys {
                if let Some(v) = obj.get(key) {
                    out.insert(key.clone(), v.clone());
                }
            }
        }
        serde_json::Value::Object(out)
    };
    canonical_json(&projected)
}

/// Deterministic JSON rendering: object keys sorted, no whitespace.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

/// Builds the deterministic fingerprint key for a candidate insert. Two
/// inserts with the same `(fields, keys, state set)` configuration and equal
/// projected field values produce the same fingerprint, regardless of JSON
/// key order or unrelated metadata.
pub fn fingerprint(opts: &UniqueOpts, queue: &str, worker: &str, args: &serde_json::Value, meta: &serde_json::Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    let mut fields = opts.fields.clone();
    fields.sort_by_key(|f| *f as u8 as u32);
    for field in &fields {
        match field {
            UniqueField::Worker => worker.hash(&mut hasher),
            UniqueField::Queue => queue.hash(&mut hasher),
            UniqueField::Args => canonicalize(args, &opts.keys).hash(&mut hasher),
            UniqueField::Meta => canonicalize(meta, &opts.keys).hash(&mut hasher),
        }
    }
    let mut states: Vec<&str> = opts.states.iter().map(|s| s.as_str()).collect();
    states.sort_unstable();
    states.join(",").hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_key_order() {
        let opts = UniqueOpts::default();
        let a = serde_json::json!({"id": 1, "name": "x"});
        let b = serde_json::json!({"name": "x", "id": 1});
        assert_eq!(
            fingerprint(&opts, "q", "w", &a, &serde_json::json!({})),
            fingerprint(&opts, "q", "w", &b, &serde_json::json!({}))
        );
    }

    #[test]
    fn fingerprint_respects_restricted_keys() {
        let mut opts = UniqueOpts::default();
        opts.keys = vec!["id".to_string()];
        let a = serde_json::json!({"id": 1, "noise": "a"});
        let b = serde_json::json!({"id": 1, "noise": "b"});
        assert_eq!(
            fingerprint(&opts, "q", "w", &a, &serde_json::json!({})),
            fingerprint(&opts, "q", "w", &b, &serde_json::json!({}))
        );
    }

    #[test]
    fn fingerprint_changes_with_differing_args() {
        let opts = UniqueOpts::default();
        let a = serde_json::json!({"id": 1});
        let b = serde_json::json!({"id": 2});
        assert_ne!(
            fingerprint(&opts, "q", "w", &a, &serde_json::json!({})),
            fingerprint(&opts, "q", "w", &b, &serde_json::json!({}))
        );
    }
}
