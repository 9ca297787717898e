//! Raw turn records and generated session summaries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw turn: a single backend dispatch and its outcome. Append-only;
/// trimmed oldest-first by `MemoryStore::trim_raw_turns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: Option<i64>,
    pub session_id: String,
    pub iteration: u64,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub response: String,
    pub backend: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub error: Option<String>,
}

/// A generated digest over a contiguous iteration range, produced every
/// `summary_interval` iterations by the (out-of-scope) summary generator
/// collaborator and persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Option<i64>,
    pub session_id: String,
    pub start_iteration: u64,
    pub end_iteration: u64,
    pub summary: String,
    pub key_decisions: Vec<String>,
    pub files_modified: Vec<String>,
    pub error_patterns: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Per-backend rollup within a [`RunStats`] aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendUsage {
    pub turns: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub errors: u64,
}

/// Aggregate view over a session's recorded turns, used by the CLI's
/// `memory stats` command. Built from [`TurnRecord`]s rather than persisted
/// directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_iterations: u64,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub per_backend: HashMap<String, BackendUsage>,
}

impl RunStats {
    /// Aggregate stats over a set of turns. `total_iterations` counts
    /// distinct iteration numbers, not turn count (a given iteration may
    /// dispatch to more than one backend in parallel mode).
    pub fn from_turns(turns: &[TurnRecord]) -> Self {
        let mut stats = RunStats::default();
        let mut iterations = std::collections::HashSet::new();
        for turn in turns {
            iterations.insert(turn.iteration);
            stats.total_cost += turn.cost;
            stats.total_tokens += turn.tokens_in + turn.tokens_out;

            let usage = stats.per_backend.entry(turn.backend.clone()).or_default();
            usage.turns += 1;
            usage.tokens_in += turn.tokens_in;
            usage.tokens_out += turn.tokens_out;
            usage.cost += turn.cost;
            if turn.error.is_some() {
                usage.errors += 1;
            }
        }
        stats.total_iterations = iterations.len() as u64;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(backend: &str, iteration: u64, cost: f64, error: Option<&str>) -> TurnRecord {
        TurnRecord {
            id: None,
            session_id: "s1".into(),
            iteration,
            timestamp: Utc::now(),
            prompt: String::new(),
            response: String::new(),
            backend: backend.into(),
            model: "m".into(),
            tokens_in: 10,
            tokens_out: 5,
            cost,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn aggregates_per_backend_and_totals() {
        let turns = vec![
            turn("alpha", 1, 0.1, None),
            turn("beta", 1, 0.2, None),
            turn("alpha", 2, 0.1, Some("boom")),
        ];
        let stats = RunStats::from_turns(&turns);
        assert_eq!(stats.total_iterations, 2);
        assert!((stats.total_cost - 0.4).abs() < f64::EPSILON);
        assert_eq!(stats.total_tokens, 45);
        assert_eq!(stats.per_backend["alpha"].turns, 2);
        assert_eq!(stats.per_backend["alpha"].errors, 1);
        assert_eq!(stats.per_backend["beta"].turns, 1);
    }

    #[test]
    fn empty_turns_yield_zeroed_stats() {
        let stats = RunStats::from_turns(&[]);
        assert_eq!(stats.total_iterations, 0);
        assert_eq!(stats.total_cost, 0.0);
        assert!(stats.per_backend.is_empty());
    }
}
