//! The request/result shapes exchanged between the orchestrator and a
//! `Backend` implementation (the `Backend` trait itself lives in
//! `ralph-backend`, which depends on this crate — not the other way
//! around, so both orchestrator and backend crates can share these types
//! without a cycle).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single dispatch asked of a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub prompt: String,
    pub model: String,
    pub sandbox_path: String,
    pub iteration: u64,
    pub session_id: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

/// The outcome of dispatching a [`Request`] to a backend.
///
/// A backend MAY embed its error into `error` and still return `Ok`, or
/// surface it as an `Err` from `Execute`; the orchestrator treats both
/// channels equivalently.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendResult {
    pub backend: String,
    pub model: String,
    pub duration: Duration,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub cost_estimate: f64,
    pub files_changed: Vec<String>,
    pub tests_passed: Option<u32>,
    pub tests_failed: Option<u32>,
    pub output: String,
    pub error: Option<String>,
}

impl BackendResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A parsed rate-limit hint extracted from backend output or headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    pub retry_after: Option<Duration>,
    pub window_resets: Option<chrono::DateTime<chrono::Utc>>,
    pub pattern: String,
}

impl RateLimitInfo {
    /// Resolve a concrete park duration given the current time: prefer an
    /// explicit `window_resets`, then `retry_after`, then the spec's
    /// default of 60 seconds when a rate-limit phrase matched but no
    /// concrete timing was extractable.
    pub fn resolve_park_duration(&self, now: chrono::DateTime<chrono::Utc>) -> Duration {
        if let Some(resets) = self.window_resets {
            let delta = resets - now;
            if delta.num_milliseconds() > 0 {
                return Duration::from_millis(delta.num_milliseconds() as u64);
            }
            return Duration::from_secs(0);
        }
        self.retry_after.unwrap_or(Duration::from_secs(60))
    }
}
