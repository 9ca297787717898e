//! Tracing setup and the event-log sink for a Ralph session, grounded on
//! the teacher's `tandem_observability::init_process_logging` /
//! `emit_event` split between a human-readable console layer and a JSON
//! file layer: a console layer for operators, a general JSON file layer
//! for everything, and a third JSON file layer filtered to the
//! `ralph.events` target so the fixed event vocabulary (§3 `Event`) lands
//! in its own file for later ingestion via `MemoryStore::handle_log_event`.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const EVENTS_TARGET: &str = "ralph.events";

/// Guards returned by [`init_logging`]; dropping either flushes its
/// non-blocking writer. Hold both for the process lifetime.
pub struct LoggingGuards {
    pub log_guard: WorkerGuard,
    pub events_guard: WorkerGuard,
}

/// Initialize console + JSON-file + event-file tracing layers rooted at
/// `logs_dir`. Idempotent-safe: a second call in the same process is a
/// no-op (`try_init` swallows the already-set error), matching the
/// teacher's `init_process_logging`.
pub fn init_logging(logs_dir: &Path) -> anyhow::Result<LoggingGuards> {
    fs::create_dir_all(logs_dir)?;

    let log_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("ralph")
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (log_writer, log_guard) = tracing_appender::non_blocking(log_appender);

    let events_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("ralph.events")
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (events_writer, events_guard) = tracing_appender::non_blocking(events_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(log_writer)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false)
        .with_filter(filter_fn(|meta| meta.target() != EVENTS_TARGET));

    let events_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(events_writer)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false)
        .with_filter(filter_fn(|meta| meta.target() == EVENTS_TARGET));

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_ansi(true)
        .with_filter(filter_fn(|meta| meta.target() != EVENTS_TARGET));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .with(events_layer)
        .try_init()
        .ok();

    Ok(LoggingGuards {
        log_guard,
        events_guard,
    })
}

/// Emit one line of the fixed event vocabulary to the `ralph.events`
/// target. `data` is flattened to a string field so the JSON file layer
/// renders it inline rather than as a nested, re-escaped value.
pub fn emit_event(event: &str, session_id: Option<&str>, iteration: Option<u64>, data: Option<&Value>) {
    tracing::info!(
        target: EVENTS_TARGET,
        event,
        session_id = session_id.unwrap_or(""),
        iteration = iteration.unwrap_or(0),
        data = data.map(|v| v.to_string()).unwrap_or_default(),
    );
}

/// Replace `input` with a fixed-shape placeholder that reveals only its
/// length and a non-reversible fingerprint. Used for prompt/response
/// previews in logs so secrets embedded in a user prompt never reach disk
/// verbatim.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("[redacted len={} fp={}]", trimmed.len(), fingerprint(trimmed))
}

fn fingerprint(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_text_hides_content_but_keeps_length() {
        let raw = "super-secret-api-key-123";
        let redacted = redact_text(raw);
        assert!(redacted.contains(&format!("len={}", raw.len())));
        assert!(!redacted.contains(raw));
    }

    #[test]
    fn redact_text_of_empty_is_empty() {
        assert_eq!(redact_text("   "), "");
    }

    #[test]
    fn init_logging_creates_logs_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs_dir = dir.path().join("logs");
        let _guards = init_logging(&logs_dir).unwrap();
        assert!(logs_dir.is_dir());
    }
}
