//! The durable memory store: raw turns, structured events, and generated
//! summaries, backed by `rusqlite` with WAL journaling — grounded directly
//! on the teacher's `tandem-memory::db::MemoryDatabase`, minus the
//! vector-search machinery this spec has no use for. Full-text search is
//! the lexical counterpart of the teacher's embedding auxiliaries: `fts5`
//! virtual tables kept in sync via `AFTER INSERT` triggers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ralph_types::{Event, EventType, LogEvent, SessionSummary, TurnRecord};
use rusqlite::{params, Connection, Row};
use tokio::sync::Mutex;

use crate::error::{MemoryError, MemoryResult};
use crate::filter::{glob_to_like, EventFilter};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    iteration INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    prompt TEXT NOT NULL,
    response TEXT NOT NULL,
    backend TEXT NOT NULL,
    model TEXT NOT NULL,
    tokens_in INTEGER NOT NULL,
    tokens_out INTEGER NOT NULL,
    cost REAL NOT NULL,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_turns_session_iteration ON turns(session_id, iteration);
CREATE INDEX IF NOT EXISTS idx_turns_session_timestamp ON turns(session_id, timestamp);

CREATE VIRTUAL TABLE IF NOT EXISTS turns_fts USING fts5(
    prompt, response, content='turns', content_rowid='id'
);
CREATE TRIGGER IF NOT EXISTS turns_ai AFTER INSERT ON turns BEGIN
    INSERT INTO turns_fts(rowid, prompt, response) VALUES (new.id, new.prompt, new.response);
END;

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    iteration INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    type TEXT NOT NULL,
    tool TEXT,
    file_path TEXT,
    has_error INTEGER NOT NULL,
    data TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_session_type ON events(session_id, type);
CREATE INDEX IF NOT EXISTS idx_events_session_iteration ON events(session_id, iteration);
CREATE INDEX IF NOT EXISTS idx_events_tool ON events(tool);
CREATE INDEX IF NOT EXISTS idx_events_file_path ON events(file_path);

CREATE TABLE IF NOT EXISTS summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    start_iteration INTEGER NOT NULL,
    end_iteration INTEGER NOT NULL,
    summary TEXT NOT NULL,
    key_decisions TEXT NOT NULL,
    files_modified TEXT NOT NULL,
    error_patterns TEXT NOT NULL,
    generated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_summaries_session_end ON summaries(session_id, end_iteration);

CREATE VIRTUAL TABLE IF NOT EXISTS summaries_fts USING fts5(
    summary, content='summaries', content_rowid='id'
);
CREATE TRIGGER IF NOT EXISTS summaries_ai AFTER INSERT ON summaries BEGIN
    INSERT INTO summaries_fts(rowid, summary) VALUES (new.id, new.summary);
END;
"#;

/// Persistent, concurrent session memory. Uses a single `tokio::sync::Mutex`
/// over the connection, matching the teacher's `MemoryDatabase`.
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    /// Open (creating if absent) the memory database at `path`. The parent
    /// directory is created with mode `0700` and the database file with
    /// mode `0600` on unix.
    pub async fn open(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
                set_dir_permissions(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        conn.execute_batch(SCHEMA)?;

        set_file_permissions(path)?;

        Ok(MemoryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn save_turn(&self, turn: &TurnRecord) -> MemoryResult<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO turns (session_id, iteration, timestamp, prompt, response, backend, model, tokens_in, tokens_out, cost, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                turn.session_id,
                turn.iteration as i64,
                turn.timestamp.to_rfc3339(),
                turn.prompt,
                turn.response,
                turn.backend,
                turn.model,
                turn.tokens_in as i64,
                turn.tokens_out as i64,
                turn.cost,
                turn.error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Delete the oldest turns for `session_id` beyond `max`, keeping the
    /// most recent `max` by iteration. Returns the number of rows deleted.
    pub async fn trim_raw_turns(&self, session_id: &str, max: u32) -> MemoryResult<u64> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM turns WHERE session_id = ?1 AND id NOT IN (
                SELECT id FROM turns WHERE session_id = ?1 ORDER BY iteration DESC LIMIT ?2
            )",
            params![session_id, max as i64],
        )?;
        Ok(deleted as u64)
    }

    pub async fn get_turns_by_iteration(
        &self,
        session_id: &str,
        iteration: u64,
    ) -> MemoryResult<Vec<TurnRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, iteration, timestamp, prompt, response, backend, model, tokens_in, tokens_out, cost, error
             FROM turns WHERE session_id = ?1 AND iteration = ?2 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id, iteration as i64], row_to_turn)?;
        rows.collect::<Result<_, _>>().map_err(MemoryError::from)
    }

    pub async fn get_turns_in_range(
        &self,
        session_id: &str,
        start_iteration: u64,
        end_iteration: u64,
    ) -> MemoryResult<Vec<TurnRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, iteration, timestamp, prompt, response, backend, model, tokens_in, tokens_out, cost, error
             FROM turns WHERE session_id = ?1 AND iteration BETWEEN ?2 AND ?3 ORDER BY iteration ASC, id ASC",
        )?;
        let rows = stmt.query_map(
            params![session_id, start_iteration as i64, end_iteration as i64],
            row_to_turn,
        )?;
        rows.collect::<Result<_, _>>().map_err(MemoryError::from)
    }

    pub async fn search_turns(
        &self,
        session_id: &str,
        query: &str,
        limit: u32,
    ) -> MemoryResult<Vec<TurnRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.session_id, t.iteration, t.timestamp, t.prompt, t.response, t.backend, t.model, t.tokens_in, t.tokens_out, t.cost, t.error
             FROM turns t JOIN turns_fts f ON f.rowid = t.id
             WHERE t.session_id = ?1 AND turns_fts MATCH ?2
             ORDER BY rank LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![session_id, query, limit as i64], row_to_turn)?;
        rows.collect::<Result<_, _>>().map_err(MemoryError::from)
    }

    pub async fn save_event(&self, event: &Event) -> MemoryResult<i64> {
        let conn = self.conn.lock().await;
        let data = event
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO events (session_id, iteration, timestamp, type, tool, file_path, has_error, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.session_id,
                event.iteration as i64,
                event.timestamp.to_rfc3339(),
                event.event_type.as_str(),
                event.tool,
                event.file_path,
                event.has_error as i64,
                data,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn search_events(&self, filter: &EventFilter) -> MemoryResult<Vec<Event>> {
        let conn = self.conn.lock().await;
        let mut sql = String::from(
            "SELECT session_id, iteration, timestamp, type, tool, file_path, has_error, data FROM events WHERE session_id = ?1",
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(filter.session_id.clone())];

        if let Some(types) = &filter.types {
            if types.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders: Vec<String> = types
                .iter()
                .map(|t| {
                    values.push(Box::new(t.as_str().to_string()));
                    format!("?{}", values.len())
                })
                .collect();
            sql.push_str(&format!(" AND type IN ({})", placeholders.join(",")));
        }
        if let Some((start, end)) = filter.iteration_range {
            values.push(Box::new(start as i64));
            sql.push_str(&format!(" AND iteration >= ?{}", values.len()));
            values.push(Box::new(end as i64));
            sql.push_str(&format!(" AND iteration <= ?{}", values.len()));
        }
        if let Some(has_error) = filter.has_error {
            values.push(Box::new(has_error as i64));
            sql.push_str(&format!(" AND has_error = ?{}", values.len()));
        }
        if let Some(glob) = &filter.file_path_glob {
            values.push(Box::new(glob_to_like(glob)));
            sql.push_str(&format!(" AND file_path LIKE ?{} ESCAPE '\\'", values.len()));
        }
        if let Some(substring) = &filter.data_substring {
            values.push(Box::new(format!("%{substring}%")));
            sql.push_str(&format!(" AND data LIKE ?{}", values.len()));
        }
        sql.push_str(" ORDER BY iteration ASC, id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_event)?;
        let mut events: Vec<Event> = rows.collect::<Result<_, _>>()?;

        if let Some(tools) = &filter.tools {
            events.retain(|e| e.tool.as_deref().is_some_and(|t| tools.contains(t)));
        }
        Ok(events)
    }

    pub async fn save_summary(&self, summary: &SessionSummary) -> MemoryResult<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO summaries (session_id, start_iteration, end_iteration, summary, key_decisions, files_modified, error_patterns, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                summary.session_id,
                summary.start_iteration as i64,
                summary.end_iteration as i64,
                summary.summary,
                serde_json::to_string(&summary.key_decisions)?,
                serde_json::to_string(&summary.files_modified)?,
                serde_json::to_string(&summary.error_patterns)?,
                summary.generated_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn list_summaries(
        &self,
        session_id: &str,
        since_iteration: Option<u64>,
        limit: u32,
    ) -> MemoryResult<Vec<SessionSummary>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, start_iteration, end_iteration, summary, key_decisions, files_modified, error_patterns, generated_at
             FROM summaries WHERE session_id = ?1 AND end_iteration >= ?2 ORDER BY end_iteration DESC LIMIT ?3",
        )?;
        let result = collect_summaries(stmt.query_map(
            params![session_id, since_iteration.unwrap_or(0) as i64, limit as i64],
            row_to_summary_parts,
        )?);
        result
    }

    pub async fn search_summaries(
        &self,
        session_id: &str,
        query: &str,
        limit: u32,
    ) -> MemoryResult<Vec<SessionSummary>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.session_id, s.start_iteration, s.end_iteration, s.summary, s.key_decisions, s.files_modified, s.error_patterns, s.generated_at
             FROM summaries s JOIN summaries_fts f ON f.rowid = s.id
             WHERE s.session_id = ?1 AND summaries_fts MATCH ?2
             ORDER BY rank LIMIT ?3",
        )?;
        let result = collect_summaries(stmt.query_map(params![session_id, query, limit as i64], row_to_summary_parts)?);
        result
    }

    /// Delete turns, events, and summaries older than `days` across every
    /// session. Returns the total number of rows removed.
    pub async fn prune_retention(&self, days: u32) -> MemoryResult<u64> {
        let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let conn = self.conn.lock().await;
        let mut total = 0u64;
        total += conn.execute("DELETE FROM turns WHERE timestamp < ?1", params![cutoff])? as u64;
        total += conn.execute("DELETE FROM events WHERE timestamp < ?1", params![cutoff])? as u64;
        total +=
            conn.execute("DELETE FROM summaries WHERE generated_at < ?1", params![cutoff])? as u64;
        Ok(total)
    }

    /// Map a line from the external event log onto a structured [`Event`].
    /// Only the six event types below are persisted; every other valid
    /// `EventType` string (`session_start`, `model_response`, ...) is a
    /// no-op here, same as a name `EventType::parse` doesn't recognize.
    pub async fn handle_log_event(&self, log: LogEvent) -> MemoryResult<()> {
        let event_type = match log.event.as_str() {
            "tool_call" => EventType::ToolCall,
            "tool_result" => EventType::ToolResult,
            "file_change" => EventType::FileChange,
            "error" => EventType::Error,
            "backend_switch" => EventType::BackendSwitch,
            "model_switch" => EventType::ModelSwitch,
            _ => return Ok(()),
        };
        let session_id = log.session_id.unwrap_or_default();
        let iteration = log.iteration.unwrap_or(0);
        let mut event = Event::new(session_id, iteration, event_type);
        event.timestamp = log.ts;
        if let Some(data) = log.data {
            if let Some(tool) = data.get("tool").and_then(|v| v.as_str()) {
                event = event.with_tool(tool);
            }
            if let Some(file_path) = data.get("file_path").and_then(|v| v.as_str()) {
                event = event.with_file_path(file_path);
            }
            if data.get("error").is_some() {
                event = event.with_error(true);
            }
            event = event.with_data(data);
        }
        self.save_event(&event).await?;
        Ok(())
    }
}

fn row_to_turn(row: &Row) -> rusqlite::Result<TurnRecord> {
    let timestamp: String = row.get(3)?;
    Ok(TurnRecord {
        id: Some(row.get(0)?),
        session_id: row.get(1)?,
        iteration: row.get::<_, i64>(2)? as u64,
        timestamp: parse_rfc3339(&timestamp),
        prompt: row.get(4)?,
        response: row.get(5)?,
        backend: row.get(6)?,
        model: row.get(7)?,
        tokens_in: row.get::<_, i64>(8)? as u64,
        tokens_out: row.get::<_, i64>(9)? as u64,
        cost: row.get(10)?,
        error: row.get(11)?,
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let timestamp: String = row.get(2)?;
    let type_str: String = row.get(3)?;
    let data: Option<String> = row.get(7)?;
    Ok(Event {
        session_id: row.get(0)?,
        iteration: row.get::<_, i64>(1)? as u64,
        timestamp: parse_rfc3339(&timestamp),
        event_type: EventType::parse(&type_str).unwrap_or(EventType::Error),
        tool: row.get(4)?,
        file_path: row.get(5)?,
        has_error: row.get::<_, i64>(6)? != 0,
        data: data.and_then(|d| serde_json::from_str(&d).ok()),
    })
}

type SummaryParts = (
    i64,
    String,
    i64,
    i64,
    String,
    String,
    String,
    String,
    String,
);

fn row_to_summary_parts(row: &Row) -> rusqlite::Result<SummaryParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn collect_summaries(
    rows: impl Iterator<Item = rusqlite::Result<SummaryParts>>,
) -> MemoryResult<Vec<SessionSummary>> {
    let mut out = Vec::new();
    for row in rows {
        let (id, session_id, start_iteration, end_iteration, summary, key_decisions, files_modified, error_patterns, generated_at) =
            row?;
        out.push(SessionSummary {
            id: Some(id),
            session_id,
            start_iteration: start_iteration as u64,
            end_iteration: end_iteration as u64,
            summary,
            key_decisions: serde_json::from_str(&key_decisions)?,
            files_modified: serde_json::from_str(&files_modified)?,
            error_patterns: serde_json::from_str(&error_patterns)?,
            generated_at: parse_rfc3339(&generated_at),
        });
    }
    Ok(out)
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> MemoryResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> MemoryResult<()> {
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> MemoryResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> MemoryResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn setup() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.sqlite3");
        let store = MemoryStore::open(&path).await.unwrap();
        (dir, store)
    }

    fn turn(session: &str, iteration: u64) -> TurnRecord {
        TurnRecord {
            id: None,
            session_id: session.into(),
            iteration,
            timestamp: Utc::now(),
            prompt: format!("prompt {iteration}"),
            response: format!("response about widgets {iteration}"),
            backend: "mock".into(),
            model: "mock-model".into(),
            tokens_in: 10,
            tokens_out: 20,
            cost: 0.01,
            error: None,
        }
    }

    #[tokio::test]
    async fn save_and_fetch_by_iteration() {
        let (_dir, store) = setup().await;
        store.save_turn(&turn("s1", 1)).await.unwrap();
        store.save_turn(&turn("s1", 2)).await.unwrap();
        let turns = store.get_turns_by_iteration("s1", 1).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].iteration, 1);
    }

    #[tokio::test]
    async fn trim_keeps_most_recent() {
        let (_dir, store) = setup().await;
        for i in 1..=5 {
            store.save_turn(&turn("s1", i)).await.unwrap();
        }
        let deleted = store.trim_raw_turns("s1", 2).await.unwrap();
        assert_eq!(deleted, 3);
        let remaining = store.get_turns_in_range("s1", 0, 100).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].iteration, 4);
        assert_eq!(remaining[1].iteration, 5);
    }

    #[tokio::test]
    async fn full_text_search_over_turns() {
        let (_dir, store) = setup().await;
        store.save_turn(&turn("s1", 1)).await.unwrap();
        let hits = store.search_turns("s1", "widgets", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn event_filter_by_type_and_error() {
        let (_dir, store) = setup().await;
        store
            .save_event(&Event::new("s1", 1, EventType::ToolCall).with_tool("bash"))
            .await
            .unwrap();
        store
            .save_event(&Event::new("s1", 2, EventType::Error).with_error(true))
            .await
            .unwrap();

        let mut types = HashSet::new();
        types.insert(EventType::Error);
        let filter = EventFilter {
            session_id: "s1".into(),
            types: Some(types),
            has_error: Some(true),
            ..Default::default()
        };
        let results = store.search_events(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_type, EventType::Error);
    }

    #[tokio::test]
    async fn handle_log_event_maps_known_types() {
        let (_dir, store) = setup().await;
        let log = LogEvent {
            ts: Utc::now(),
            event: "tool_call".into(),
            session_id: Some("s1".into()),
            iteration: Some(3),
            data: Some(serde_json::json!({"tool": "bash"})),
        };
        store.handle_log_event(log).await.unwrap();
        let filter = EventFilter {
            session_id: "s1".into(),
            ..Default::default()
        };
        let results = store.search_events(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool.as_deref(), Some("bash"));
    }

    #[tokio::test]
    async fn handle_log_event_ignores_unknown() {
        let (_dir, store) = setup().await;
        let log = LogEvent {
            ts: Utc::now(),
            event: "something_unrecognized".into(),
            session_id: Some("s1".into()),
            iteration: None,
            data: None,
        };
        store.handle_log_event(log).await.unwrap();
        let filter = EventFilter {
            session_id: "s1".into(),
            ..Default::default()
        };
        assert!(store.search_events(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handle_log_event_ignores_valid_but_disallowed_type() {
        let (_dir, store) = setup().await;
        let log = LogEvent {
            ts: Utc::now(),
            event: "session_start".into(),
            session_id: Some("s1".into()),
            iteration: None,
            data: None,
        };
        store.handle_log_event(log).await.unwrap();
        let filter = EventFilter {
            session_id: "s1".into(),
            ..Default::default()
        };
        assert!(store.search_events(&filter).await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn database_file_has_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let (dir, _store) = setup().await;
        let path = dir.path().join("memory.sqlite3");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
