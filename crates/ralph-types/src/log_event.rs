//! The external event-log line shape (`{ts, event, session_id?, iteration?,
//! data?}`), one JSON object per line, as described in the external
//! interfaces section of the spec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub event: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub iteration: Option<u64>,
    #[serde(default)]
    pub data: Option<Value>,
}
