//! The fixed structured-event vocabulary emitted during an iteration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    IterationStart,
    ToolCall,
    ToolResult,
    FileChange,
    ModelResponse,
    IterationEnd,
    StateChange,
    PromptReload,
    SessionEnd,
    BackendResult,
    BackendComparison,
    BackendSwitch,
    ModelSwitch,
    ScheduleAction,
    Error,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::SessionStart => "session_start",
            EventType::IterationStart => "iteration_start",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::FileChange => "file_change",
            EventType::ModelResponse => "model_response",
            EventType::IterationEnd => "iteration_end",
            EventType::StateChange => "state_change",
            EventType::PromptReload => "prompt_reload",
            EventType::SessionEnd => "session_end",
            EventType::BackendResult => "backend_result",
            EventType::BackendComparison => "backend_comparison",
            EventType::BackendSwitch => "backend_switch",
            EventType::ModelSwitch => "model_switch",
            EventType::ScheduleAction => "schedule_action",
            EventType::Error => "error",
        }
    }

    /// Parse the external wire string, returning `None` for unknown values
    /// rather than erroring — callers decide whether that's a no-op.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "session_start" => EventType::SessionStart,
            "iteration_start" => EventType::IterationStart,
            "tool_call" => EventType::ToolCall,
            "tool_result" => EventType::ToolResult,
            "file_change" => EventType::FileChange,
            "model_response" => EventType::ModelResponse,
            "iteration_end" => EventType::IterationEnd,
            "state_change" => EventType::StateChange,
            "prompt_reload" => EventType::PromptReload,
            "session_end" => EventType::SessionEnd,
            "backend_result" => EventType::BackendResult,
            "backend_comparison" => EventType::BackendComparison,
            "backend_switch" => EventType::BackendSwitch,
            "model_switch" => EventType::ModelSwitch,
            "schedule_action" => EventType::ScheduleAction,
            "error" => EventType::Error,
            _ => return None,
        })
    }
}

/// A structured event recorded alongside a [`crate::TurnRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: String,
    pub iteration: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub tool: Option<String>,
    pub file_path: Option<String>,
    pub has_error: bool,
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(session_id: impl Into<String>, iteration: u64, event_type: EventType) -> Self {
        Self {
            session_id: session_id.into(),
            iteration,
            timestamp: Utc::now(),
            event_type,
            tool: None,
            file_path: None,
            has_error: false,
            data: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_error(mut self, has_error: bool) -> Self {
        self.has_error = has_error;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
