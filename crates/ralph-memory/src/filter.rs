use std::collections::HashSet;

use ralph_types::EventType;

/// Filter criteria for [`crate::MemoryStore::search_events`]. Every field is
/// optional; an absent field imposes no constraint.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: String,
    pub types: Option<HashSet<EventType>>,
    pub tools: Option<HashSet<String>>,
    /// A glob where `*` matches any run of characters; translated to a SQL
    /// `LIKE` pattern.
    pub file_path_glob: Option<String>,
    pub iteration_range: Option<(u64, u64)>,
    pub has_error: Option<bool>,
    pub data_substring: Option<String>,
}

pub(crate) fn glob_to_like(glob: &str) -> String {
    glob.replace('%', r"\%").replace('_', r"\_").replace('*', "%")
}
