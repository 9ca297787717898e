//! Context-prompt assembly: the token-budget calculation, the optional
//! static project-text read, and the delimited block prepended to the base
//! prompt. The chat completion that would actually compress history into
//! prose is a collaborator this crate doesn't own; this module only builds
//! the block it would be handed and, failing that, the fallback it is
//! handed instead.

use std::path::Path;

use ralph_orchestrator::context_length;
use ralph_types::SessionSummary;

const DEFAULT_BUDGET_TOKENS: u64 = 500;
const STATIC_TEXT_CANDIDATES: &[&str] = &["AGENTS.md", "RALPH.md"];

/// `(model_context_length * budget_pct) / 100`, capped by `max_output_tokens`
/// when that cap is set. Both inputs at zero means the feature's never been
/// configured, so fall back to a small fixed budget rather than zero.
pub fn compute_budget(model: &str, budget_pct: f64, max_output_tokens: u32) -> u64 {
    if budget_pct <= 0.0 && max_output_tokens == 0 {
        return DEFAULT_BUDGET_TOKENS;
    }
    let window = context_length(model) as f64;
    let by_pct = (window * budget_pct / 100.0).round().max(0.0) as u64;
    if max_output_tokens == 0 {
        by_pct
    } else {
        by_pct.min(max_output_tokens as u64)
    }
}

/// Whitespace/word-count approximation of token count. The real tokenizer
/// is provider-specific and out of scope; this only needs to be in the
/// right ballpark for threshold and budget bookkeeping.
pub fn estimate_tokens(text: &str) -> u64 {
    let words = text.split_whitespace().count();
    ((words as f64) * 1.3).round() as u64
}

/// Read `AGENTS.md`, then `RALPH.md`, verbatim from the sandbox root. Not
/// an error for neither to exist; an I/O error reading one that does is
/// logged and treated the same as absence.
pub fn read_static_project_text(sandbox_path: &Path) -> Option<String> {
    for name in STATIC_TEXT_CANDIDATES {
        let path = sandbox_path.join(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => return Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read static project text");
                continue;
            }
        }
    }
    None
}

/// Render the delimited context block from a token budget, the most recent
/// summaries (already reversed to chronological order), and any static
/// project text.
pub fn build_context_block(
    iteration: u64,
    budget_tokens: u64,
    recent_summaries: &[SessionSummary],
    static_text: Option<&str>,
) -> String {
    let mut block = String::new();
    block.push_str(&format!("iteration: {iteration}\n"));
    block.push_str(&format!("token budget: {budget_tokens}\n"));
    if let Some(text) = static_text {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            block.push_str("project notes:\n");
            block.push_str(trimmed);
            block.push('\n');
        }
    }
    if !recent_summaries.is_empty() {
        block.push_str("recent summaries:\n");
        for s in recent_summaries {
            block.push_str(&format!(
                "- iterations {}-{}: {}\n",
                s.start_iteration, s.end_iteration, s.summary
            ));
        }
    }
    block
}

/// Prepend the context block to the base prompt inside a single delimited
/// region. An empty block (nothing to add) leaves the prompt unchanged.
pub fn wrap_prompt(base_prompt: &str, block: &str) -> String {
    if block.trim().is_empty() {
        return base_prompt.to_string();
    }
    format!("<context>\n{block}</context>\n\n{base_prompt}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_defaults_to_fixed_value_when_unconfigured() {
        assert_eq!(compute_budget("gpt-4o", 0.0, 0), DEFAULT_BUDGET_TOKENS);
    }

    #[test]
    fn budget_is_percentage_of_context_window() {
        // gpt-4o has a 128_000 token window; 10% is 12_800.
        assert_eq!(compute_budget("gpt-4o", 10.0, 0), 12_800);
    }

    #[test]
    fn budget_is_capped_by_max_output_tokens() {
        assert_eq!(compute_budget("gpt-4o", 50.0, 1_000), 1_000);
    }

    #[test]
    fn estimate_tokens_of_empty_text_is_zero() {
        assert_eq!(estimate_tokens("   "), 0);
    }

    #[test]
    fn wrap_prompt_is_identity_when_block_is_empty() {
        assert_eq!(wrap_prompt("do the thing", ""), "do the thing");
    }

    #[test]
    fn wrap_prompt_prepends_delimited_block() {
        let wrapped = wrap_prompt("do the thing", "token budget: 500\n");
        assert!(wrapped.starts_with("<context>\n"));
        assert!(wrapped.ends_with("do the thing"));
    }

    #[test]
    fn missing_static_text_files_return_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_static_project_text(dir.path()).is_none());
    }

    #[test]
    fn agents_md_takes_priority_over_ralph_md() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "agents text").unwrap();
        std::fs::write(dir.path().join("RALPH.md"), "ralph text").unwrap();
        assert_eq!(read_static_project_text(dir.path()).unwrap(), "agents text");
    }
}
