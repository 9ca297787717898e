//! Model context-window lookup, used to turn `max_context_pct` into an
//! absolute token budget. Out-of-scope to model precisely per backend; a
//! small built-in table with a generous default covers the common cases.

const DEFAULT_CONTEXT_LENGTH: u64 = 128_000;

const KNOWN: &[(&str, u64)] = &[
    ("claude-opus-4", 200_000),
    ("claude-sonnet-4", 200_000),
    ("claude-haiku-4", 200_000),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-3.5-turbo", 16_000),
    ("gemini-1.5-pro", 1_000_000),
];

/// Context window length, in tokens, for `model`. Unknown models fall back
/// to a conservative default rather than erroring.
pub fn context_length(model: &str) -> u64 {
    KNOWN
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, len)| *len)
        .unwrap_or(DEFAULT_CONTEXT_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_returns_its_window() {
        assert_eq!(context_length("claude-opus-4"), 200_000);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(context_length("some-future-model"), DEFAULT_CONTEXT_LENGTH);
    }
}
