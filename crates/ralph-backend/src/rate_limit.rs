//! Extracts a [`RateLimitInfo`] from backend output text and/or response
//! headers.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use ralph_types::RateLimitInfo;
use regex::Regex;
use std::time::Duration;

const SUBSTRINGS: &[&str] = &["rate limit", "quota exceeded", "too many requests"];

static RETRY_AFTER_PHRASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)retry-after\s+(\d+)\s*([a-z]+)").unwrap());
static TRY_AGAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)try again in\s+(\d+)\s*([a-z]+)").unwrap());
static RESETS_AT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)resets at\s+([^\n\r]+)").unwrap());

fn unit_to_secs(unit: &str) -> Option<u64> {
    let unit = unit.to_lowercase();
    match unit.as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3600),
        _ => None,
    }
}

fn parse_duration_match(caps: &regex::Captures) -> Option<Duration> {
    let n: u64 = caps.get(1)?.as_str().parse().ok()?;
    let mult = unit_to_secs(caps.get(2)?.as_str())?;
    Some(Duration::from_secs(n * mult))
}

/// Try a fixed list of timestamp formats: RFC3339, RFC1123/RFC822 (both
/// handled by chrono's RFC2822 parser), `YYYY-MM-DD HH:MM:SS [TZ]`, and Unix
/// epoch seconds.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim().trim_end_matches(['.', ',']);

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Some((head, _tz)) = raw.rsplit_once(' ') {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S") {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        return Utc.timestamp_opt(epoch, 0).single();
    }
    None
}

/// Parse an HTTP `Retry-After` header value: either an integer number of
/// seconds, or an HTTP date.
fn parse_retry_after_header(value: &str) -> Option<RateLimitInfo> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(RateLimitInfo {
            retry_after: Some(Duration::from_secs(secs)),
            window_resets: None,
            pattern: "retry-after-header-seconds".into(),
        });
    }
    let resets = parse_timestamp(value)?;
    Some(RateLimitInfo {
        retry_after: None,
        window_resets: Some(resets),
        pattern: "retry-after-header-date".into(),
    })
}

/// Scan `text` (and, if present, a case-insensitive `retry-after` header)
/// for a rate-limit signal.
pub fn parse(text: &str, headers: &HashMap<String, String>) -> Option<RateLimitInfo> {
    if let Some(value) = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
        .map(|(_, v)| v)
    {
        if let Some(info) = parse_retry_after_header(value) {
            return Some(info);
        }
    }

    if let Some(caps) = RETRY_AFTER_PHRASE_RE.captures(text) {
        if let Some(duration) = parse_duration_match(&caps) {
            return Some(RateLimitInfo {
                retry_after: Some(duration),
                window_resets: None,
                pattern: "retry-after-phrase".into(),
            });
        }
    }
    if let Some(caps) = TRY_AGAIN_RE.captures(text) {
        if let Some(duration) = parse_duration_match(&caps) {
            return Some(RateLimitInfo {
                retry_after: Some(duration),
                window_resets: None,
                pattern: "try-again-in".into(),
            });
        }
    }
    if let Some(caps) = RESETS_AT_RE.captures(text) {
        if let Some(resets) = parse_timestamp(&caps[1]) {
            return Some(RateLimitInfo {
                retry_after: None,
                window_resets: Some(resets),
                pattern: "resets-at".into(),
            });
        }
    }

    let lower = text.to_lowercase();
    if SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return Some(RateLimitInfo {
            retry_after: Some(Duration::from_secs(60)),
            window_resets: None,
            pattern: "substring-fallback".into(),
        });
    }

    None
}
