//! A small 5-field cron matcher (`minute hour day-of-month month
//! day-of-week`), plus a gate that ensures a given schedule fires at most
//! once per minute even if the orchestrator's tick loop is faster than
//! that.

use chrono::{DateTime, Datelike, Timelike, Utc};

/// One cron field, expanded to the set of values it matches.
#[derive(Debug, Clone)]
struct Field(Vec<u32>);

impl Field {
    fn parse(raw: &str, min: u32, max: u32) -> Option<Self> {
        let mut values = Vec::new();
        for part in raw.split(',') {
            values.extend(Self::parse_part(part, min, max)?);
        }
        if values.is_empty() {
            return None;
        }
        values.sort_unstable();
        values.dedup();
        Some(Field(values))
    }

    fn parse_part(part: &str, min: u32, max: u32) -> Option<Vec<u32>> {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => (r, Some(s.parse::<u32>().ok()?)),
            None => (part, None),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)
        } else {
            let v = range.parse::<u32>().ok()?;
            (v, v)
        };
        if lo > hi || hi > max || lo < min {
            return None;
        }
        let step = step.unwrap_or(1);
        if step == 0 {
            return None;
        }
        Some((lo..=hi).step_by(step as usize).collect())
    }

    fn matches(&self, value: u32) -> bool {
        self.0.contains(&value)
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpr {
    /// Parse a cron expression. Returns `None` for anything that isn't
    /// exactly five well-formed whitespace-separated fields — callers
    /// should treat a parse failure the same as "never matches".
    pub fn parse(expr: &str) -> Option<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return None;
        };
        Some(CronExpr {
            minute: Field::parse(minute, 0, 59)?,
            hour: Field::parse(hour, 0, 23)?,
            day_of_month: Field::parse(dom, 1, 31)?,
            month: Field::parse(month, 1, 12)?,
            day_of_week: Field::parse(dow, 0, 6)?,
        })
    }

    /// Whether `when` falls on a minute this expression selects. Day-of-month
    /// and day-of-week are ANDed (standard cron OR-of-restricted-fields
    /// semantics is not implemented — unnecessary for this schedule's use).
    pub fn matches(&self, when: DateTime<Utc>) -> bool {
        self.minute.matches(when.minute())
            && self.hour.matches(when.hour())
            && self.day_of_month.matches(when.day())
            && self.month.matches(when.month())
            && self.day_of_week.matches(when.weekday().num_days_from_sunday())
    }
}

/// Wraps a [`CronExpr`] with the "fire at most once per minute" gate a
/// schedule rule needs when the orchestrator's evaluation tick is sub-minute.
#[derive(Debug)]
pub struct CronGate {
    expr: CronExpr,
    last_fired_minute: Option<(i64, u32)>,
}

impl CronGate {
    pub fn new(expr: CronExpr) -> Self {
        CronGate {
            expr,
            last_fired_minute: None,
        }
    }

    /// Check whether the rule should fire at `when`. Returns `true` at most
    /// once per distinct (day, minute-of-day) pair.
    pub fn check(&mut self, when: DateTime<Utc>) -> bool {
        let key = (when.num_days_from_ce() as i64, when.num_seconds_from_midnight() / 60);
        if self.last_fired_minute == Some(key) {
            return false;
        }
        if !self.expr.matches(when) {
            return false;
        }
        self.last_fired_minute = Some(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn wildcard_matches_everything() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        assert!(expr.matches(dt(2026, 7, 31, 13, 45)));
    }

    #[test]
    fn exact_fields() {
        let expr = CronExpr::parse("30 9 1 1 *").unwrap();
        assert!(expr.matches(dt(2026, 1, 1, 9, 30)));
        assert!(!expr.matches(dt(2026, 1, 1, 9, 31)));
        assert!(!expr.matches(dt(2026, 2, 1, 9, 30)));
    }

    #[test]
    fn step_values() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert!(expr.matches(dt(2026, 7, 31, 0, 0)));
        assert!(expr.matches(dt(2026, 7, 31, 0, 15)));
        assert!(!expr.matches(dt(2026, 7, 31, 0, 20)));
    }

    #[test]
    fn list_and_range() {
        let expr = CronExpr::parse("0 9-17 * * 1,3,5").unwrap();
        assert!(expr.matches(dt(2026, 7, 31, 12, 0))); // Friday
        assert!(!expr.matches(dt(2026, 8, 1, 12, 0))); // Saturday
        assert!(!expr.matches(dt(2026, 7, 31, 18, 0)));
    }

    #[test]
    fn malformed_expressions_fail_to_parse() {
        assert!(CronExpr::parse("* * * *").is_none());
        assert!(CronExpr::parse("60 * * * *").is_none());
        assert!(CronExpr::parse("* * * * * *").is_none());
        assert!(CronExpr::parse("*/0 * * * *").is_none());
    }

    #[test]
    fn gate_fires_at_most_once_per_minute() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let mut gate = CronGate::new(expr);
        let t = dt(2026, 7, 31, 9, 0);
        assert!(gate.check(t));
        assert!(!gate.check(t));
        assert!(!gate.check(dt(2026, 7, 31, 9, 0)));
        assert!(gate.check(dt(2026, 7, 31, 10, 0)));
    }
}
