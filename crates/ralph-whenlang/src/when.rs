//! WhenLang: a deliberately total little predicate language.
//!
//! Grammar accepted:
//!   - the bare token `has_error`;
//!   - `<var> <op> <number>` with `op in {>, >=, <, <=, ==, !=}`;
//!   - `<var> % <int> <op> <number>` (modulo form).
//!
//! Anything else — unknown variables, unknown operators, non-numeric
//! values, empty expressions — evaluates to `false`. Never an error: user
//! authored schedule rules must not be able to crash the orchestrator.

/// The fixed name space WhenLang expressions are evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct Facts {
    pub iteration: u64,
    pub error_count: u64,
    pub consec_errors: u64,
    pub cost: f64,
    pub tokens: u64,
    pub elapsed_minutes: f64,
    pub has_error: bool,
}

impl Facts {
    fn lookup(&self, name: &str) -> Option<f64> {
        match name {
            "iteration" => Some(self.iteration as f64),
            "error_count" => Some(self.error_count as f64),
            "consec_errors" => Some(self.consec_errors as f64),
            "cost" => Some(self.cost),
            "tokens" => Some(self.tokens as f64),
            "elapsed" => Some(self.elapsed_minutes),
            "has_error" => Some(if self.has_error { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

fn compare(op: &str, lhs: f64, rhs: f64) -> bool {
    match op {
        ">" => lhs > rhs,
        ">=" => lhs >= rhs,
        "<" => lhs < rhs,
        "<=" => lhs <= rhs,
        "==" => (lhs - rhs).abs() < f64::EPSILON,
        "!=" => (lhs - rhs).abs() >= f64::EPSILON,
        _ => false,
    }
}

/// Evaluate a WhenLang expression against a set of facts. Total: never
/// panics or errors, malformed input simply evaluates to `false`.
pub fn eval(expr: &str, facts: &Facts) -> bool {
    let tokens: Vec<&str> = expr.split_whitespace().collect();
    match tokens.as_slice() {
        [] => false,
        ["has_error"] => facts.has_error,
        [var, op, rhs] => {
            let (Some(lhs), Ok(rhs)) = (facts.lookup(var), rhs.parse::<f64>()) else {
                return false;
            };
            compare(op, lhs, rhs)
        }
        [var, modulo, divisor, op, rhs] if *modulo == "%" => {
            let (Some(lhs), Ok(divisor), Ok(rhs)) = (
                facts.lookup(var),
                divisor.parse::<i64>(),
                rhs.parse::<f64>(),
            ) else {
                return false;
            };
            if divisor == 0 {
                return false;
            }
            compare(op, (lhs as i64).rem_euclid(divisor) as f64, rhs)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> Facts {
        Facts {
            iteration: 10,
            error_count: 2,
            consec_errors: 3,
            cost: 1.5,
            tokens: 4000,
            elapsed_minutes: 12.0,
            has_error: true,
        }
    }

    #[test]
    fn bare_has_error() {
        assert!(eval("has_error", &facts()));
        let mut f = facts();
        f.has_error = false;
        assert!(!eval("has_error", &f));
    }

    #[test]
    fn simple_comparisons() {
        assert!(eval("consec_errors >= 3", &facts()));
        assert!(eval("cost > 1", &facts()));
        assert!(!eval("cost > 2", &facts()));
        assert!(eval("iteration == 10", &facts()));
        assert!(eval("iteration != 11", &facts()));
    }

    #[test]
    fn modulo_form() {
        assert!(eval("iteration % 5 == 0", &facts()));
        assert!(!eval("iteration % 3 == 0", &facts()));
    }

    #[test]
    fn modulo_by_zero_is_false() {
        assert!(!eval("iteration % 0 == 0", &facts()));
    }

    #[test]
    fn unknown_variable_is_false() {
        assert!(!eval("nonexistent > 0", &facts()));
    }

    #[test]
    fn unknown_operator_is_false() {
        assert!(!eval("iteration <> 5", &facts()));
    }

    #[test]
    fn non_numeric_value_is_false() {
        assert!(!eval("iteration > banana", &facts()));
    }

    #[test]
    fn empty_expression_is_false() {
        assert!(!eval("", &facts()));
        assert!(!eval("   ", &facts()));
    }

    #[test]
    fn garbage_expression_is_false() {
        assert!(!eval("this is not valid at all", &facts()));
    }
}
