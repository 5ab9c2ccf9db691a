//! Cron evaluation
//!
//! Pure functions over `(expression, timezone, reference time)` so the
//! scheduler's correctness never depends on a mutable clock and tests can
//! inject reference times.
//!
//! Job expressions are five-field (`minute hour day-of-month month
//! day-of-week`) with `*/N` and comma lists; they are normalized by
//! prepending a seconds field before parsing. Six- and seven-field
//! expressions pass through for operators who want them. Evaluation happens
//! in the job's timezone (UTC by default), result is UTC.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use crate::error::CoreError;

/// Normalize a five-field expression to the six-field form the parser wants.
fn normalize(expr: &str) -> Result<String, CoreError> {
    match expr.split_whitespace().count() {
        5 => Ok(format!("0 {expr}")),
        6 | 7 => Ok(expr.to_string()),
        n => Err(CoreError::Validation(format!(
            "cron expression '{expr}' has {n} fields; expected 5"
        ))),
    }
}

fn parse(expr: &str) -> Result<Schedule, CoreError> {
    let normalized = normalize(expr)?;
    Schedule::from_str(&normalized)
        .map_err(|e| CoreError::Validation(format!("invalid cron expression '{expr}': {e}")))
}

fn parse_tz(timezone: Option<&str>) -> Result<Tz, CoreError> {
    match timezone {
        None => Ok(chrono_tz::UTC),
        Some(name) => name
            .parse()
            .map_err(|_| CoreError::Validation(format!("unknown timezone '{name}'"))),
    }
}

/// Smallest time strictly greater than `after` satisfying the expression.
pub fn next_after(
    expr: &str,
    timezone: Option<&str>,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, CoreError> {
    let schedule = parse(expr)?;
    let tz = parse_tz(timezone)?;
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| {
            CoreError::Validation(format!("cron expression '{expr}' has no future occurrence"))
        })
}

/// Boundary validation for user-supplied expressions and timezones.
pub fn validate(expr: &str, timezone: Option<&str>) -> Result<(), CoreError> {
    parse(expr)?;
    parse_tz(timezone)?;
    Ok(())
}
