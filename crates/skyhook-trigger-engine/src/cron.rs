//! Cron expression evaluation.
//!
//! Computes fire times for cron expressions in a named timezone. Also backs
//! the schedule-preview surface ([`validate_cron_expression`],
//! [`next_execution_time`]) used by trigger-authoring UIs.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use super::errors::CronError;

/// Convert a 5-field cron expression to the 7-field format the `cron` crate expects.
///
/// Standard cron: `min hour day month weekday`
/// Cron crate:    `sec min hour day month weekday year`
fn normalize_cron_expression(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => format!("0 {expr} *"),
        6 => format!("0 {expr}"),
        _ => expr.to_string(),
    }
}

fn parse_schedule(expr: &str) -> Result<Schedule, CronError> {
    normalize_cron_expression(expr)
        .parse()
        .map_err(|e| CronError::Expression {
            expression: expr.to_string(),
            message: format!("{e}"),
        })
}

/// Resolve an IANA timezone name, defaulting to UTC when absent.
pub fn resolve_timezone(timezone: Option<&str>) -> Result<Tz, CronError> {
    match timezone {
        None => Ok(Tz::UTC),
        Some(name) => Tz::from_str(name).map_err(|_| CronError::Timezone {
            timezone: name.to_string(),
        }),
    }
}

/// Whether `expr` is a cron expression this engine can evaluate.
pub fn validate_cron_expression(expr: &str) -> bool {
    parse_schedule(expr).is_ok()
}

/// The first fire time strictly after `after`, evaluated in `tz`.
///
/// Returns `Ok(None)` for schedules with no remaining occurrences
/// (e.g. a fixed year in the past).
pub fn next_after(
    expr: &str,
    tz: Tz,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, CronError> {
    let schedule = parse_schedule(expr)?;
    let next = schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc));
    Ok(next)
}

/// Next fire time from now, for schedule-preview UIs.
///
/// Returns `None` for an invalid expression or timezone rather than raising;
/// preview callers only care whether there is a next time to show.
pub fn next_execution_time(expr: &str, timezone: Option<&str>) -> Option<DateTime<Utc>> {
    let tz = match resolve_timezone(timezone) {
        Ok(tz) => tz,
        Err(e) => {
            tracing::warn!(expression = %expr, "cannot compute next execution time: {e}");
            return None;
        }
    };
    match next_after(expr, tz, Utc::now()) {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!(expression = %expr, "cannot compute next execution time: {e}");
            None
        }
    }
}
