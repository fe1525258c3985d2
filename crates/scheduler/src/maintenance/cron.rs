//! Cron derivation and parsing for maintenance windows.
//!
//! Maintenance records use classic five-field expressions
//! (`minute hour day-of-month month day-of-week`, Sunday = 0 or 7).
//! The `cron` crate wants a leading seconds field and numbers weekdays
//! 1 (Sunday) to 7 (Saturday), so expressions are translated before parsing.

use chrono::{NaiveTime, Timelike};
use cron::Schedule;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Build a cron expression from recurring-window fields
///
/// Weekdays win over days of month, which win over an interval. The
/// interval form (`*/N` on the day-of-month field) restarts every month and
/// is only an approximation of "every N days"; the evaluator uses an
/// anchored computation for that strategy instead.
pub fn derive_cron(
    start_time: NaiveTime,
    weekdays: &[u32],
    days_of_month: &[u32],
    interval_day: Option<u32>,
) -> Option<String> {
    let minute = start_time.minute();
    let hour = start_time.hour();

    if !weekdays.is_empty() {
        let mut days: Vec<u32> = weekdays.iter().map(|d| d % 7).collect();
        days.sort_unstable();
        days.dedup();
        return Some(format!("{minute} {hour} * * {}", join(&days)));
    }

    if !days_of_month.is_empty() {
        let mut days = days_of_month.to_vec();
        days.sort_unstable();
        days.dedup();
        return Some(format!("{minute} {hour} {} * *", join(&days)));
    }

    match interval_day {
        Some(n) if n > 0 => Some(format!("{minute} {hour} */{n} * *")),
        _ => None,
    }
}

fn join(values: &[u32]) -> String {
    values.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

/// Parse a five-field (or `cron` crate native six/seven-field) expression
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(Error::MisconfiguredMaintenance("cron expression cannot be empty".into()));
    }

    let translated = translate(expr)?;
    Schedule::from_str(&translated).map_err(|e| {
        Error::MisconfiguredMaintenance(format!("invalid cron expression '{expr}': {e}"))
    })
}

fn translate(expr: &str) -> Result<String> {
    if expr.starts_with('@') {
        return Ok(expr.to_string());
    }

    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => {
            fields.insert(0, "0".to_string());
            fields[5] = translate_weekdays(&fields[5])?;
        }
        6 | 7 => {}
        n => {
            return Err(Error::MisconfiguredMaintenance(format!(
                "invalid cron expression '{expr}': expected 5 fields, got {n}"
            )));
        }
    }
    Ok(fields.join(" "))
}

/// Map classic weekday numbers (0-7, Sunday = 0/7) onto the 1-7 range
fn translate_weekdays(field: &str) -> Result<String> {
    let mut parts = Vec::new();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };

        let mapped = if range == "*" || range == "?" {
            range.to_string()
        } else if let Some((start, end)) = range.split_once('-') {
            match (weekday_number(start)?, weekday_number(end)?) {
                // Sunday at both ends covers the whole week
                (Some(0), Some(7)) => "1-7".to_string(),
                // "5-7" reaches Sunday at the end of the week
                (Some(start), Some(7)) if start > 0 => {
                    parts.push("1".to_string());
                    format!("{}-7", start + 1)
                }
                (Some(start), Some(end)) => format!("{}-{}", start % 7 + 1, end % 7 + 1),
                _ => range.to_string(),
            }
        } else {
            match weekday_number(range)? {
                Some(day) => (day % 7 + 1).to_string(),
                None => range.to_string(),
            }
        };

        parts.push(match step {
            Some(step) => format!("{mapped}/{step}"),
            None => mapped,
        });
    }

    Ok(parts.join(","))
}

/// Numeric weekday, `None` for names which the `cron` crate understands as-is
fn weekday_number(value: &str) -> Result<Option<u32>> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Ok(None);
    }
    let day: u32 = value
        .parse()
        .map_err(|_| Error::MisconfiguredMaintenance(format!("invalid weekday '{value}'")))?;
    if day > 7 {
        return Err(Error::MisconfiguredMaintenance(format!("weekday {day} out of range 0-7")));
    }
    Ok(Some(day))
}
