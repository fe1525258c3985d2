//! Maintenance window evaluation.
//!
//! Given a maintenance record and a wall clock, decides whether the linked
//! monitors are currently under maintenance. All rules are evaluated in the
//! record's timezone. A record that cannot be evaluated is treated as *not*
//! under maintenance so probes keep running.

pub mod cron;
pub mod validation;

pub use self::cron::{derive_cron, parse_cron};
pub use validation::{normalize, validate};

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{Maintenance, MaintenanceStrategy};

/// Zone names that mean "no particular zone"
const SERVER_ZONE_ALIASES: &[&str] = &["", "UTC", "SAME_AS_SERVER"];

/// Resolve a maintenance timezone, falling back to UTC
pub fn resolve_timezone(name: Option<&str>) -> Tz {
    let name = name.map(str::trim).unwrap_or_default();
    if SERVER_ZONE_ALIASES.contains(&name) {
        return Tz::UTC;
    }
    name.parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone = name, "Unknown maintenance timezone, evaluating in UTC");
        Tz::UTC
    })
}

/// Whether `maintenance` is in effect at `now`, failing open on bad records
pub fn is_under_maintenance(maintenance: &Maintenance, now: DateTime<Utc>) -> bool {
    match evaluate(maintenance, now) {
        Ok(active) => active,
        Err(e) => {
            warn!(
                maintenance_id = %maintenance.id,
                strategy = %maintenance.strategy,
                "Cannot evaluate maintenance, treating as inactive: {}",
                e
            );
            false
        }
    }
}

/// Evaluate a maintenance record at `now`
pub fn evaluate(maintenance: &Maintenance, now: DateTime<Utc>) -> Result<bool> {
    if !maintenance.active {
        return Ok(false);
    }
    if maintenance.strategy == MaintenanceStrategy::Manual {
        return Ok(true);
    }

    let tz = resolve_timezone(maintenance.timezone.as_deref());
    let now_loc = now.with_timezone(&tz);
    let in_period = in_datetime_period(maintenance, now_loc.naive_local());

    match maintenance.strategy {
        MaintenanceStrategy::Single => Ok(in_period),
        MaintenanceStrategy::RecurringInterval => {
            Ok(in_period && in_recurring_interval(maintenance, &now_loc)?)
        }
        MaintenanceStrategy::RecurringWeekday
        | MaintenanceStrategy::RecurringDayOfMonth
        | MaintenanceStrategy::Cron => {
            if !in_period {
                return Ok(false);
            }
            let expr = match &maintenance.cron {
                Some(expr) => expr.clone(),
                None => derive_for(maintenance).ok_or_else(|| {
                    Error::MisconfiguredMaintenance(format!(
                        "maintenance {} has no cron expression and none can be derived",
                        maintenance.id
                    ))
                })?,
            };
            in_cron_window(&now_loc, &expr, window_duration(maintenance)?)
        }
        MaintenanceStrategy::Manual | MaintenanceStrategy::Unknown => Ok(false),
    }
}

/// `start_datetime <= now <= end_datetime`, open on missing bounds
fn in_datetime_period(maintenance: &Maintenance, now: NaiveDateTime) -> bool {
    let after_start = maintenance.start_datetime.is_none_or(|start| start <= now);
    let before_end = maintenance.end_datetime.is_none_or(|end| now <= end);
    after_start && before_end
}

/// Cron expression derived from the recurring-window fields
pub(crate) fn derive_for(maintenance: &Maintenance) -> Option<String> {
    let start_time = maintenance.start_time?;
    match maintenance.strategy {
        MaintenanceStrategy::RecurringWeekday => {
            derive_cron(start_time, &maintenance.weekdays, &[], None)
        }
        MaintenanceStrategy::RecurringDayOfMonth => {
            derive_cron(start_time, &[], &maintenance.days_of_month, None)
        }
        MaintenanceStrategy::RecurringInterval => {
            derive_cron(start_time, &[], &[], maintenance.interval_day)
        }
        _ => derive_cron(
            start_time,
            &maintenance.weekdays,
            &maintenance.days_of_month,
            maintenance.interval_day,
        ),
    }
}

/// Length of one window: `duration_minutes`, else `end_time - start_time`
pub(crate) fn window_duration(maintenance: &Maintenance) -> Result<Duration> {
    if let Some(minutes) = maintenance.duration_minutes.filter(|m| *m > 0) {
        return Ok(Duration::minutes(i64::from(minutes)));
    }

    match (maintenance.start_time, maintenance.end_time) {
        (Some(start), Some(end)) => {
            let mut minutes = (end - start).num_minutes();
            if minutes <= 0 {
                minutes += 24 * 60;
            }
            Ok(Duration::minutes(minutes))
        }
        _ => Err(Error::MisconfiguredMaintenance(format!(
            "maintenance {} needs duration_minutes or start_time/end_time",
            maintenance.id
        ))),
    }
}

/// Half-open window `[fire, fire + duration)` around the latest fire time
fn in_cron_window(now: &DateTime<Tz>, expr: &str, duration: Duration) -> Result<bool> {
    let schedule = parse_cron(expr)?;
    let window_open = *now - duration;
    // First fire strictly after (now - duration) is inside the window iff it
    // has already happened.
    Ok(schedule.after(&window_open).next().is_some_and(|fire| fire <= *now))
}

/// Anchored repetition every `interval_day` days starting at `start_time`
///
/// The anchor is the day of `start_datetime`, or January 1st of the current
/// year when the record has no start.
fn in_recurring_interval(maintenance: &Maintenance, now: &DateTime<Tz>) -> Result<bool> {
    let interval = maintenance.interval_day.filter(|n| *n > 0).ok_or_else(|| {
        Error::MisconfiguredMaintenance(format!(
            "maintenance {} needs interval_day >= 1",
            maintenance.id
        ))
    })?;
    let start_time = maintenance.start_time.ok_or_else(|| {
        Error::MisconfiguredMaintenance(format!("maintenance {} needs start_time", maintenance.id))
    })?;
    let duration = window_duration(maintenance)?;

    let tz = now.timezone();
    let today = now.date_naive();
    let anchor = match maintenance.start_datetime {
        Some(start) => start.date(),
        None => NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
    };

    let elapsed_days = (today - anchor).num_days();
    if elapsed_days < 0 {
        return Ok(false);
    }

    let interval = i64::from(interval);
    let mut occurrence = elapsed_days - elapsed_days.rem_euclid(interval);
    // Earlier occurrences matter when a window spans more than the interval
    // or crosses midnight.
    let lookback = duration.num_days() / interval + 1;

    for _ in 0..=lookback {
        if occurrence < 0 {
            break;
        }
        if let Some(day) = anchor.checked_add_days(Days::new(occurrence as u64)) {
            let fire_local = day.and_time(start_time);
            if let Some(fire) = tz.from_local_datetime(&fire_local).earliest() {
                if fire <= *now && *now < fire + duration {
                    return Ok(true);
                }
            }
        }
        occurrence -= interval;
    }

    Ok(false)
}
