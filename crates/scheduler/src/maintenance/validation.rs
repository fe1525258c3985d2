//! Create/update-time checks for maintenance records.

use chrono_tz::Tz;

use super::{SERVER_ZONE_ALIASES, derive_for, parse_cron, window_duration};
use crate::error::{Error, Result};
use crate::model::{Maintenance, MaintenanceStrategy};

fn misconfigured(maintenance: &Maintenance, reason: impl std::fmt::Display) -> Error {
    Error::MisconfiguredMaintenance(format!("maintenance {}: {}", maintenance.id, reason))
}

/// Validate a maintenance record, failing fast on the first problem
pub fn validate(maintenance: &Maintenance) -> Result<()> {
    if let Some(name) = maintenance.timezone.as_deref().map(str::trim) {
        if !SERVER_ZONE_ALIASES.contains(&name) && name.parse::<Tz>().is_err() {
            return Err(misconfigured(maintenance, format!("unknown timezone '{name}'")));
        }
    }

    if let Some(expr) = &maintenance.cron {
        if maintenance.duration_minutes.is_none_or(|m| m == 0) {
            return Err(misconfigured(maintenance, "cron requires duration_minutes"));
        }
        parse_cron(expr)?;
    }

    if let (Some(start), Some(end)) = (maintenance.start_datetime, maintenance.end_datetime) {
        if start > end {
            return Err(misconfigured(maintenance, "start_datetime is after end_datetime"));
        }
    }

    match maintenance.strategy {
        MaintenanceStrategy::Manual => {}
        MaintenanceStrategy::Single => {
            if maintenance.start_datetime.is_none() || maintenance.end_datetime.is_none() {
                return Err(misconfigured(
                    maintenance,
                    "single strategy requires start_datetime and end_datetime",
                ));
            }
        }
        MaintenanceStrategy::RecurringInterval => {
            require_start_time(maintenance)?;
            if maintenance.interval_day.is_none_or(|n| n == 0) {
                return Err(misconfigured(maintenance, "interval_day must be at least 1"));
            }
            window_duration(maintenance)?;
        }
        MaintenanceStrategy::RecurringWeekday => {
            require_start_time(maintenance)?;
            if maintenance.weekdays.is_empty() {
                return Err(misconfigured(maintenance, "weekdays must not be empty"));
            }
            if let Some(day) = maintenance.weekdays.iter().find(|d| **d > 7) {
                return Err(misconfigured(maintenance, format!("weekday {day} out of range 0-7")));
            }
            window_duration(maintenance)?;
        }
        MaintenanceStrategy::RecurringDayOfMonth => {
            require_start_time(maintenance)?;
            if maintenance.days_of_month.is_empty() {
                return Err(misconfigured(maintenance, "days_of_month must not be empty"));
            }
            if let Some(day) = maintenance.days_of_month.iter().find(|d| !(1..=31).contains(*d)) {
                return Err(misconfigured(
                    maintenance,
                    format!("day of month {day} out of range 1-31"),
                ));
            }
            window_duration(maintenance)?;
        }
        MaintenanceStrategy::Cron => {
            if maintenance.cron.is_none() {
                return Err(misconfigured(maintenance, "cron strategy requires a cron expression"));
            }
        }
        MaintenanceStrategy::Unknown => {
            return Err(misconfigured(maintenance, "unknown strategy"));
        }
    }

    Ok(())
}

fn require_start_time(maintenance: &Maintenance) -> Result<()> {
    if maintenance.start_time.is_none() {
        return Err(misconfigured(
            maintenance,
            format!("{} strategy requires start_time", maintenance.strategy),
        ));
    }
    Ok(())
}

/// Fill in the derived cron and duration, then validate
///
/// Called at create/update time so evaluation afterwards uses the stored
/// expression instead of re-deriving it.
pub fn normalize(mut maintenance: Maintenance) -> Result<Maintenance> {
    if maintenance.strategy.is_recurring() {
        if maintenance.duration_minutes.is_none() {
            if let Ok(duration) = window_duration(&maintenance) {
                maintenance.duration_minutes = u32::try_from(duration.num_minutes()).ok();
            }
        }
        if maintenance.cron.is_none() {
            maintenance.cron = derive_for(&maintenance);
        }
    }

    validate(&maintenance)?;
    Ok(maintenance)
}
