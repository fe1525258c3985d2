use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a maintenance window is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceStrategy {
    /// Active until switched off by an operator
    Manual,
    /// One window between `start_datetime` and `end_datetime`
    Single,
    /// Every `interval_day` days from an anchor day
    RecurringInterval,
    /// On `weekdays` (0 = Sunday) at `start_time`
    RecurringWeekday,
    /// On `days_of_month` at `start_time`
    RecurringDayOfMonth,
    /// Arbitrary cron expression plus `duration_minutes`
    Cron,
    #[serde(other)]
    Unknown,
}

impl MaintenanceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceStrategy::Manual => "manual",
            MaintenanceStrategy::Single => "single",
            MaintenanceStrategy::RecurringInterval => "recurring-interval",
            MaintenanceStrategy::RecurringWeekday => "recurring-weekday",
            MaintenanceStrategy::RecurringDayOfMonth => "recurring-day-of-month",
            MaintenanceStrategy::Cron => "cron",
            MaintenanceStrategy::Unknown => "unknown",
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(
            self,
            MaintenanceStrategy::RecurringInterval
                | MaintenanceStrategy::RecurringWeekday
                | MaintenanceStrategy::RecurringDayOfMonth
        )
    }
}

impl FromStr for MaintenanceStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "manual" => MaintenanceStrategy::Manual,
            "single" => MaintenanceStrategy::Single,
            "recurring-interval" => MaintenanceStrategy::RecurringInterval,
            "recurring-weekday" => MaintenanceStrategy::RecurringWeekday,
            "recurring-day-of-month" => MaintenanceStrategy::RecurringDayOfMonth,
            "cron" => MaintenanceStrategy::Cron,
            _ => MaintenanceStrategy::Unknown,
        })
    }
}

impl fmt::Display for MaintenanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maintenance record
///
/// Date/time fields are wall-clock values in `timezone` (UTC when unset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Maintenance {
    pub id: String,
    pub org_id: String,
    pub title: String,
    pub strategy: MaintenanceStrategy,
    pub active: bool,

    pub start_datetime: Option<NaiveDateTime>,
    pub end_datetime: Option<NaiveDateTime>,

    /// Daily window start for recurring strategies
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,

    /// 0 = Sunday ... 6 = Saturday (7 is accepted as Sunday)
    #[serde(default)]
    pub weekdays: Vec<u32>,
    #[serde(default)]
    pub days_of_month: Vec<u32>,
    pub interval_day: Option<u32>,

    /// Five-field cron expression, derived for recurring strategies
    pub cron: Option<String>,
    pub duration_minutes: Option<u32>,

    /// IANA zone name
    pub timezone: Option<String>,

    /// Linked monitors
    #[serde(default)]
    pub monitor_ids: Vec<String>,
}

impl Maintenance {
    pub fn new(id: impl Into<String>, strategy: MaintenanceStrategy) -> Self {
        Self {
            id: id.into(),
            org_id: String::new(),
            title: String::new(),
            strategy,
            active: true,
            start_datetime: None,
            end_datetime: None,
            start_time: None,
            end_time: None,
            weekdays: Vec::new(),
            days_of_month: Vec::new(),
            interval_day: None,
            cron: None,
            duration_minutes: None,
            timezone: None,
            monitor_ids: Vec::new(),
        }
    }
}
