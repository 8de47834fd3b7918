use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Aggregate bucket used when a task or routine carries no project.
pub const DEFAULT_PROJECT_BUCKET: &str = "(none)";

/// Reusable task definition, never tied to a calendar date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Routine {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub planned_minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_start_at: Option<String>,
    /// Weekdays eligible for auto-expansion, 0 (Sunday) .. 6 (Saturday).
    /// Absent means every day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub flagged: bool,
}

impl Routine {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "routine.id")?;
        validate_non_empty(&self.title, "routine.title")?;
        if let Some(planned_start_at) = &self.planned_start_at {
            validate_hhmm(planned_start_at, "routine.planned_start_at")?;
        }
        if let Some(days) = &self.days {
            if days.iter().any(|day| *day > 6) {
                return Err("routine.days entries must be 0..=6".to_string());
            }
        }
        Ok(())
    }

    /// Whether auto-expansion should materialize this routine on the given
    /// weekday (0 = Sunday .. 6 = Saturday).
    pub fn runs_on_weekday(&self, weekday: u8) -> bool {
        match &self.days {
            Some(days) => days.contains(&weekday),
            None => true,
        }
    }
}

/// A concrete, date-scoped occurrence of work. `routine_id` is a weak
/// back-reference; absence means the task was added ad hoc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DayTask {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub planned_minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<String>,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub flagged: bool,
}

impl DayTask {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        validate_date(&self.date, "task.date")?;
        if let Some(scheduled_at) = &self.scheduled_at {
            validate_hhmm(scheduled_at, "task.scheduled_at")?;
        }
        Ok(())
    }

    /// Planned minutes normalized per the data-model invariant: negative
    /// values count as zero.
    pub fn planned(&self) -> i64 {
        self.planned_minutes.max(0)
    }

    pub fn project_bucket(&self) -> &str {
        self.project.as_deref().unwrap_or(DEFAULT_PROJECT_BUCKET)
    }
}

/// Named time-of-day block. `end_at` numerically below `start_at` denotes a
/// block that wraps past midnight (e.g. 22:00-06:00).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub name: String,
    pub start_at: String,
    pub end_at: String,
    #[serde(default)]
    pub order: i64,
}

impl Section {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "section.id")?;
        validate_non_empty(&self.name, "section.name")?;
        validate_hhmm(&self.start_at, "section.start_at")?;
        validate_hhmm(&self.end_at, "section.end_at")?;
        Ok(())
    }
}

/// Immutable closed work interval. Intervals spanning local midnight are
/// split before storage, so a persisted entry never covers more than one
/// calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunEntry {
    pub id: String,
    pub task_id: String,
    pub start_at: i64,
    pub end_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RunEntry {
    /// Stable segment id, idempotent for a given task and start instant.
    pub fn segment_id(task_id: &str, start_at: i64) -> String {
        format!("{task_id}:{start_at}")
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "run.id")?;
        validate_non_empty(&self.task_id, "run.task_id")?;
        if self.end_at < self.start_at {
            return Err("run.end_at must be >= run.start_at".to_string());
        }
        Ok(())
    }

    pub fn minutes(&self) -> i64 {
        run_minutes(self.start_at, self.end_at)
    }
}

/// The single process-wide open interval, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentRun {
    pub task_id: String,
    pub start_at: i64,
}

/// Per-project planned/actual minute totals for one day.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectMinutes {
    pub planned: i64,
    pub actual: i64,
}

pub type DayAggregate = BTreeMap<String, ProjectMinutes>;

/// Rounded whole minutes of an epoch-ms interval, never negative.
pub fn run_minutes(start_ms: i64, end_ms: i64) -> i64 {
    let diff = end_ms - start_ms;
    let rounded = (diff as f64 / 60_000.0).round() as i64;
    rounded.max(0)
}

/// Parse "HH:mm" into minutes of day. Returns `None` on malformed input.
pub fn parse_hhmm(value: &str) -> Option<u32> {
    let time = NaiveTime::parse_from_str(value, "%H:%M").ok()?;
    Some(time.hour() * 60 + time.minute())
}

pub fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    if parse_hhmm(value).is_none() {
        return Err(format!("{field_name} must be HH:MM"));
    }
    Ok(())
}

pub fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}
