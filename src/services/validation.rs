//! Boundary checks for event input.
//!
//! Raw form or import input is normalized here exactly once: field aliases are
//! resolved during deserialization, closed enumerations go through their
//! `sanitize` functions, and required fields are validated before anything
//! reaches the store.

use std::fmt;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::db::models::{EventFields, EventStatus, Recurrence};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Dates
// ============================================================================

/// Parse a strict `yyyy-mm-dd` string into a real calendar date.
pub fn parse_date_iso(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    if bytes.len() != 10 {
        return None;
    }
    let shape_ok = bytes.iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        _ => b.is_ascii_digit(),
    });
    if !shape_ok {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

pub fn format_date_iso(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Instant of the first moment of `date` in `tz`.
///
/// Days whose midnight is skipped by a DST transition start at the first valid
/// local time after it.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let mut local = date.and_time(chrono::NaiveTime::MIN);
    for _ in 0..24 {
        match tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => local += Duration::hours(1),
        }
    }
    // Unreachable for real zones; fall back to treating the date as UTC.
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// `[startOfDay(from), startOfDay(to + 1))` in `tz`, as UTC instants.
pub fn day_bounds(from: NaiveDate, to: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let end_day = to.succ_opt().unwrap_or(to);
    (local_midnight(from, tz), local_midnight(end_day, tz))
}

// ============================================================================
// Validation errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldProblem {
    pub field: String,
    pub message: String,
}

/// Human-readable problems in form order. `focus` names the first offending field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub focus: Option<String>,
    pub problems: Vec<FieldProblem>,
}

impl ValidationErrors {
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        if self.focus.is_none() {
            self.focus = Some(field.to_string());
        }
        self.problems.push(FieldProblem {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.push(field, message);
        errors
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.problems.iter().map(|p| p.message.as_str()).collect();
        f.write_str(&messages.join("; "))
    }
}

// ============================================================================
// Input shapes
// ============================================================================

/// Raw create-form input.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub title: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "dateISO", alias = "date_iso")]
    pub date: Option<String>,
    pub status: Option<String>,
    pub recurrence: Option<String>,
    pub notes: Option<String>,
    #[serde(alias = "assignee", alias = "assigned", alias = "assigned_to")]
    pub assigned_to: Option<String>,
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    pub title: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "dateISO", alias = "date_iso")]
    pub date: Option<String>,
    pub status: Option<String>,
    pub recurrence: Option<String>,
    pub notes: Option<String>,
    #[serde(alias = "assignee", alias = "assigned", alias = "assigned_to")]
    pub assigned_to: Option<String>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.category.is_none()
            && self.date.is_none()
            && self.status.is_none()
            && self.recurrence.is_none()
            && self.notes.is_none()
            && self.assigned_to.is_none()
    }
}

fn trimmed(value: Option<&String>) -> String {
    value.map(|s| s.trim().to_string()).unwrap_or_default()
}

fn check_date(raw: &str, errors: &mut ValidationErrors) -> Option<NaiveDate> {
    if raw.is_empty() {
        errors.push("date", "Date is required");
        return None;
    }
    match parse_date_iso(raw) {
        Some(date) => Some(date),
        None => {
            errors.push("date", format!("Date '{}' is not a valid yyyy-mm-dd date", raw));
            None
        }
    }
}

/// Validate and normalize create input.
pub fn validate_new_event(input: &EventInput) -> Result<EventFields, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let title = trimmed(input.title.as_ref());
    if title.is_empty() {
        errors.push("title", "Title is required");
    }

    let category = trimmed(input.category.as_ref());
    if category.is_empty() {
        errors.push("category", "Category is required");
    }

    let date = check_date(&trimmed(input.date.as_ref()), &mut errors);

    match date {
        Some(date) if errors.is_empty() => Ok(EventFields {
            title,
            category,
            status: EventStatus::sanitize(input.status.as_deref().unwrap_or_default()),
            notes: trimmed(input.notes.as_ref()),
            assigned_to: trimmed(input.assigned_to.as_ref()),
            recurrence: Recurrence::sanitize(input.recurrence.as_deref().unwrap_or_default()),
            date_iso: format_date_iso(date),
        }),
        _ => Err(errors),
    }
}

/// Apply a partial update over existing fields.
pub fn apply_patch(existing: &EventFields, patch: &EventPatch) -> Result<EventFields, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let mut fields = existing.clone();

    if let Some(title) = patch.title.as_ref() {
        let title = title.trim();
        if title.is_empty() {
            errors.push("title", "Title is required");
        } else {
            fields.title = title.to_string();
        }
    }

    if let Some(category) = patch.category.as_ref() {
        let category = category.trim();
        if category.is_empty() {
            errors.push("category", "Category is required");
        } else {
            fields.category = category.to_string();
        }
    }

    if let Some(date) = patch.date.as_ref() {
        if let Some(date) = check_date(date.trim(), &mut errors) {
            fields.date_iso = format_date_iso(date);
        }
    }

    if let Some(status) = patch.status.as_deref() {
        fields.status = EventStatus::sanitize(status);
    }
    if let Some(recurrence) = patch.recurrence.as_deref() {
        fields.recurrence = Recurrence::sanitize(recurrence);
    }
    if let Some(notes) = patch.notes.as_ref() {
        fields.notes = notes.trim().to_string();
    }
    if let Some(assigned_to) = patch.assigned_to.as_ref() {
        fields.assigned_to = assigned_to.trim().to_string();
    }

    if errors.is_empty() {
        Ok(fields)
    } else {
        Err(errors)
    }
}
