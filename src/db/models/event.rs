use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Closed enumerations (lenient parsing)
// ============================================================================

/// Workflow status of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Pending,
    Done,
    Cancelled,
}

impl EventStatus {
    pub const ALL: [EventStatus; 3] = [
        EventStatus::Pending,
        EventStatus::Done,
        EventStatus::Cancelled,
    ];

    /// Lenient parse: anything unrecognized becomes `Pending`.
    pub fn sanitize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "done" => EventStatus::Done,
            "cancelled" => EventStatus::Cancelled,
            _ => EventStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Done => "done",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurrence rule attached to an event. Serialized as `""`, `"weekly"` or `"monthly"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recurrence {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
}

impl Recurrence {
    pub const ALL: [Recurrence; 3] = [Recurrence::None, Recurrence::Weekly, Recurrence::Monthly];

    /// Lenient parse: anything unrecognized becomes `None`.
    pub fn sanitize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "weekly" => Recurrence::Weekly,
            "monthly" => Recurrence::Monthly,
            _ => Recurrence::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::None => "",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event documents
// ============================================================================

/// Source tag for events created through the UI.
pub const SOURCE_MANUAL: &str = "manual";
/// Default source tag for bulk imports that do not name one.
pub const SOURCE_IMPORT: &str = "import";

/// A persisted calendar event.
///
/// `date_iso` is the canonical calendar day; `date_start` is the same day's local
/// midnight as an instant and only exists to make range queries cheap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    pub category: String,
    pub status: EventStatus,
    pub notes: String,
    pub assigned_to: String,
    pub recurrence: Recurrence,
    pub date_start: DateTime<Utc>,
    #[serde(rename = "dateISO")]
    pub date_iso: String,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub source: String,
    pub source_hash: Option<String>,
}

impl Event {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The user-editable fields, used for change detection.
    pub fn fields(&self) -> EventFields {
        EventFields {
            title: self.title.clone(),
            category: self.category.clone(),
            status: self.status,
            notes: self.notes.clone(),
            assigned_to: self.assigned_to.clone(),
            recurrence: self.recurrence,
            date_iso: self.date_iso.clone(),
        }
    }
}

/// The tracked, user-editable subset of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub title: String,
    pub category: String,
    pub status: EventStatus,
    pub notes: String,
    pub assigned_to: String,
    pub recurrence: Recurrence,
    pub date_iso: String,
}

/// A validated event ready to be inserted.
#[derive(Debug, Clone)]
pub struct CreateEvent {
    pub fields: EventFields,
    pub date_start: DateTime<Utc>,
    pub actor: String,
    pub source: String,
    pub source_hash: Option<String>,
}

/// A validated full replacement of an event's editable fields.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub fields: EventFields,
    pub date_start: DateTime<Utc>,
    pub actor: String,
    pub source_hash: Option<String>,
}
