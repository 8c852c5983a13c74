//! Projection of recurring events onto a visible window.
//!
//! Occurrences are computed on every read and never persisted.

use std::collections::HashSet;

use chrono::{Datelike, Duration, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;

use crate::db::models::{Event, Recurrence};
use crate::services::validation::{format_date_iso, local_midnight, parse_date_iso};

/// Separator between source id and occurrence date in a virtual occurrence id.
pub const VIRTUAL_ID_SEPARATOR: &str = "::";

/// One row of a calendar listing: a persisted event or a virtual occurrence of one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    #[serde(flatten)]
    pub event: Event,
    /// Set on virtual occurrences: id of the persisted event they were projected from.
    pub occurrence_of: Option<String>,
}

impl CalendarEntry {
    pub fn persisted(event: Event) -> Self {
        CalendarEntry {
            event,
            occurrence_of: None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.occurrence_of.is_some()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        parse_date_iso(&self.event.date_iso)
    }
}

pub fn is_virtual_id(id: &str) -> bool {
    id.contains(VIRTUAL_ID_SEPARATOR)
}

/// Expand `events` over the inclusive window `[from, to]`. Occurrence instants are
/// local midnight in `tz`.
///
/// The result holds every input event unchanged, in input order, followed by the
/// virtual occurrences of each recurring event in date order. Entries sharing an
/// `(id, date)` key are collapsed, first one wins.
pub fn expand(events: &[Event], from: NaiveDate, to: NaiveDate, tz: Tz) -> Vec<CalendarEntry> {
    let mut entries: Vec<CalendarEntry> =
        events.iter().cloned().map(CalendarEntry::persisted).collect();

    for event in events {
        if event.is_deleted() || !event.recurrence.is_recurring() {
            continue;
        }
        let Some(anchor) = parse_date_iso(&event.date_iso) else {
            continue;
        };

        let dates = match event.recurrence {
            Recurrence::Weekly => weekly_dates(anchor, from, to),
            Recurrence::Monthly => monthly_dates(anchor, from, to),
            Recurrence::None => Vec::new(),
        };

        for date in dates {
            entries.push(virtual_occurrence(event, date, tz));
        }
    }

    dedupe(entries)
}

fn virtual_occurrence(source: &Event, date: NaiveDate, tz: Tz) -> CalendarEntry {
    let date_iso = format_date_iso(date);
    let mut event = source.clone();
    event.id = format!("{}{}{}", source.id, VIRTUAL_ID_SEPARATOR, date_iso);
    event.date_start = local_midnight(date, tz);
    event.date_iso = date_iso;

    CalendarEntry {
        event,
        occurrence_of: Some(source.id.clone()),
    }
}

fn dedupe(entries: Vec<CalendarEntry>) -> Vec<CalendarEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert((e.event.id.clone(), e.event.date_iso.clone())))
        .collect()
}

/// Anchor plus whole weeks, inside `[from, to]`, excluding the anchor itself.
fn weekly_dates(anchor: NaiveDate, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();

    let mut candidate = if anchor >= from {
        anchor
    } else {
        let behind = (from - anchor).num_days();
        let weeks = (behind + 6) / 7;
        match anchor.checked_add_signed(Duration::weeks(weeks)) {
            Some(d) => d,
            None => return dates,
        }
    };

    while candidate <= to {
        if candidate != anchor {
            dates.push(candidate);
        }
        candidate = match candidate.checked_add_signed(Duration::weeks(1)) {
            Some(d) => d,
            None => break,
        };
    }

    dates
}

/// The anchor's day-of-month (clamped to short months), month by month from the
/// window's first month, inside `[from, to]` and strictly after the anchor.
fn monthly_dates(anchor: NaiveDate, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let (mut year, mut month) = (from.year(), from.month());

    loop {
        let Some(candidate) = clamped_date(year, month, anchor.day()) else {
            break;
        };
        if candidate > to {
            break;
        }
        if candidate >= from && candidate > anchor {
            dates.push(candidate);
        }

        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }

    dates
}

/// `day` in the given month, or the month's last day when it is shorter.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let last = last_day_of_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day.min(last.day()))
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}
