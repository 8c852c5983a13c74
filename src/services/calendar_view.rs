//! Month grid view-model.
//!
//! The view state (`CalendarView`) is a plain value owned by the caller; building
//! a grid never mutates it, and navigation returns a new view.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::db::models::EventStatus;
use crate::error::{AppError, AppResult};
use crate::services::events::{EventFilters, EventService, RangeQuery};
use crate::services::recurrence::CalendarEntry;
use crate::services::validation::format_date_iso;
use crate::AppState;

#[derive(Debug, Clone)]
pub struct CalendarView {
    pub year: i32,
    pub month: u32,
    pub filters: EventFilters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthRef {
    pub year: i32,
    pub month: u32,
}

impl CalendarView {
    pub fn new(year: i32, month: u32, filters: EventFilters) -> AppResult<Self> {
        if !(1..=12).contains(&month) || !(1900..=9999).contains(&year) {
            return Err(AppError::BadRequest(format!(
                "Invalid month {}-{:02}",
                year, month
            )));
        }
        Ok(CalendarView {
            year,
            month,
            filters,
        })
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        let next = self.next();
        next.first_day().pred_opt().unwrap_or_default()
    }

    /// First and last day shown: whole Monday-to-Sunday weeks covering the month.
    pub fn grid_bounds(&self) -> (NaiveDate, NaiveDate) {
        let first = self.first_day();
        let last = self.last_day();
        let lead = i64::from(first.weekday().num_days_from_monday());
        let trail = 6 - i64::from(last.weekday().num_days_from_monday());
        (first - Duration::days(lead), last + Duration::days(trail))
    }

    pub fn next(&self) -> Self {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        CalendarView {
            year,
            month,
            filters: self.filters.clone(),
        }
    }

    pub fn previous(&self) -> Self {
        let (year, month) = if self.month == 1 {
            (self.year - 1, 12)
        } else {
            (self.year, self.month - 1)
        };
        CalendarView {
            year,
            month,
            filters: self.filters.clone(),
        }
    }

    fn month_ref(&self) -> MonthRef {
        MonthRef {
            year: self.year,
            month: self.month,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCell {
    pub date: String,
    pub in_month: bool,
    pub entries: Vec<CalendarEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusTotals {
    pub pending: usize,
    pub done: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    pub from: String,
    pub to: String,
    pub weeks: Vec<Vec<DayCell>>,
    /// Entries per status, counting only days inside the month.
    pub totals: StatusTotals,
    pub previous: MonthRef,
    pub next: MonthRef,
}

/// Lay `entries` out on the view's grid. Entries outside the grid are dropped.
pub fn build_grid(view: &CalendarView, entries: Vec<CalendarEntry>) -> MonthGrid {
    let (from, to) = view.grid_bounds();
    let mut days: Vec<DayCell> = Vec::new();
    let mut day = from;
    while day <= to {
        days.push(DayCell {
            date: format_date_iso(day),
            in_month: day.month() == view.month && day.year() == view.year,
            entries: Vec::new(),
        });
        day += Duration::days(1);
    }

    let mut totals = StatusTotals::default();
    for entry in entries {
        let Some(date) = entry.date() else {
            continue;
        };
        if date < from || date > to {
            continue;
        }
        let index = (date - from).num_days() as usize;
        if days[index].in_month {
            match entry.event.status {
                EventStatus::Pending => totals.pending += 1,
                EventStatus::Done => totals.done += 1,
                EventStatus::Cancelled => totals.cancelled += 1,
            }
        }
        days[index].entries.push(entry);
    }

    for cell in days.iter_mut() {
        cell.entries.sort_by_key(|e| e.event.title.to_lowercase());
    }

    let weeks = days.chunks(7).map(|w| w.to_vec()).collect();

    MonthGrid {
        year: view.year,
        month: view.month,
        from: format_date_iso(from),
        to: format_date_iso(to),
        weeks,
        totals,
        previous: view.previous().month_ref(),
        next: view.next().month_ref(),
    }
}

pub struct CalendarService;

impl CalendarService {
    pub async fn month(state: &Arc<AppState>, view: &CalendarView) -> AppResult<MonthGrid> {
        let (from, to) = view.grid_bounds();
        let query = RangeQuery {
            from,
            to,
            filters: view.filters.clone(),
        };
        let entries = EventService::list_range(state, &query).await?;
        Ok(build_grid(view, entries))
    }
}
