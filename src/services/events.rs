use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info};

use crate::db::models::{CreateEvent, Event, EventFields, UpdateEvent, SOURCE_MANUAL};
use crate::db::EventRepository;
use crate::error::{AppError, AppResult};
use crate::services::feed::ChangeKind;
use crate::services::fingerprint::fingerprint;
use crate::services::recurrence::{expand, is_virtual_id, CalendarEntry};
use crate::services::validation::{
    apply_patch, day_bounds, local_midnight, parse_date_iso, validate_new_event, EventInput,
    EventPatch, ValidationErrors,
};
use crate::AppState;

/// Optional listing filters. Blank values are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilters {
    pub category: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
    /// Free text matched against title, notes and assignee.
    pub q: Option<String>,
}

fn normalized(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

impl EventFilters {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(category) = normalized(&self.category) {
            if event.category.to_lowercase() != category {
                return false;
            }
        }
        if let Some(status) = normalized(&self.status) {
            if event.status.as_str() != status {
                return false;
            }
        }
        if let Some(assignee) = normalized(&self.assignee) {
            if event.assigned_to.to_lowercase() != assignee {
                return false;
            }
        }
        if let Some(q) = normalized(&self.q) {
            let hit = event.title.to_lowercase().contains(&q)
                || event.notes.to_lowercase().contains(&q)
                || event.assigned_to.to_lowercase().contains(&q);
            if !hit {
                return false;
            }
        }
        true
    }
}

/// An inclusive window of calendar days plus filters.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub filters: EventFilters,
}

impl RangeQuery {
    /// Build a query from raw `yyyy-mm-dd` bounds.
    pub fn parse(from: &str, to: &str, filters: EventFilters) -> AppResult<Self> {
        let from = parse_date_iso(from.trim())
            .ok_or_else(|| AppError::BadRequest(format!("Invalid 'from' date '{}'", from)))?;
        let to = parse_date_iso(to.trim())
            .ok_or_else(|| AppError::BadRequest(format!("Invalid 'to' date '{}'", to)))?;
        Ok(RangeQuery { from, to, filters })
    }
}

pub struct EventService;

impl EventService {
    /// Validate form input and persist a new event.
    pub async fn create(state: &Arc<AppState>, actor: &str, input: &EventInput) -> AppResult<Event> {
        let fields = validate_new_event(input)?;
        let date_start = Self::date_start(state, &fields)?;
        let source_hash = Some(Self::fingerprint_of(&fields));

        let event = EventRepository::insert(
            &state.db,
            CreateEvent {
                fields,
                date_start,
                actor: actor.to_string(),
                source: SOURCE_MANUAL.to_string(),
                source_hash,
            },
        )
        .await?;

        info!("Event {} created by {}", event.id, actor);
        state.feed.publish(ChangeKind::Created, Some(&event.id), actor);
        Ok(event)
    }

    /// Fetch an event, live or trashed.
    pub async fn get(state: &Arc<AppState>, id: &str) -> AppResult<Event> {
        if is_virtual_id(id) {
            return Err(not_found(id));
        }
        EventRepository::find_by_id(&state.db, id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Apply a partial update to a live event. Unchanged input issues no write.
    pub async fn update(
        state: &Arc<AppState>,
        actor: &str,
        id: &str,
        patch: &EventPatch,
    ) -> AppResult<Event> {
        let existing = Self::get_live(state, id).await?;
        let current = existing.fields();
        let fields = apply_patch(&current, patch)?;

        if fields == current {
            debug!("Update of event {} by {} changed nothing", id, actor);
            return Ok(existing);
        }

        // Only a hash derived from the fields follows them; an importer's key is kept.
        let derived = existing.source_hash.as_deref() == Some(Self::fingerprint_of(&current).as_str());
        let source_hash = if derived && !fingerprint_inputs_equal(&current, &fields) {
            Some(Self::fingerprint_of(&fields))
        } else {
            existing.source_hash.clone()
        };
        let date_start = Self::date_start(state, &fields)?;

        let updated = EventRepository::update(
            &state.db,
            id,
            UpdateEvent {
                fields,
                date_start,
                actor: actor.to_string(),
                source_hash,
            },
        )
        .await?
        .ok_or_else(|| not_found(id))?;

        info!("Event {} updated by {}", id, actor);
        state.feed.publish(ChangeKind::Updated, Some(id), actor);
        Ok(updated)
    }

    /// Move a live event to the trash.
    pub async fn soft_delete(state: &Arc<AppState>, actor: &str, id: &str) -> AppResult<Event> {
        if is_virtual_id(id) {
            return Err(not_found(id));
        }
        let deleted = EventRepository::soft_delete(&state.db, id, actor)
            .await?
            .ok_or_else(|| not_found(id))?;

        info!("Event {} trashed by {}", id, actor);
        state.feed.publish(ChangeKind::Deleted, Some(id), actor);
        Ok(deleted)
    }

    /// Bring a trashed event back. Restoring a live event returns it unchanged.
    pub async fn restore(state: &Arc<AppState>, actor: &str, id: &str) -> AppResult<Event> {
        let existing = Self::get(state, id).await?;
        if !existing.is_deleted() {
            return Ok(existing);
        }

        let restored = EventRepository::restore(&state.db, id, actor)
            .await?
            .ok_or_else(|| not_found(id))?;

        info!("Event {} restored by {}", id, actor);
        state.feed.publish(ChangeKind::Restored, Some(id), actor);
        Ok(restored)
    }

    /// Live events and virtual occurrences inside the window, filtered, ordered by
    /// date then title.
    pub async fn list_range(state: &Arc<AppState>, query: &RangeQuery) -> AppResult<Vec<CalendarEntry>> {
        if query.from > query.to {
            return Err(AppError::BadRequest(
                "'from' must not be after 'to'".to_string(),
            ));
        }
        let span = (query.to - query.from).num_days() + 1;
        if span > state.config.calendar.max_range_days {
            return Err(AppError::BadRequest(format!(
                "Range of {} days exceeds the maximum of {}",
                span, state.config.calendar.max_range_days
            )));
        }

        let tz = state.config.calendar.timezone;
        let (start, end) = day_bounds(query.from, query.to, tz);

        let mut events = EventRepository::find_recurring_before(&state.db, start).await?;
        events.extend(EventRepository::find_in_range(&state.db, start, end).await?);

        let mut entries: Vec<CalendarEntry> = expand(&events, query.from, query.to, tz)
            .into_iter()
            .filter(|entry| {
                entry
                    .date()
                    .is_some_and(|d| d >= query.from && d <= query.to)
            })
            .filter(|entry| query.filters.matches(&entry.event))
            .collect();

        entries.sort_by(|a, b| {
            a.event
                .date_iso
                .cmp(&b.event.date_iso)
                .then_with(|| a.event.title.to_lowercase().cmp(&b.event.title.to_lowercase()))
        });

        debug!(
            "Listed {} entries for {}..{}",
            entries.len(),
            query.from,
            query.to
        );
        Ok(entries)
    }

    pub async fn list_trash(state: &Arc<AppState>) -> AppResult<Vec<Event>> {
        EventRepository::find_trashed(&state.db).await
    }

    async fn get_live(state: &Arc<AppState>, id: &str) -> AppResult<Event> {
        let event = Self::get(state, id).await?;
        if event.is_deleted() {
            return Err(not_found(id));
        }
        Ok(event)
    }

    pub(crate) fn date_start(
        state: &Arc<AppState>,
        fields: &EventFields,
    ) -> AppResult<chrono::DateTime<chrono::Utc>> {
        let date = parse_date_iso(&fields.date_iso)
            .ok_or_else(|| ValidationErrors::single("date", "Date is not a valid yyyy-mm-dd date"))?;
        Ok(local_midnight(date, state.config.calendar.timezone))
    }

    pub(crate) fn fingerprint_of(fields: &EventFields) -> String {
        fingerprint(&fields.title, &fields.date_iso, &fields.category, &fields.notes)
    }
}

fn fingerprint_inputs_equal(a: &EventFields, b: &EventFields) -> bool {
    a.title == b.title && a.date_iso == b.date_iso && a.category == b.category && a.notes == b.notes
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Event '{}' not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{EventStatus, Recurrence};
    use crate::test_support::test_state;

    const ACTOR: &str = "ana@example.com";

    fn input(title: &str, date: &str) -> EventInput {
        EventInput {
            title: Some(title.to_string()),
            category: Some("meeting".to_string()),
            date: Some(date.to_string()),
            ..Default::default()
        }
    }

    fn range(from: &str, to: &str) -> RangeQuery {
        RangeQuery::parse(from, to, EventFilters::default()).unwrap()
    }

    #[tokio::test]
    async fn create_then_read_round_trips_fields() {
        let state = test_state().await;
        let created = EventService::create(
            &state,
            ACTOR,
            &EventInput {
                status: Some("done".to_string()),
                notes: Some(" bring slides ".to_string()),
                assigned_to: Some("Bo".to_string()),
                recurrence: Some("monthly".to_string()),
                ..input("Review", "2026-01-05")
            },
        )
        .await
        .unwrap();

        let read = EventService::get(&state, &created.id).await.unwrap();
        assert_eq!(read.title, "Review");
        assert_eq!(read.category, "meeting");
        assert_eq!(read.status, EventStatus::Done);
        assert_eq!(read.notes, "bring slides");
        assert_eq!(read.assigned_to, "Bo");
        assert_eq!(read.recurrence, Recurrence::Monthly);
        assert_eq!(read.date_iso, "2026-01-05");
        assert_eq!(read.source, SOURCE_MANUAL);
        assert!(read.source_hash.is_some());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_writing() {
        let state = test_state().await;
        let err = EventService::create(&state, ACTOR, &input("", "2026-02-31"))
            .await
            .unwrap_err();
        match err {
            AppError::Validation(errors) => {
                assert_eq!(errors.focus.as_deref(), Some("title"));
                assert_eq!(errors.problems.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(EventService::list_trash(&state).await.unwrap().is_empty());
        let listed = EventService::list_range(&state, &range("2026-02-01", "2026-02-28"))
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn status_only_update_leaves_other_fields() {
        let state = test_state().await;
        let created = EventService::create(
            &state,
            ACTOR,
            &EventInput {
                assigned_to: Some("Bo".to_string()),
                ..input("Deploy", "2026-01-05")
            },
        )
        .await
        .unwrap();

        let patch = EventPatch {
            status: Some("done".to_string()),
            ..Default::default()
        };
        let updated = EventService::update(&state, "bo@example.com", &created.id, &patch)
            .await
            .unwrap();

        assert_eq!(updated.status, EventStatus::Done);
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.category, created.category);
        assert_eq!(updated.date_iso, created.date_iso);
        assert_eq!(updated.assigned_to, "Bo");
        assert_eq!(updated.source_hash, created.source_hash);
        assert_eq!(updated.updated_by, "bo@example.com");
        assert_eq!(updated.created_by, ACTOR);
    }

    #[tokio::test]
    async fn derived_hash_follows_title_edits() {
        let state = test_state().await;
        let created = EventService::create(&state, ACTOR, &input("Deploy", "2026-01-05"))
            .await
            .unwrap();

        let patch = EventPatch {
            title: Some("Deploy v2".to_string()),
            ..Default::default()
        };
        let updated = EventService::update(&state, ACTOR, &created.id, &patch)
            .await
            .unwrap();
        assert_eq!(
            updated.source_hash,
            Some(fingerprint("Deploy v2", "2026-01-05", "meeting", ""))
        );
    }

    #[tokio::test]
    async fn update_and_delete_of_trashed_event_is_not_found() {
        let state = test_state().await;
        let created = EventService::create(&state, ACTOR, &input("Deploy", "2026-01-05"))
            .await
            .unwrap();
        EventService::soft_delete(&state, ACTOR, &created.id)
            .await
            .unwrap();

        let patch = EventPatch {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            EventService::update(&state, ACTOR, &created.id, &patch).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            EventService::soft_delete(&state, ACTOR, &created.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            EventService::soft_delete(&state, ACTOR, "missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn trash_is_a_filter_not_an_erasure() {
        let state = test_state().await;
        let created = EventService::create(&state, ACTOR, &input("Deploy", "2026-01-05"))
            .await
            .unwrap();
        let mut rx = state.feed.subscribe();

        EventService::soft_delete(&state, ACTOR, &created.id)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Deleted);

        let window = range("2026-01-01", "2026-01-31");
        assert!(EventService::list_range(&state, &window).await.unwrap().is_empty());
        assert_eq!(EventService::list_trash(&state).await.unwrap().len(), 1);

        let restored = EventService::restore(&state, ACTOR, &created.id)
            .await
            .unwrap();
        assert!(restored.deleted_at.is_none());
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Restored);
        assert_eq!(EventService::list_range(&state, &window).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn virtual_ids_are_never_written() {
        let state = test_state().await;
        let created = EventService::create(
            &state,
            ACTOR,
            &EventInput {
                recurrence: Some("weekly".to_string()),
                ..input("Standup", "2026-01-05")
            },
        )
        .await
        .unwrap();

        let virtual_id = format!("{}::2026-01-12", created.id);
        let patch = EventPatch {
            status: Some("done".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            EventService::update(&state, ACTOR, &virtual_id, &patch).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            EventService::soft_delete(&state, ACTOR, &virtual_id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_projects_recurring_events_from_earlier_months() {
        let state = test_state().await;
        EventService::create(
            &state,
            ACTOR,
            &EventInput {
                recurrence: Some("weekly".to_string()),
                ..input("Standup", "2025-12-29")
            },
        )
        .await
        .unwrap();
        EventService::create(&state, ACTOR, &input("Launch", "2026-01-15"))
            .await
            .unwrap();

        let entries = EventService::list_range(&state, &range("2026-01-01", "2026-01-31"))
            .await
            .unwrap();
        let dates: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.event.date_iso.as_str(), e.event.title.as_str()))
            .collect();
        assert_eq!(
            dates,
            vec![
                ("2026-01-05", "Standup"),
                ("2026-01-12", "Standup"),
                ("2026-01-15", "Launch"),
                ("2026-01-19", "Standup"),
                ("2026-01-26", "Standup"),
            ]
        );
        assert!(entries.iter().filter(|e| e.event.title == "Standup").all(|e| e.is_virtual()));
    }

    #[tokio::test]
    async fn filters_apply_to_occurrences() {
        let state = test_state().await;
        EventService::create(
            &state,
            ACTOR,
            &EventInput {
                assigned_to: Some("Bo".to_string()),
                ..input("Standup", "2026-01-05")
            },
        )
        .await
        .unwrap();
        EventService::create(
            &state,
            ACTOR,
            &EventInput {
                category: Some("deadline".to_string()),
                notes: Some("quarterly numbers".to_string()),
                ..input("Report", "2026-01-07")
            },
        )
        .await
        .unwrap();

        let by_category = RangeQuery::parse(
            "2026-01-01",
            "2026-01-31",
            EventFilters {
                category: Some("Deadline".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let found = EventService::list_range(&state, &by_category).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].event.title, "Report");

        let by_text = RangeQuery::parse(
            "2026-01-01",
            "2026-01-31",
            EventFilters {
                q: Some("QUARTERLY".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(EventService::list_range(&state, &by_text).await.unwrap().len(), 1);

        let by_assignee = RangeQuery::parse(
            "2026-01-01",
            "2026-01-31",
            EventFilters {
                assignee: Some("bo".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let found = EventService::list_range(&state, &by_assignee).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].event.title, "Standup");
    }

    #[tokio::test]
    async fn oversized_or_inverted_windows_are_rejected() {
        let state = test_state().await;
        assert!(matches!(
            EventService::list_range(&state, &range("2026-01-31", "2026-01-01")).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            EventService::list_range(&state, &range("2026-01-01", "2026-06-30")).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            RangeQuery::parse("2026-1-1", "2026-01-31", EventFilters::default()),
            Err(AppError::BadRequest(_))
        ));
    }
}
