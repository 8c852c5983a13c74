//! Bulk import with fingerprint-driven upsert.
//!
//! Each row resolves to create, update or skip against the live event sharing
//! its fingerprint. Rows are independent: a failing row is recorded and the
//! batch carries on.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::models::{CreateEvent, Event, EventFields, EventStatus, Recurrence, UpdateEvent, SOURCE_IMPORT};
use crate::db::EventRepository;
use crate::error::{AppError, AppResult};
use crate::services::events::EventService;
use crate::services::feed::ChangeKind;
use crate::services::fingerprint::fingerprint;
use crate::services::validation::{
    format_date_iso, parse_date_iso, validate_new_event, EventInput, ValidationErrors,
};
use crate::AppState;

/// One raw import record. Every field is optional; presence decides merge priority.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRow {
    pub title: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "dateISO", alias = "date_iso")]
    pub date: Option<String>,
    pub status: Option<String>,
    pub recurrence: Option<String>,
    pub notes: Option<String>,
    #[serde(alias = "assignee", alias = "assigned", alias = "assigned_to")]
    pub assigned_to: Option<String>,
    pub source: Option<String>,
    #[serde(alias = "fingerprint", alias = "source_hash")]
    pub source_hash: Option<String>,
}

impl ImportRow {
    fn to_input(&self) -> EventInput {
        EventInput {
            title: self.title.clone(),
            category: self.category.clone(),
            date: self.date.clone(),
            status: self.status.clone(),
            recurrence: self.recurrence.clone(),
            notes: self.notes.clone(),
            assigned_to: self.assigned_to.clone(),
        }
    }

    /// Explicit fingerprint, or one computed from the row when `dedupe` is on.
    fn resolve_hash(&self, dedupe: bool) -> Option<String> {
        if let Some(hash) = present(&self.source_hash) {
            return Some(hash.to_string());
        }
        if !dedupe {
            return None;
        }
        Some(fingerprint(
            self.title.as_deref().unwrap_or_default(),
            self.date.as_deref().unwrap_or_default(),
            self.category.as_deref().unwrap_or_default(),
            self.notes.as_deref().unwrap_or_default(),
        ))
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub rows: Vec<ImportRow>,
    /// Source tag for rows that do not carry their own.
    #[serde(default)]
    pub source: Option<String>,
    /// Compute fingerprints for rows without one.
    #[serde(default = "default_true")]
    pub dedupe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOutcome {
    Created,
    Updated,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportItem {
    pub index: usize,
    pub outcome: ImportOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub items: Vec<ImportItem>,
    pub events: Vec<Event>,
}

impl ImportSummary {
    fn record(&mut self, index: usize, outcome: ImportOutcome, event: Option<Event>, message: Option<String>) {
        match outcome {
            ImportOutcome::Created => self.created += 1,
            ImportOutcome::Updated => self.updated += 1,
            ImportOutcome::Skipped => self.skipped += 1,
            ImportOutcome::Error => self.errors += 1,
        }
        self.items.push(ImportItem {
            index,
            outcome,
            event_id: event.as_ref().map(|e| e.id.clone()),
            message,
        });
        if let Some(event) = event {
            self.events.push(event);
        }
    }
}

/// A present field is `Some` and not blank.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Merge incoming row fields over existing ones. Absent or blank incoming
/// fields keep the existing value.
fn merge_row(existing: &EventFields, row: &ImportRow) -> Result<EventFields, ValidationErrors> {
    let mut fields = existing.clone();

    if let Some(title) = present(&row.title) {
        fields.title = title.to_string();
    }
    if let Some(category) = present(&row.category) {
        fields.category = category.to_string();
    }
    if let Some(date) = present(&row.date) {
        let date = parse_date_iso(date).ok_or_else(|| {
            ValidationErrors::single("date", format!("Date '{}' is not a valid yyyy-mm-dd date", date))
        })?;
        fields.date_iso = format_date_iso(date);
    }
    if let Some(status) = present(&row.status) {
        fields.status = EventStatus::sanitize(status);
    }
    if let Some(recurrence) = present(&row.recurrence) {
        fields.recurrence = Recurrence::sanitize(recurrence);
    }
    if let Some(notes) = present(&row.notes) {
        fields.notes = notes.to_string();
    }
    if let Some(assigned_to) = present(&row.assigned_to) {
        fields.assigned_to = assigned_to.to_string();
    }

    Ok(fields)
}

pub struct ImportService;

impl ImportService {
    pub async fn import(
        state: &Arc<AppState>,
        actor: &str,
        request: &ImportRequest,
    ) -> AppResult<ImportSummary> {
        let max_rows = state.config.import.max_rows;
        if request.rows.len() > max_rows {
            return Err(AppError::BadRequest(format!(
                "Import of {} rows exceeds the maximum of {}",
                request.rows.len(),
                max_rows
            )));
        }

        let hashes: Vec<Option<String>> = request
            .rows
            .iter()
            .map(|row| row.resolve_hash(request.dedupe))
            .collect();

        let mut lookup_keys: Vec<String> = hashes.iter().flatten().cloned().collect();
        lookup_keys.sort();
        lookup_keys.dedup();

        let mut known: HashMap<String, Event> = HashMap::new();
        if !lookup_keys.is_empty() {
            let existing = EventRepository::find_by_source_hashes(
                &state.db,
                &lookup_keys,
                state.config.import.lookup_chunk_size,
            )
            .await?;
            for event in existing {
                if let Some(hash) = event.source_hash.clone() {
                    known.entry(hash).or_insert(event);
                }
            }
        }

        let batch_source = present(&request.source).unwrap_or(SOURCE_IMPORT).to_string();
        let mut summary = ImportSummary::default();

        for (index, (row, hash)) in request.rows.iter().zip(hashes).enumerate() {
            let result = Self::upsert_row(state, actor, row, hash, &batch_source, &mut known).await;
            match result {
                Ok((outcome, event)) => summary.record(index, outcome, Some(event), None),
                Err(e) => {
                    warn!("Import row {} failed: {}", index, e);
                    summary.record(index, ImportOutcome::Error, None, Some(e.to_string()));
                }
            }
        }

        info!(
            "Import by {}: {} created, {} updated, {} skipped, {} errors",
            actor, summary.created, summary.updated, summary.skipped, summary.errors
        );
        if summary.created + summary.updated > 0 {
            state.feed.publish(ChangeKind::Imported, None, actor);
        }

        Ok(summary)
    }

    async fn upsert_row(
        state: &Arc<AppState>,
        actor: &str,
        row: &ImportRow,
        hash: Option<String>,
        batch_source: &str,
        known: &mut HashMap<String, Event>,
    ) -> AppResult<(ImportOutcome, Event)> {
        let Some(hash) = hash else {
            let event = Self::create_row(state, actor, row, None, batch_source).await?;
            return Ok((ImportOutcome::Created, event));
        };

        let Some(existing) = known.get(&hash).cloned() else {
            let event = Self::create_row(state, actor, row, Some(hash.clone()), batch_source).await?;
            known.insert(hash, event.clone());
            return Ok((ImportOutcome::Created, event));
        };

        let current = existing.fields();
        let merged = merge_row(&current, row)?;
        if merged == current {
            return Ok((ImportOutcome::Skipped, existing));
        }

        let date_start = EventService::date_start(state, &merged)?;
        let updated = EventRepository::update(
            &state.db,
            &existing.id,
            UpdateEvent {
                fields: merged,
                date_start,
                actor: actor.to_string(),
                source_hash: existing.source_hash.clone(),
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event '{}' not found", existing.id)))?;

        known.insert(hash, updated.clone());
        Ok((ImportOutcome::Updated, updated))
    }

    async fn create_row(
        state: &Arc<AppState>,
        actor: &str,
        row: &ImportRow,
        hash: Option<String>,
        batch_source: &str,
    ) -> AppResult<Event> {
        let fields = validate_new_event(&row.to_input())?;
        let date_start = EventService::date_start(state, &fields)?;
        let source = present(&row.source).unwrap_or(batch_source).to_string();

        EventRepository::insert(
            &state.db,
            CreateEvent {
                fields,
                date_start,
                actor: actor.to_string(),
                source,
                source_hash: hash,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::events::{EventFilters, RangeQuery};
    use crate::test_support::{test_state, test_state_with};

    const ACTOR: &str = "importer@example.com";

    fn row(title: &str, category: &str, date: &str, notes: &str) -> ImportRow {
        ImportRow {
            title: Some(title.to_string()),
            category: Some(category.to_string()),
            date: Some(date.to_string()),
            notes: Some(notes.to_string()),
            ..Default::default()
        }
    }

    fn request(rows: Vec<ImportRow>) -> ImportRequest {
        ImportRequest {
            rows,
            source: Some("csv".to_string()),
            dedupe: true,
        }
    }

    async fn live_count(state: &Arc<AppState>) -> usize {
        let query = RangeQuery::parse("2026-01-01", "2026-02-28", EventFilters::default()).unwrap();
        EventService::list_range(state, &query).await.unwrap().len()
    }

    #[tokio::test]
    async fn casing_variants_collapse_into_one_event() {
        let state = test_state().await;
        let summary = ImportService::import(
            &state,
            ACTOR,
            &request(vec![
                row("Team Sync", "Meeting", "2026-01-05", "Room 4"),
                row("  team sync ", " MEETING", "2026-01-05", "room 4 "),
            ]),
        )
        .await
        .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated + summary.skipped, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.items[0].event_id, summary.items[1].event_id);
        assert_eq!(live_count(&state).await, 1);
        assert_eq!(summary.events[0].source, "csv");
    }

    #[tokio::test]
    async fn same_batch_twice_is_all_skips() {
        let state = test_state().await;
        let batch = request(vec![
            row("Team Sync", "meeting", "2026-01-05", ""),
            row("Release", "deadline", "2026-01-20", "v2"),
            row("Retro", "meeting", "2026-02-02", ""),
        ]);

        let first = ImportService::import(&state, ACTOR, &batch).await.unwrap();
        assert_eq!(first.created, 3);

        let second = ImportService::import(&state, ACTOR, &batch).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(live_count(&state).await, 3);
    }

    #[tokio::test]
    async fn partial_rows_never_erase_existing_fields() {
        let state = test_state().await;
        let mut full = row("Audit", "ops", "2026-01-12", "bring badge");
        full.assigned_to = Some("Bo".to_string());
        full.source_hash = Some("ext-1".to_string());
        ImportService::import(&state, ACTOR, &request(vec![full]))
            .await
            .unwrap();

        let partial = ImportRow {
            status: Some("done".to_string()),
            notes: Some("   ".to_string()),
            source_hash: Some("ext-1".to_string()),
            ..Default::default()
        };
        let summary = ImportService::import(&state, ACTOR, &request(vec![partial]))
            .await
            .unwrap();

        assert_eq!(summary.updated, 1);
        let event = &summary.events[0];
        assert_eq!(event.status, EventStatus::Done);
        assert_eq!(event.title, "Audit");
        assert_eq!(event.notes, "bring badge");
        assert_eq!(event.assigned_to, "Bo");
        assert_eq!(event.date_iso, "2026-01-12");
        assert_eq!(event.source_hash.as_deref(), Some("ext-1"));
    }

    #[tokio::test]
    async fn bad_rows_are_counted_and_the_batch_continues() {
        let state = test_state().await;
        let summary = ImportService::import(
            &state,
            ACTOR,
            &request(vec![
                row("One", "meeting", "2026-01-05", ""),
                row("", "meeting", "2026-01-06", ""),
                row("Three", "meeting", "2026-02-30", ""),
                row("Four", "meeting", "2026-01-08", ""),
            ]),
        )
        .await
        .unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.items[1].outcome, ImportOutcome::Error);
        assert!(summary.items[1].message.is_some());
        assert_eq!(summary.items[3].outcome, ImportOutcome::Created);
        assert_eq!(summary.events.len(), 2);
    }

    #[tokio::test]
    async fn rows_without_fingerprint_always_create() {
        let state = test_state().await;
        let mut batch = request(vec![
            row("Same", "meeting", "2026-01-05", ""),
            row("Same", "meeting", "2026-01-05", ""),
        ]);
        batch.dedupe = false;

        let summary = ImportService::import(&state, ACTOR, &batch).await.unwrap();
        assert_eq!(summary.created, 2);
        assert!(summary.events.iter().all(|e| e.source_hash.is_none()));
    }

    #[tokio::test]
    async fn lookups_span_multiple_chunks() {
        let state = test_state_with(|config| config.import.lookup_chunk_size = 3).await;
        let rows: Vec<ImportRow> = (1..=8)
            .map(|d| row(&format!("Item {d}"), "task", &format!("2026-01-{d:02}"), ""))
            .collect();

        let first = ImportService::import(&state, ACTOR, &request(rows.clone()))
            .await
            .unwrap();
        assert_eq!(first.created, 8);

        let second = ImportService::import(&state, ACTOR, &request(rows))
            .await
            .unwrap();
        assert_eq!(second.skipped, 8);
    }

    #[tokio::test]
    async fn trashed_matches_are_ignored() {
        let state = test_state().await;
        let batch = request(vec![row("Retro", "meeting", "2026-01-09", "")]);
        let first = ImportService::import(&state, ACTOR, &batch).await.unwrap();
        EventService::soft_delete(&state, ACTOR, &first.events[0].id)
            .await
            .unwrap();

        let second = ImportService::import(&state, ACTOR, &batch).await.unwrap();
        assert_eq!(second.created, 1);
        assert_ne!(second.events[0].id, first.events[0].id);
    }

    #[tokio::test]
    async fn external_keys_survive_manual_edits() {
        let state = test_state().await;
        let batch = request(vec![ImportRow {
            source_hash: Some("ext-1".to_string()),
            ..row("Retro", "meeting", "2026-01-09", "")
        }]);
        let first = ImportService::import(&state, ACTOR, &batch).await.unwrap();
        let id = first.events[0].id.clone();

        let patch = crate::services::validation::EventPatch {
            title: Some("Retro (moved room)".to_string()),
            ..Default::default()
        };
        let edited = EventService::update(&state, "ana@example.com", &id, &patch)
            .await
            .unwrap();
        assert_eq!(edited.source_hash.as_deref(), Some("ext-1"));

        let second = ImportService::import(&state, ACTOR, &batch).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(second.events[0].id, id);
        assert_eq!(live_count(&state).await, 1);
    }

    #[tokio::test]
    async fn oversized_batches_are_rejected() {
        let state = test_state_with(|config| config.import.max_rows = 2).await;
        let batch = request(vec![
            row("a", "x", "2026-01-01", ""),
            row("b", "x", "2026-01-02", ""),
            row("c", "x", "2026-01-03", ""),
        ]);
        assert!(matches!(
            ImportService::import(&state, ACTOR, &batch).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn request_defaults_to_dedupe_and_accepts_aliases() {
        let request: ImportRequest = serde_json::from_str(
            r#"{"rows":[{"title":"t","dateISO":"2026-01-05","assignee":"Bo","fingerprint":"abc"}]}"#,
        )
        .unwrap();
        assert!(request.dedupe);
        assert_eq!(request.rows[0].assigned_to.as_deref(), Some("Bo"));
        assert_eq!(request.rows[0].date.as_deref(), Some("2026-01-05"));
        assert_eq!(request.rows[0].source_hash.as_deref(), Some("abc"));
    }
}
