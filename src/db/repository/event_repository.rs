use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::{CreateEvent, Event, EventStatus, Recurrence, UpdateEvent};
use crate::error::{AppError, AppResult};

const EVENT_COLUMNS: &str = r#"
    id, title, category, status, notes, assigned_to, recurrence,
    date_start, date_iso,
    created_by, updated_by, created_at, updated_at,
    deleted_at, deleted_by,
    source, source_hash
"#;

// ============================================================================
// Event Repository
// ============================================================================

/// Document store for calendar events (`events` table).
///
/// Every write stamps server-side timestamps; callers never supply them.
pub struct EventRepository;

impl EventRepository {
    pub async fn insert(pool: &SqlitePool, create: CreateEvent) -> AppResult<Event> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let fields = create.fields;

        let sql = format!(
            r#"
            INSERT INTO events (
                id, title, category, status, notes, assigned_to, recurrence,
                date_start, date_iso,
                created_by, updated_by, created_at, updated_at,
                deleted_at, deleted_by,
                source, source_hash
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(&id)
            .bind(&fields.title)
            .bind(&fields.category)
            .bind(fields.status.as_str())
            .bind(&fields.notes)
            .bind(&fields.assigned_to)
            .bind(fields.recurrence.as_str())
            .bind(create.date_start)
            .bind(&fields.date_iso)
            .bind(&create.actor)
            .bind(&create.actor)
            .bind(now)
            .bind(now)
            .bind(&create.source)
            .bind(&create.source_hash)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        row_to_event(&row)
    }

    /// Find an event by id, live or trashed.
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Event>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        row.as_ref().map(row_to_event).transpose()
    }

    /// Replace the editable fields of a live event. Returns `None` when the event is
    /// missing or trashed.
    pub async fn update(
        pool: &SqlitePool,
        id: &str,
        update: UpdateEvent,
    ) -> AppResult<Option<Event>> {
        let now = Utc::now();
        let fields = update.fields;

        let sql = format!(
            r#"
            UPDATE events
            SET title = ?,
                category = ?,
                status = ?,
                notes = ?,
                assigned_to = ?,
                recurrence = ?,
                date_start = ?,
                date_iso = ?,
                source_hash = ?,
                updated_by = ?,
                updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(&fields.title)
            .bind(&fields.category)
            .bind(fields.status.as_str())
            .bind(&fields.notes)
            .bind(&fields.assigned_to)
            .bind(fields.recurrence.as_str())
            .bind(update.date_start)
            .bind(&fields.date_iso)
            .bind(&update.source_hash)
            .bind(&update.actor)
            .bind(now)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        row.as_ref().map(row_to_event).transpose()
    }

    /// Mark a live event as trashed. Returns `None` when it is missing or already trashed.
    pub async fn soft_delete(pool: &SqlitePool, id: &str, actor: &str) -> AppResult<Option<Event>> {
        let now = Utc::now();
        let sql = format!(
            r#"
            UPDATE events
            SET deleted_at = ?, deleted_by = ?, updated_by = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(now)
            .bind(actor)
            .bind(actor)
            .bind(now)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        row.as_ref().map(row_to_event).transpose()
    }

    /// Clear the trash marker of an event. Returns `None` when it is not trashed.
    pub async fn restore(pool: &SqlitePool, id: &str, actor: &str) -> AppResult<Option<Event>> {
        let now = Utc::now();
        let sql = format!(
            r#"
            UPDATE events
            SET deleted_at = NULL, deleted_by = NULL, updated_by = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NOT NULL
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(actor)
            .bind(now)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        row.as_ref().map(row_to_event).transpose()
    }

    /// Live events whose `date_start` lies in `[start, end)`, ordered by `date_start`.
    ///
    /// This is the only composite filter the store is asked for.
    pub async fn find_in_range(
        pool: &SqlitePool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Event>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE deleted_at IS NULL AND date_start >= ? AND date_start < ?
            ORDER BY date_start ASC, created_at ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        rows.iter().map(row_to_event).collect()
    }

    /// Live recurring events anchored before `before`; these can project occurrences
    /// into a later window even though their own date falls outside it.
    pub async fn find_recurring_before(
        pool: &SqlitePool,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<Event>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE deleted_at IS NULL AND recurrence != '' AND date_start < ?
            ORDER BY date_start ASC, created_at ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(before)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        rows.iter().map(row_to_event).collect()
    }

    /// Live events carrying any of the given fingerprints.
    ///
    /// Lookups are issued in chunks of at most `chunk_size` values, one query per chunk.
    pub async fn find_by_source_hashes(
        pool: &SqlitePool,
        hashes: &[String],
        chunk_size: usize,
    ) -> AppResult<Vec<Event>> {
        let mut found = Vec::new();

        for chunk in hashes.chunks(chunk_size.max(1)) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                r#"
                SELECT {EVENT_COLUMNS}
                FROM events
                WHERE deleted_at IS NULL AND source_hash IN ({placeholders})
                ORDER BY created_at ASC
                "#
            );

            let mut query = sqlx::query(&sql);
            for hash in chunk {
                query = query.bind(hash);
            }

            let rows = query.fetch_all(pool).await.map_err(AppError::Database)?;
            for row in rows.iter() {
                found.push(row_to_event(row)?);
            }
        }

        Ok(found)
    }

    /// Trashed events, most recently trashed first.
    pub async fn find_trashed(pool: &SqlitePool) -> AppResult<Vec<Event>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE deleted_at IS NOT NULL
            ORDER BY deleted_at DESC
            "#
        );

        let rows = sqlx::query(&sql)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        rows.iter().map(row_to_event).collect()
    }
}

fn row_to_event(r: &SqliteRow) -> AppResult<Event> {
    let status: String = r.try_get("status")?;
    let recurrence: String = r.try_get("recurrence")?;

    Ok(Event {
        id: r.try_get("id")?,
        title: r.try_get("title")?,
        category: r.try_get("category")?,
        status: EventStatus::sanitize(&status),
        notes: r.try_get("notes")?,
        assigned_to: r.try_get("assigned_to")?,
        recurrence: Recurrence::sanitize(&recurrence),
        date_start: r.try_get("date_start")?,
        date_iso: r.try_get("date_iso")?,
        created_by: r.try_get("created_by")?,
        updated_by: r.try_get("updated_by")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
        deleted_at: r.try_get("deleted_at")?,
        deleted_by: r.try_get("deleted_by")?,
        source: r.try_get("source")?,
        source_hash: r.try_get("source_hash")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{EventFields, SOURCE_MANUAL};
    use crate::test_support::memory_pool;
    use chrono::{Duration, TimeZone};

    fn create(title: &str, date_iso: &str, hash: Option<&str>) -> CreateEvent {
        let day: chrono::NaiveDate = date_iso.parse().unwrap();
        CreateEvent {
            fields: EventFields {
                title: title.to_string(),
                category: "ops".to_string(),
                status: EventStatus::Pending,
                notes: String::new(),
                assigned_to: String::new(),
                recurrence: Recurrence::None,
                date_iso: date_iso.to_string(),
            },
            date_start: Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap()),
            actor: "ana@example.com".to_string(),
            source: SOURCE_MANUAL.to_string(),
            source_hash: hash.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn insert_then_read_back_keeps_fields() {
        let pool = memory_pool().await;
        let created = EventRepository::insert(&pool, create("Standup", "2026-01-05", None))
            .await
            .unwrap();

        let read = EventRepository::find_by_id(&pool, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, created);
        assert_eq!(read.date_iso, "2026-01-05");
        assert_eq!(read.created_by, "ana@example.com");
        assert!(read.deleted_at.is_none());
    }

    #[tokio::test]
    async fn range_query_excludes_trashed_and_out_of_range() {
        let pool = memory_pool().await;
        let a = EventRepository::insert(&pool, create("A", "2026-01-05", None))
            .await
            .unwrap();
        let b = EventRepository::insert(&pool, create("B", "2026-01-10", None))
            .await
            .unwrap();
        EventRepository::insert(&pool, create("C", "2026-02-10", None))
            .await
            .unwrap();
        EventRepository::soft_delete(&pool, &b.id, "ana@example.com")
            .await
            .unwrap()
            .unwrap();

        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(31);
        let found = EventRepository::find_in_range(&pool, start, end).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);

        let trash = EventRepository::find_trashed(&pool).await.unwrap();
        assert_eq!(trash.len(), 1);
        assert_eq!(trash[0].id, b.id);
        assert_eq!(trash[0].deleted_by.as_deref(), Some("ana@example.com"));
    }

    #[tokio::test]
    async fn soft_delete_twice_reports_missing() {
        let pool = memory_pool().await;
        let a = EventRepository::insert(&pool, create("A", "2026-01-05", None))
            .await
            .unwrap();

        assert!(EventRepository::soft_delete(&pool, &a.id, "x@example.com")
            .await
            .unwrap()
            .is_some());
        assert!(EventRepository::soft_delete(&pool, &a.id, "x@example.com")
            .await
            .unwrap()
            .is_none());
        assert!(EventRepository::restore(&pool, &a.id, "x@example.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn hash_lookup_spans_chunks() {
        let pool = memory_pool().await;
        let mut hashes = Vec::new();
        for i in 0..7 {
            let hash = format!("h{i}");
            EventRepository::insert(&pool, create(&format!("E{i}"), "2026-03-01", Some(&hash)))
                .await
                .unwrap();
            hashes.push(hash);
        }
        hashes.push("missing".to_string());

        let found = EventRepository::find_by_source_hashes(&pool, &hashes, 3)
            .await
            .unwrap();
        assert_eq!(found.len(), 7);
    }
}
