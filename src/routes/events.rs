use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::db::models::Event;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::events::{EventFilters, EventService, RangeQuery};
use crate::services::feed::ChangeNotice;
use crate::services::recurrence::CalendarEntry;
use crate::services::validation::{format_date_iso, EventInput, EventPatch};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_events).post(create_event))
        .route("/trash", get(list_trash))
        .route("/stream", get(stream_range))
        .route(
            "/:id",
            get(get_event).patch(update_event).delete(delete_event),
        )
        .route("/:id/restore", post(restore_event))
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(flatten)]
    pub filters: EventFilters,
}

impl RangeParams {
    fn into_query(self) -> AppResult<RangeQuery> {
        let (Some(from), Some(to)) = (self.from, self.to) else {
            return Err(AppError::BadRequest(
                "Both 'from' and 'to' are required".to_string(),
            ));
        };
        RangeQuery::parse(&from, &to, self.filters)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeResponse {
    pub from: String,
    pub to: String,
    pub entries: Vec<CalendarEntry>,
}

/// Payload of every stream message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<'a> {
    /// Notice that triggered the refresh; absent on the initial and lagged snapshots.
    change: Option<&'a ChangeNotice>,
    entries: &'a [CalendarEntry],
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    AuthUser(_actor): AuthUser,
    Query(params): Query<RangeParams>,
) -> Result<Json<RangeResponse>, AppError> {
    let query = params.into_query()?;
    let entries = EventService::list_range(&state, &query).await?;

    Ok(Json(RangeResponse {
        from: format_date_iso(query.from),
        to: format_date_iso(query.to),
        entries,
    }))
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Json(input): Json<EventInput>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    let event = EventService::create(&state, &actor, &input).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn list_trash(
    State(state): State<Arc<AppState>>,
    AuthUser(_actor): AuthUser,
) -> Result<Json<Vec<Event>>, AppError> {
    Ok(Json(EventService::list_trash(&state).await?))
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(EventService::get(&state, &id).await?))
}

async fn update_event(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
    Json(patch): Json<EventPatch>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(EventService::update(&state, &actor, &id, &patch).await?))
}

async fn delete_event(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(EventService::soft_delete(&state, &actor, &id).await?))
}

async fn restore_event(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(EventService::restore(&state, &actor, &id).await?))
}

/// Server-sent range subscription: an initial snapshot, then a fresh one after
/// every change notice. Closing the connection drops the receiver.
async fn stream_range(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Query(params): Query<RangeParams>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, AppError> {
    let query = params.into_query()?;
    let receiver = state.feed.subscribe();
    let initial = EventService::list_range(&state, &query).await?;

    tracing::info!(
        "{} subscribed to {}..{}",
        actor,
        query.from,
        query.to
    );

    let stream = stream::unfold(
        (state, query, receiver, Some(initial)),
        |(state, query, mut receiver, initial)| async move {
            if let Some(entries) = initial {
                let message = snapshot(None, &entries);
                return Some((message, (state, query, receiver, None)));
            }

            loop {
                let notice = match receiver.recv().await {
                    Ok(notice) => Some(notice),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Stream lagged by {} notices, refreshing", skipped);
                        None
                    }
                    Err(RecvError::Closed) => return None,
                };

                match EventService::list_range(&state, &query).await {
                    Ok(entries) => {
                        let message = snapshot(notice.as_ref(), &entries);
                        return Some((message, (state, query, receiver, None)));
                    }
                    Err(e) => {
                        tracing::warn!("Failed to refresh stream snapshot: {:?}", e);
                    }
                }
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn snapshot(change: Option<&ChangeNotice>, entries: &[CalendarEntry]) -> Result<SseEvent, axum::Error> {
    SseEvent::default()
        .event("snapshot")
        .json_data(Snapshot { change, entries })
}
