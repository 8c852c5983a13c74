use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};

use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::calendar_view::{CalendarService, CalendarView, MonthGrid};
use crate::services::events::EventFilters;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/:year/:month", get(month_grid))
}

/// Month grid for `year`/`month`, optionally filtered.
async fn month_grid(
    State(state): State<Arc<AppState>>,
    AuthUser(_actor): AuthUser,
    Path((year, month)): Path<(i32, u32)>,
    Query(filters): Query<EventFilters>,
) -> AppResult<Json<MonthGrid>> {
    let view = CalendarView::new(year, month, filters)?;
    Ok(Json(CalendarService::month(&state, &view).await?))
}
