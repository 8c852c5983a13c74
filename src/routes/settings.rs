use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::db::models::{EventStatus, Recurrence};
use crate::routes::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_settings))
}

/// Values the UI needs to render forms and filters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub categories: Vec<String>,
    pub roster: Vec<String>,
    pub statuses: Vec<&'static str>,
    pub recurrences: Vec<&'static str>,
    pub timezone: String,
    pub max_range_days: i64,
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(_actor): AuthUser,
) -> Json<SettingsResponse> {
    let calendar = &state.config.calendar;

    Json(SettingsResponse {
        categories: calendar.categories.clone(),
        roster: calendar.roster.clone(),
        statuses: EventStatus::ALL.iter().map(|s| s.as_str()).collect(),
        recurrences: Recurrence::ALL.iter().map(|r| r.as_str()).collect(),
        timezone: calendar.timezone.name().to_string(),
        max_range_days: calendar.max_range_days,
    })
}
