use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};

use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::import::{ImportRequest, ImportService, ImportSummary};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(import_rows))
}

/// Bulk upsert. Row-level problems are reported in the summary, not as an HTTP error.
async fn import_rows(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Json(request): Json<ImportRequest>,
) -> AppResult<Json<ImportSummary>> {
    tracing::info!("{} importing {} rows", actor, request.rows.len());
    let summary = ImportService::import(&state, &actor, &request).await?;
    Ok(Json(summary))
}
