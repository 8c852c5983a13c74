use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::auth::{AuthService, Identity};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub access_code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub email: String,
    pub expires_in_hours: i64,
}

// ============================================================================
// Handlers
// ============================================================================

async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let token = AuthService::login(&state, &request.email, &request.access_code)?;

    Ok(Json(LoginResponse {
        token,
        email: request.email.trim().to_lowercase(),
        expires_in_hours: state.config.auth.jwt_expiration_hours,
    }))
}

/// Who the token belongs to and whether they may use the calendar.
async fn me(Session(identity): Session) -> Json<Identity> {
    Json(identity)
}

// ============================================================================
// Extractors
// ============================================================================

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let auth_header = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!("Missing or invalid Authorization header");
            AppError::Unauthorized
        })?;

    if !auth_header.to_ascii_lowercase().starts_with("bearer ") {
        tracing::debug!("Authorization header doesn't start with 'Bearer '");
        return Err(AppError::Unauthorized);
    }

    let token = auth_header[7..].trim();
    if token.is_empty() {
        tracing::debug!("Empty bearer token in Authorization header");
        return Err(AppError::Unauthorized);
    }
    Ok(token)
}

/// Any caller holding a valid token, allowlisted or not.
pub struct Session(pub Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let identity = AuthService::identify(&state.config.auth, token)?;
        Ok(Session(identity))
    }
}

/// An allowlisted team member. Carries the normalized email used as actor.
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Session(identity) = Session::from_request_parts(parts, state).await?;

        if !identity.authorized {
            tracing::warn!("Token for {} is no longer allowlisted", identity.email);
            return Err(AppError::Forbidden);
        }

        tracing::debug!("Authenticated user: {}", identity.email);
        Ok(AuthUser(identity.email))
    }
}
