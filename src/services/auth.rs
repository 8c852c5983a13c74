use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Normalized actor email.
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// What the auth gate knows about a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub email: String,
    pub authorized: bool,
}

pub struct AuthService;

impl AuthService {
    /// Exchange an allowlisted email and the team access code for a session token.
    pub fn login(state: &Arc<AppState>, email: &str, access_code: &str) -> AppResult<String> {
        let auth = &state.config.auth;
        let email = email.trim().to_lowercase();

        if email.is_empty() || access_code.is_empty() {
            return Err(AppError::BadRequest(
                "Email and access code are required".to_string(),
            ));
        }

        if auth.access_code_hash.is_empty() {
            return Err(AppError::Config("No access code hash configured".to_string()));
        }

        let code_ok = bcrypt::verify(access_code, &auth.access_code_hash)
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to verify access code: {}", e))
            })?;
        if !code_ok {
            tracing::warn!("Rejected login for {}: wrong access code", email);
            return Err(AppError::Unauthorized);
        }

        if !auth.is_allowed(&email) {
            tracing::warn!("Rejected login for {}: not on the allowlist", email);
            return Err(AppError::Forbidden);
        }

        tracing::info!("Issued session for {}", email);
        Self::issue_token(auth, &email)
    }

    /// Create a signed JWT for an email
    pub fn issue_token(auth: &AuthConfig, email: &str) -> AppResult<String> {
        if auth.jwt_secret.is_empty() {
            return Err(AppError::Config("JWT secret is empty".to_string()));
        }
        let now = Utc::now();
        let exp = now + Duration::hours(auth.jwt_expiration_hours);
        let claims = Claims {
            sub: email.trim().to_lowercase(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Decode and validate a JWT, then check the allowlist.
    pub fn identify(auth: &AuthConfig, token: &str) -> AppResult<Identity> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;
        let email = token_data.claims.sub;

        Ok(Identity {
            authorized: auth.is_allowed(&email),
            email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_state_with, TEST_ACCESS_CODE};

    #[tokio::test]
    async fn login_requires_code_and_allowlist() {
        let state = test_state_with(|_| {}).await;

        let token = AuthService::login(&state, " Ana@Example.com ", TEST_ACCESS_CODE).unwrap();
        let identity = AuthService::identify(&state.config.auth, &token).unwrap();
        assert_eq!(
            identity,
            Identity {
                email: "ana@example.com".to_string(),
                authorized: true
            }
        );

        assert!(matches!(
            AuthService::login(&state, "ana@example.com", "wrong"),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            AuthService::login(&state, "eve@example.com", TEST_ACCESS_CODE),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            AuthService::login(&state, "", TEST_ACCESS_CODE),
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn removed_members_are_no_longer_authorized() {
        let state = test_state_with(|_| {}).await;
        let token = AuthService::issue_token(&state.config.auth, "ana@example.com").unwrap();

        let mut auth = state.config.auth.clone();
        auth.allowed_emails.clear();
        let identity = AuthService::identify(&auth, &token).unwrap();
        assert!(!identity.authorized);
    }

    #[tokio::test]
    async fn missing_secrets_are_configuration_errors() {
        let state = test_state_with(|config| config.auth.access_code_hash.clear()).await;
        assert!(matches!(
            AuthService::login(&state, "ana@example.com", TEST_ACCESS_CODE),
            Err(AppError::Config(_))
        ));

        let mut auth = state.config.auth.clone();
        auth.jwt_secret.clear();
        assert!(matches!(
            AuthService::issue_token(&auth, "ana@example.com"),
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn tampered_tokens_fail() {
        let state = test_state_with(|_| {}).await;
        let token = AuthService::issue_token(&state.config.auth, "ana@example.com").unwrap();

        let mut other = state.config.auth.clone();
        other.jwt_secret = "another-secret".to_string();
        assert!(matches!(
            AuthService::identify(&other, &token),
            Err(AppError::Jwt(_))
        ));
    }
}
