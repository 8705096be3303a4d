//! Auth handlers

use crate::auth::Authenticator;
use crate::config::AppState;
use crate::error::ChatError;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn get_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>, ChatError> {
    info!("POST /auth/signup - {}", req.username);

    let identity = state.auth.signup(&req.username, &req.password).await.map_err(|e| {
        warn!("Signup failed for {}: {}", req.username, e);
        e
    })?;
    let token = state.auth.issue_token(&identity).await?;

    Ok(Json(AuthResponse {
        token,
        user_id: identity.id,
        username: identity.username,
    }))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>, ChatError> {
    info!("POST /auth/login - {}", req.username);

    let (identity, token) = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(AuthResponse {
        token,
        user_id: identity.id,
        username: identity.username,
    }))
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = get_token_from_headers(&headers) {
        state.auth.logout(&token).await;
    }
    StatusCode::OK
}

/// GET /auth/me
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserInfo>, ChatError> {
    let token = get_token_from_headers(&headers)
        .ok_or_else(|| ChatError::AuthenticationFailure("missing authorization".to_string()))?;
    let identity = state.auth.verify_token(&token).await?;

    Ok(Json(UserInfo {
        id: identity.id,
        username: identity.username,
        created_at: identity.created_at,
    }))
}
