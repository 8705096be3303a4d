//! Friends and presence lookups over HTTP

use super::auth::get_token_from_headers;
use crate::auth::Authenticator;
use crate::config::AppState;
use crate::error::ChatError;
use crate::models::PresenceStatus;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Contact {
    pub username: String,
    pub status: PresenceStatus,
}

fn status_of(state: &AppState, username: &str) -> PresenceStatus {
    if state.router.presence().is_online(username) {
        PresenceStatus::Online
    } else {
        PresenceStatus::Offline
    }
}

/// GET /friends - the caller's friends with their presence
pub async fn list_friends(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Contact>>, ChatError> {
    let token = get_token_from_headers(&headers)
        .ok_or_else(|| ChatError::AuthenticationFailure("missing authorization".to_string()))?;
    let identity = state.auth.verify_token(&token).await?;

    let contacts = state
        .router
        .friends()
        .friends_of(&identity.username)
        .into_iter()
        .map(|username| Contact {
            status: status_of(&state, &username),
            username,
        })
        .collect();

    Ok(Json(contacts))
}

/// GET /presence/{username}
pub async fn get_presence(
    Path(username): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Contact>, ChatError> {
    if !state.auth.user_exists(&username) {
        return Err(ChatError::NotFound(format!("user {}", username)));
    }

    Ok(Json(Contact {
        status: status_of(&state, &username),
        username,
    }))
}
