//! HTTP and WebSocket handlers

pub mod auth;
pub mod friends;
pub mod ws;

use crate::config::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub use auth::{login, logout, me, signup};
pub use friends::{get_presence, list_friends};
pub use ws::chat_ws;

pub fn router() -> Router<AppState> {
    Router::new()
        // Auth endpoints
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        // Social graph
        .route("/friends", get(list_friends))
        .route("/presence/{username}", get(get_presence))
        // Realtime
        .route("/ws", get(chat_ws))
        // Health check
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "OK - Aura Chat Server"
}
