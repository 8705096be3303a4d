//! Aura Chat Server Library
//!
//! Rooms, direct messages, recall, friends and presence over WebSocket,
//! with state kept in memory and persisted as JSON documents.

pub mod auth;
pub mod config;
pub mod error;
pub mod friends;
pub mod handlers;
pub mod messages;
pub mod models;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;

use anyhow::Context;
use axum::Router;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use auth::AuthManager;
use config::{AppState, ChatServerConfig};
use router::ChatRouter;
use store::JsonStore;

pub use error::{ChatError, Result};

/// Load every document and wire up the shared state
pub async fn build_state(config: ChatServerConfig) -> anyhow::Result<AppState> {
    config
        .ensure_dirs()
        .await
        .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;

    let store = Arc::new(JsonStore::open(&config));
    info!("Storage directory: {:?}", store.data_dir());

    let auth = Arc::new(AuthManager::new(store.clone()).await);
    info!("Auth Manager initialized");

    let router = Arc::new(ChatRouter::load(&config, store, auth.clone()).await);
    info!("Chat Router initialized");

    Ok(AppState {
        config,
        auth,
        router,
    })
}

/// The full HTTP/WebSocket application
pub fn app(state: AppState) -> Router {
    handlers::router()
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Aura Chat Server ===");

    let config = ChatServerConfig::from_env();
    let addr = config.bind_addr;
    let state = build_state(config).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
