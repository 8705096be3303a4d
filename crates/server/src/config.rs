//! Chat server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthManager;
use crate::router::ChatRouter;

/// Configuration for the Aura Chat Server
#[derive(Clone, Debug)]
pub struct ChatServerConfig {
    /// Directory holding users.json, messages.json and friends.json
    pub data_dir: PathBuf,
    /// Address the HTTP/WebSocket listener binds to
    pub bind_addr: SocketAddr,
    /// Global cap on retained messages (rooms and DMs together)
    pub max_log_entries: usize,
    /// Number of messages replayed on join_room
    pub history_limit: usize,
    /// How long after sending a message its sender may still recall it
    pub recall_window: Duration,
    /// Largest accepted inline image payload, in bytes
    pub max_image_bytes: usize,
    /// Events buffered per connection before it is dropped as too slow
    pub outbound_capacity: usize,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("aura_data"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_log_entries: 2000,
            history_limit: 50,
            recall_window: Duration::from_secs(120),
            max_image_bytes: 5 * 1024 * 1024, // 5MB
            outbound_capacity: 256,
        }
    }
}

impl ChatServerConfig {
    /// Build a config from `AURA_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("AURA_ROOT") {
            config.data_dir = PathBuf::from(root);
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            config.bind_addr.set_port(port);
        }
        if let Some(n) = env_parse("AURA_MAX_LOG_ENTRIES") {
            config.max_log_entries = n;
        }
        if let Some(n) = env_parse("AURA_HISTORY_LIMIT") {
            config.history_limit = n;
        }
        if let Some(secs) = env_parse("AURA_RECALL_WINDOW_SECS") {
            config.recall_window = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("AURA_MAX_IMAGE_BYTES") {
            config.max_image_bytes = n;
        }
        if let Some(n) = env_parse("AURA_OUTBOUND_CAPACITY") {
            config.outbound_capacity = n;
        }

        config
    }

    /// Create config with custom base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn messages_path(&self) -> PathBuf {
        self.data_dir.join("messages.json")
    }

    pub fn friends_path(&self) -> PathBuf {
        self.data_dir.join("friends.json")
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ChatServerConfig,
    pub auth: Arc<AuthManager>,
    pub router: Arc<ChatRouter>,
}
