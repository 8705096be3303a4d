//! Authentication Module
//!
//! The router only knows the [`Authenticator`] trait. [`AuthManager`] is the
//! bundled implementation: identities in the users document, bcrypt password
//! hashes, and in-memory session tokens.

use crate::error::{ChatError, Result};
use crate::models::{Identity, UsersDocument};
use crate::store::{DocumentId, JsonStore};
use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Credential and token checks the router delegates to
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify_credentials(&self, username: &str, password: &str) -> Result<Identity>;

    async fn issue_token(&self, identity: &Identity) -> Result<String>;

    async fn verify_token(&self, token: &str) -> Result<Identity>;
}

/// Session token for authenticated connections
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Auth manager handles all authentication
pub struct AuthManager {
    store: Arc<JsonStore>,
    users: Mutex<UsersDocument>,
    /// In-memory session cache
    sessions: RwLock<HashMap<String, Session>>,
    cost: u32,
    session_ttl: TimeDelta,
}

impl AuthManager {
    /// Create new auth manager
    pub async fn new(store: Arc<JsonStore>) -> Self {
        let users: UsersDocument = store.load(DocumentId::Users).await;
        info!("[Auth] Initialized with {} users", users.len());

        Self {
            store,
            users: Mutex::new(users),
            sessions: RwLock::new(HashMap::new()),
            cost: DEFAULT_COST,
            session_ttl: TimeDelta::days(30),
        }
    }

    /// Override the bcrypt cost (tests use the minimum)
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Register a new user
    pub async fn signup(&self, username: &str, password: &str) -> Result<Identity> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::validation("username is required"));
        }
        if password.is_empty() {
            return Err(ChatError::validation("password is required"));
        }
        if self.users.lock().contains_key(username) {
            return Err(ChatError::validation("username already taken"));
        }

        let password_hash = hash(password, self.cost)
            .map_err(|e| ChatError::Persistence(format!("failed to hash password: {}", e)))?;

        let identity = Identity {
            username: username.to_string(),
            password_hash,
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        };

        let write = {
            let mut users = self.users.lock();
            // Re-check: another signup may have won while we were hashing
            if users.contains_key(username) {
                return Err(ChatError::validation("username already taken"));
            }
            users.insert(identity.username.clone(), identity.clone());
            self.store.enqueue_json(DocumentId::Users, &*users)
        };
        write.wait().await?;

        info!("[Auth] User registered: {}", identity.username);
        Ok(identity)
    }

    /// Check credentials and hand out a session token
    pub async fn login(&self, username: &str, password: &str) -> Result<(Identity, String)> {
        let identity = self.verify_credentials(username, password).await?;
        let token = self.issue_token(&identity).await?;
        info!("[Auth] User logged in: {}", identity.username);
        Ok((identity, token))
    }

    /// Logout user (invalidate session)
    pub async fn logout(&self, token: &str) {
        if self.sessions.write().await.remove(token).is_some() {
            info!("[Auth] Session invalidated");
        }
    }

    pub fn get_user(&self, username: &str) -> Option<Identity> {
        self.users.lock().get(username).cloned()
    }

    pub fn user_exists(&self, username: &str) -> bool {
        self.users.lock().contains_key(username)
    }
}

#[async_trait]
impl Authenticator for AuthManager {
    async fn verify_credentials(&self, username: &str, password: &str) -> Result<Identity> {
        let identity = self
            .get_user(username)
            .ok_or_else(|| ChatError::AuthenticationFailure("unknown user".to_string()))?;

        let valid = verify(password, &identity.password_hash).unwrap_or(false);
        if !valid {
            warn!("[Auth] Failed login attempt for {}", username);
            return Err(ChatError::AuthenticationFailure("bad password".to_string()));
        }

        Ok(identity)
    }

    async fn issue_token(&self, identity: &Identity) -> Result<String> {
        let now = Utc::now();
        let session = Session {
            token: Uuid::new_v4().to_string(),
            username: identity.username.clone(),
            created_at: now,
            expires_at: now + self.session_ttl,
        };
        let token = session.token.clone();
        self.sessions.write().await.insert(token.clone(), session);
        Ok(token)
    }

    async fn verify_token(&self, token: &str) -> Result<Identity> {
        let username = {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(session) if session.expires_at > Utc::now() => session.username.clone(),
                _ => {
                    return Err(ChatError::AuthenticationFailure(
                        "invalid or expired session".to_string(),
                    ))
                }
            }
        };

        self.get_user(&username)
            .ok_or_else(|| ChatError::AuthenticationFailure("user no longer exists".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatServerConfig;
    use tempfile::TempDir;

    async fn manager(dir: &TempDir) -> AuthManager {
        let store = Arc::new(JsonStore::open(&ChatServerConfig::with_base_dir(dir.path())));
        AuthManager::new(store).await.with_cost(4)
    }

    #[tokio::test]
    async fn test_signup_login_and_token() {
        let dir = TempDir::new().unwrap();
        let auth = manager(&dir).await;

        let alice = auth.signup("alice", "hunter2").await.unwrap();
        assert_ne!(alice.password_hash, "hunter2");

        let (identity, token) = auth.login("alice", "hunter2").await.unwrap();
        assert_eq!(identity.id, alice.id);
        assert_eq!(auth.verify_token(&token).await.unwrap().username, "alice");

        auth.logout(&token).await;
        assert!(auth.verify_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let dir = TempDir::new().unwrap();
        let auth = manager(&dir).await;
        auth.signup("alice", "hunter2").await.unwrap();

        assert!(matches!(
            auth.login("alice", "wrong").await,
            Err(ChatError::AuthenticationFailure(_))
        ));
        assert!(matches!(
            auth.login("nobody", "hunter2").await,
            Err(ChatError::AuthenticationFailure(_))
        ));
        assert!(auth.verify_token("not-a-token").await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_signup() {
        let dir = TempDir::new().unwrap();
        let auth = manager(&dir).await;
        auth.signup("alice", "pw").await.unwrap();

        assert!(matches!(auth.signup("alice", "pw2").await, Err(ChatError::Validation(_))));
        assert!(matches!(auth.signup("  ", "pw").await, Err(ChatError::Validation(_))));
        assert!(matches!(auth.signup("bob", "").await, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_users_persist_across_restart() {
        let dir = TempDir::new().unwrap();
        manager(&dir).await.signup("alice", "hunter2").await.unwrap();

        let auth = manager(&dir).await;
        assert!(auth.user_exists("alice"));
        assert!(auth.verify_credentials("alice", "hunter2").await.is_ok());
    }
}
