//! Presence registry: who is online, and on which connection.
//!
//! One entry per username, last login wins. Removal is guarded by the
//! connection id so a late disconnect from a superseded connection can't
//! knock the newer session offline.

use crate::session::ConnectionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
pub struct PresenceRegistry {
    online: Mutex<HashMap<String, ConnectionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `username` to `conn`, returning the connection it replaced
    pub fn set_online(&self, username: &str, conn: ConnectionId) -> Option<ConnectionId> {
        let previous = self.online.lock().insert(username.to_string(), conn);
        if let Some(prev) = previous {
            debug!("[Presence] {} moved from {} to {}", username, prev, conn);
        }
        previous
    }

    /// Remove the mapping only if it still points at `conn`
    pub fn set_offline(&self, username: &str, conn: ConnectionId) -> bool {
        let mut online = self.online.lock();
        match online.get(username) {
            Some(current) if *current == conn => {
                online.remove(username);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, username: &str) -> Option<ConnectionId> {
        self.online.lock().get(username).copied()
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.online.lock().contains_key(username)
    }

    pub fn online_count(&self) -> usize {
        self.online.lock().len()
    }
}
