//! Message log
//!
//! A single bounded FIFO of every message, rooms and DMs alike. Once the log
//! holds `max_entries` messages each append evicts the oldest one first, so a
//! busy room can push another room's history out. Recall tombstones a message
//! in place; nothing is ever removed except by eviction.

use crate::error::{ChatError, Result};
use crate::models::{Destination, Message};
use crate::store::{DocumentId, JsonStore, PendingWrite};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct LogState {
    entries: VecDeque<Message>,
    evicted: u64,
}

pub struct MessageLog {
    store: Arc<JsonStore>,
    max_entries: usize,
    recall_window: TimeDelta,
    state: Mutex<LogState>,
}

impl MessageLog {
    /// Load the log from the messages document, trimming it to `max_entries`
    pub async fn load(store: Arc<JsonStore>, max_entries: usize, recall_window: Duration) -> Self {
        let max_entries = max_entries.max(1);
        let mut entries: VecDeque<Message> = store.load(DocumentId::Messages).await;
        let before = entries.len();
        entries.retain(|m| m.destination().is_some());
        if entries.len() < before {
            warn!(
                "[Messages] Dropped {} stored messages with no valid destination",
                before - entries.len()
            );
        }
        while entries.len() > max_entries {
            entries.pop_front();
        }
        info!("[Messages] Loaded {} messages (cap {})", entries.len(), max_entries);

        Self {
            store,
            max_entries,
            recall_window: TimeDelta::from_std(recall_window).unwrap_or(TimeDelta::MAX),
            state: Mutex::new(LogState {
                entries,
                evicted: 0,
            }),
        }
    }

    /// Create, store and persist a new message
    pub fn append(
        &self,
        sender: &str,
        destination: Destination,
        body: impl Into<String>,
        image: Option<String>,
    ) -> (Message, PendingWrite) {
        let message = Message::new(sender, destination, body, image);

        let mut state = self.state.lock();
        while state.entries.len() >= self.max_entries {
            if let Some(old) = state.entries.pop_front() {
                debug!("[Messages] Evicted {}", old.id);
                state.evicted += 1;
            }
        }
        state.entries.push_back(message.clone());
        let write = self.store.enqueue_json(DocumentId::Messages, &state.entries);

        (message, write)
    }

    /// Tombstone `id` on behalf of `requester`.
    ///
    /// Unknown, evicted and already recalled messages all come back as
    /// `NotFound`, which makes a repeated recall harmless.
    pub fn recall(
        &self,
        id: Uuid,
        requester: &str,
        now: DateTime<Utc>,
    ) -> Result<(Message, PendingWrite)> {
        let mut state = self.state.lock();
        let message = state
            .entries
            .iter_mut()
            .find(|m| m.id == id && !m.recalled)
            .ok_or_else(|| ChatError::NotFound(format!("message {}", id)))?;

        if message.sender != requester {
            return Err(ChatError::denied("only the sender can recall a message"));
        }
        if now - message.timestamp > self.recall_window {
            return Err(ChatError::RecallWindowElapsed(id.to_string()));
        }

        message.recall();
        let recalled = message.clone();
        let write = self.store.enqueue_json(DocumentId::Messages, &state.entries);

        info!("[Messages] {} recalled {}", requester, id);
        Ok((recalled, write))
    }

    /// The last `limit` messages of `room`, oldest first. Tombstones are
    /// included with their sender and payload redacted; DMs never are.
    pub fn history(&self, room: &str, limit: usize) -> Vec<Message> {
        let state = self.state.lock();
        let mut recent: Vec<Message> = state
            .entries
            .iter()
            .rev()
            .filter(|m| m.is_in_room(room))
            .take(limit)
            .map(Message::redacted)
            .collect();
        recent.reverse();
        recent
    }

    pub fn get(&self, id: Uuid) -> Option<Message> {
        self.state.lock().entries.iter().find(|m| m.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages dropped by the retention cap since startup
    pub fn evicted_count(&self) -> u64 {
        self.state.lock().evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatServerConfig;
    use tempfile::TempDir;

    async fn log_with(dir: &TempDir, max: usize, window: Duration) -> MessageLog {
        let store = Arc::new(JsonStore::open(&ChatServerConfig::with_base_dir(dir.path())));
        MessageLog::load(store, max, window).await
    }

    fn room(name: &str) -> Destination {
        Destination::Room(name.to_string())
    }

    #[tokio::test]
    async fn test_eviction_after_cap() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 5, Duration::from_secs(60)).await;

        let (first, _) = log.append("alice", room("General"), "m0", None);
        for i in 1..=5 {
            let _ = log.append("alice", room("General"), format!("m{}", i), None);
        }

        assert_eq!(log.len(), 5);
        assert_eq!(log.evicted_count(), 1);
        assert!(log.get(first.id).is_none());
        assert!(log.history("General", 50).iter().all(|m| m.id != first.id));
    }

    #[tokio::test]
    async fn test_eviction_is_global_across_rooms() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 3, Duration::from_secs(60)).await;

        let _ = log.append("alice", room("Quiet"), "hello?", None);
        for _ in 0..3 {
            let _ = log.append("bob", room("Busy"), "spam", None);
        }

        assert!(log.history("Quiet", 50).is_empty());
        assert_eq!(log.history("Busy", 50).len(), 3);
    }

    #[tokio::test]
    async fn test_history_limit_and_room_filter() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 100, Duration::from_secs(60)).await;

        for i in 0..10 {
            let _ = log.append("alice", room("General"), format!("g{}", i), None);
            let _ = log.append("alice", room("Random"), format!("r{}", i), None);
        }
        let _ = log.append("alice", Destination::Direct("bob".into()), "dm", None);

        let history = log.history("General", 4);
        assert_eq!(history.len(), 4);
        assert!(history.iter().all(|m| m.room.as_deref() == Some("General")));
        let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["g6", "g7", "g8", "g9"]);
    }

    #[tokio::test]
    async fn test_recall_rules() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 100, Duration::from_secs(60)).await;
        let (msg, _) = log.append("alice", room("General"), "oops", None);

        let err = log.recall(msg.id, "bob", Utc::now()).unwrap_err();
        assert!(matches!(err, ChatError::AuthorizationDenied(_)));
        assert_eq!(log.get(msg.id).unwrap().body, "oops");

        let (recalled, write) = log.recall(msg.id, "alice", Utc::now()).unwrap();
        write.wait().await.unwrap();
        assert!(recalled.recalled);
        assert!(recalled.body.is_empty());

        // Second recall is a no-op
        let err = log.recall(msg.id, "alice", Utc::now()).unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));

        let err = log.recall(Uuid::new_v4(), "alice", Utc::now()).unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_recall_window_elapsed() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 100, Duration::from_secs(120)).await;
        let (msg, _) = log.append("alice", room("General"), "old news", None);

        let later = msg.timestamp + TimeDelta::seconds(121);
        let err = log.recall(msg.id, "alice", later).unwrap_err();
        assert!(matches!(err, ChatError::RecallWindowElapsed(_)));
        assert!(!log.get(msg.id).unwrap().recalled);
    }

    #[tokio::test]
    async fn test_load_drops_messages_without_destination() {
        let dir = TempDir::new().unwrap();
        let config = ChatServerConfig::with_base_dir(dir.path());
        let good = Message::new("alice", room("General"), "fine", None);
        let mut both = Message::new("alice", room("General"), "room and target", None);
        both.target = Some("bob".into());
        let mut neither = Message::new("alice", Destination::Direct("bob".into()), "lost", None);
        neither.target = None;
        std::fs::write(
            config.messages_path(),
            serde_json::to_vec(&vec![good.clone(), both, neither]).unwrap(),
        )
        .unwrap();

        let log = log_with(&dir, 100, Duration::from_secs(60)).await;

        assert_eq!(log.len(), 1);
        assert_eq!(log.get(good.id), Some(good));
    }

    #[tokio::test]
    async fn test_log_survives_restart_with_tombstones() {
        let dir = TempDir::new().unwrap();
        let id = {
            let log = log_with(&dir, 100, Duration::from_secs(60)).await;
            let (msg, _) = log.append("alice", room("General"), "keep", None);
            let (gone, _) = log.append("alice", room("General"), "drop", None);
            let (_, write) = log.recall(gone.id, "alice", Utc::now()).unwrap();
            write.wait().await.unwrap();
            msg.id
        };

        let log = log_with(&dir, 100, Duration::from_secs(60)).await;
        let history = log.history("General", 50);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, id);
        assert!(history[1].recalled);
        assert!(history[1].sender.is_empty());
    }
}
