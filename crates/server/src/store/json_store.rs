//! JSON document storage
//!
//! Three documents (users, messages, friends) live as whole JSON files in the
//! data directory. They are read once at startup and rewritten wholesale on
//! every change, each through its own [`WriteQueue`] so unrelated documents
//! never wait on each other.

use super::write_queue::{PendingWrite, WriteQueue};
use crate::config::ChatServerConfig;
use crate::error::ChatError;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentId {
    Users,
    Messages,
    Friends,
}

impl DocumentId {
    pub const ALL: [DocumentId; 3] = [DocumentId::Users, DocumentId::Messages, DocumentId::Friends];

    pub fn name(&self) -> &'static str {
        match self {
            DocumentId::Users => "users",
            DocumentId::Messages => "messages",
            DocumentId::Friends => "friends",
        }
    }
}

pub struct JsonStore {
    data_dir: PathBuf,
    users: WriteQueue,
    messages: WriteQueue,
    friends: WriteQueue,
}

impl JsonStore {
    /// Open the store and start one writer per document.
    /// Must be called inside a tokio runtime.
    pub fn open(config: &ChatServerConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            users: WriteQueue::spawn(config.users_path()),
            messages: WriteQueue::spawn(config.messages_path()),
            friends: WriteQueue::spawn(config.friends_path()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn queue(&self, doc: DocumentId) -> &WriteQueue {
        match doc {
            DocumentId::Users => &self.users,
            DocumentId::Messages => &self.messages,
            DocumentId::Friends => &self.friends,
        }
    }

    pub fn path(&self, doc: DocumentId) -> &Path {
        self.queue(doc).path()
    }

    /// Load a document, falling back to its empty default when the file is
    /// missing or can't be parsed
    pub async fn load<T>(&self, doc: DocumentId) -> T
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path(doc);
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("[Store] No {} document yet, starting empty", doc.name());
                return T::default();
            }
            Err(e) => {
                warn!("[Store] Failed to read {:?}: {}", path, e);
                return T::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "[Store] {} document at {:?} is unparsable, starting empty: {}",
                    doc.name(),
                    path,
                    e
                );
                T::default()
            }
        }
    }

    /// Queue a full snapshot of a document
    pub fn enqueue(&self, doc: DocumentId, snapshot: Vec<u8>) -> PendingWrite {
        self.queue(doc).enqueue(snapshot)
    }

    /// Serialize (compactly) and queue a document. Call this while still
    /// holding the lock that guards `value` so snapshots queue in mutation
    /// order.
    pub fn enqueue_json<T: Serialize + ?Sized>(&self, doc: DocumentId, value: &T) -> PendingWrite {
        match serde_json::to_vec(value) {
            Ok(snapshot) => self.enqueue(doc, snapshot),
            Err(e) => PendingWrite::failed(ChatError::from(e)),
        }
    }

    /// Wait for every write queued so far, across all documents
    pub async fn flush(&self) {
        for doc in DocumentId::ALL {
            self.queue(doc).flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_document_loads_default() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonStore::open(&ChatServerConfig::with_base_dir(temp_dir.path()));

        let users: BTreeMap<String, String> = store.load(DocumentId::Users).await;
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_document_loads_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = ChatServerConfig::with_base_dir(temp_dir.path());
        std::fs::write(config.friends_path(), "{ malformed json ...").unwrap();

        let store = JsonStore::open(&config);
        let friends: BTreeMap<String, Vec<String>> = store.load(DocumentId::Friends).await;
        assert!(friends.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_json_round_trips_through_disk() {
        let temp_dir = TempDir::new().unwrap();
        let config = ChatServerConfig::with_base_dir(temp_dir.path());
        let store = JsonStore::open(&config);

        let mut doc = BTreeMap::new();
        doc.insert("alice".to_string(), vec!["bob".to_string()]);
        store
            .enqueue_json(DocumentId::Friends, &doc)
            .wait()
            .await
            .unwrap();

        let reopened = JsonStore::open(&config);
        let loaded: BTreeMap<String, Vec<String>> = reopened.load(DocumentId::Friends).await;
        assert_eq!(loaded, doc);
    }

    #[tokio::test]
    async fn test_snapshots_are_compact() {
        let temp_dir = TempDir::new().unwrap();
        let config = ChatServerConfig::with_base_dir(temp_dir.path());
        let store = JsonStore::open(&config);

        let mut doc = BTreeMap::new();
        doc.insert("alice".to_string(), vec!["bob".to_string(), "carol".to_string()]);
        store
            .enqueue_json(DocumentId::Friends, &doc)
            .wait()
            .await
            .unwrap();

        let content = std::fs::read_to_string(config.friends_path()).unwrap();
        assert_eq!(content, r#"{"alice":["bob","carol"]}"#);
    }

    #[tokio::test]
    async fn test_failing_document_does_not_block_others() {
        let temp_dir = TempDir::new().unwrap();
        let config = ChatServerConfig::with_base_dir(temp_dir.path());
        std::fs::create_dir(config.messages_path()).unwrap();
        std::fs::write(config.messages_path().join("blocker"), "x").unwrap();

        let store = JsonStore::open(&config);
        let broken = store.enqueue(DocumentId::Messages, b"[]".to_vec());
        let fine = store.enqueue(DocumentId::Users, b"{}".to_vec());

        assert!(fine.wait().await.is_ok());
        assert!(broken.wait().await.is_err());
        assert!(config.users_path().is_file());
    }
}
