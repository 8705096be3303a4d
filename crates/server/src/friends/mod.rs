//! Friend Graph Module
//!
//! Symmetric friendship relation between usernames, persisted as the
//! friends document. Edges are only ever added; both directions go in under
//! one lock so readers never see half an edge.

use crate::models::FriendsDocument;
use crate::store::{DocumentId, JsonStore, PendingWrite};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

pub struct FriendGraph {
    store: Arc<JsonStore>,
    edges: Mutex<FriendsDocument>,
}

impl FriendGraph {
    /// Load the graph from the friends document
    pub async fn load(store: Arc<JsonStore>) -> Self {
        let mut edges: FriendsDocument = store.load(DocumentId::Friends).await;
        let repaired = symmetrize(&mut edges);
        if repaired > 0 {
            warn!("[Friends] Repaired {} one-sided friendships on load", repaired);
        }
        info!("[Friends] Loaded graph with {} users", edges.len());

        Self {
            store,
            edges: Mutex::new(edges),
        }
    }

    /// Make `a` and `b` friends of each other.
    ///
    /// Returns `None` when nothing changed (already friends, or `a == b`),
    /// otherwise the pending write of the updated document.
    pub fn add_edge(&self, a: &str, b: &str) -> Option<PendingWrite> {
        if a == b {
            return None;
        }

        let mut edges = self.edges.lock();
        let added_ab = edges.entry(a.to_string()).or_default().insert(b.to_string());
        let added_ba = edges.entry(b.to_string()).or_default().insert(a.to_string());
        if !added_ab && !added_ba {
            return None;
        }

        info!("[Friends] {} <-> {}", a, b);
        Some(self.store.enqueue_json(DocumentId::Friends, &*edges))
    }

    pub fn friends_of(&self, username: &str) -> BTreeSet<String> {
        self.edges.lock().get(username).cloned().unwrap_or_default()
    }

    pub fn are_friends(&self, a: &str, b: &str) -> bool {
        self.edges
            .lock()
            .get(a)
            .map(|set| set.contains(b))
            .unwrap_or(false)
    }
}

/// Add any missing reverse edges and drop self-loops; returns how many
/// edges were added
fn symmetrize(edges: &mut FriendsDocument) -> usize {
    let mut missing = Vec::new();
    for (user, friends) in edges.iter_mut() {
        friends.remove(user);
        for friend in friends.iter() {
            missing.push((friend.clone(), user.clone()));
        }
    }

    let mut added = 0;
    for (user, friend) in missing {
        if edges.entry(user).or_default().insert(friend) {
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatServerConfig;
    use tempfile::TempDir;

    async fn graph(dir: &TempDir) -> FriendGraph {
        let store = Arc::new(JsonStore::open(&ChatServerConfig::with_base_dir(dir.path())));
        FriendGraph::load(store).await
    }

    #[tokio::test]
    async fn test_add_edge_is_symmetric_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let graph = graph(&dir).await;

        let pairs = [("alice", "bob"), ("bob", "carol"), ("alice", "bob"), ("carol", "alice")];
        for (a, b) in pairs {
            if let Some(write) = graph.add_edge(a, b) {
                write.wait().await.unwrap();
            }
        }

        for user in ["alice", "bob", "carol"] {
            for friend in graph.friends_of(user) {
                assert!(graph.friends_of(&friend).contains(user));
            }
        }
        assert_eq!(graph.friends_of("alice").len(), 2);
        assert!(graph.add_edge("bob", "alice").is_none());
    }

    #[tokio::test]
    async fn test_self_edge_is_ignored() {
        let dir = TempDir::new().unwrap();
        let graph = graph(&dir).await;

        assert!(graph.add_edge("alice", "alice").is_none());
        assert!(graph.friends_of("alice").is_empty());
    }

    #[tokio::test]
    async fn test_graph_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let graph = graph(&dir).await;
            graph.add_edge("alice", "bob").unwrap().wait().await.unwrap();
        }

        let graph = graph(&dir).await;
        assert!(graph.are_friends("alice", "bob"));
        assert!(graph.are_friends("bob", "alice"));
    }

    #[tokio::test]
    async fn test_load_repairs_one_sided_edges() {
        let dir = TempDir::new().unwrap();
        let config = ChatServerConfig::with_base_dir(dir.path());
        std::fs::write(config.friends_path(), r#"{"alice": ["bob", "alice"]}"#).unwrap();

        let graph = graph(&dir).await;
        assert!(graph.are_friends("bob", "alice"));
        assert!(!graph.are_friends("alice", "alice"));
    }

    #[test]
    fn test_unknown_user_has_no_friends() {
        let mut doc = FriendsDocument::new();
        assert_eq!(symmetrize(&mut doc), 0);
    }
}
