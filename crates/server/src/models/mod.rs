use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Registered user, keyed by username in the users document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub username: String,
    pub password_hash: String,
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Contents of users.json
pub type UsersDocument = BTreeMap<String, Identity>;

/// Contents of friends.json
pub type FriendsDocument = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Group,
    Dm,
}

/// Where a message goes: a room, or a single user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Room(String),
    Direct(String),
}

impl Destination {
    pub fn kind(&self) -> MessageKind {
        match self {
            Destination::Room(_) => MessageKind::Group,
            Destination::Direct(_) => MessageKind::Dm,
        }
    }
}

/// A single chat message.
///
/// `room` is set exactly when `kind` is `Group`, `target` exactly when it
/// is `Dm`. The only constructor takes a [`Destination`] so the pair can't
/// drift apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub room: Option<String>,
    pub sender: String,
    pub target: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub body: String,
    pub image: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub recalled: bool,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        destination: Destination,
        body: impl Into<String>,
        image: Option<String>,
    ) -> Self {
        let kind = destination.kind();
        let (room, target) = match destination {
            Destination::Room(room) => (Some(room), None),
            Destination::Direct(target) => (None, Some(target)),
        };

        Self {
            id: Uuid::new_v4(),
            room,
            sender: sender.into(),
            target,
            kind,
            body: body.into(),
            image,
            timestamp: Utc::now(),
            recalled: false,
        }
    }

    pub fn destination(&self) -> Option<Destination> {
        match (self.kind, &self.room, &self.target) {
            (MessageKind::Group, Some(room), None) => Some(Destination::Room(room.clone())),
            (MessageKind::Dm, None, Some(target)) => Some(Destination::Direct(target.clone())),
            _ => None,
        }
    }

    pub fn is_in_room(&self, room: &str) -> bool {
        self.kind == MessageKind::Group && self.room.as_deref() == Some(room)
    }

    /// Tombstone the message in place
    pub fn recall(&mut self) {
        self.recalled = true;
        self.body.clear();
        self.image = None;
    }

    /// Copy suitable for history replay: tombstones lose their sender too
    pub fn redacted(&self) -> Self {
        let mut msg = self.clone();
        if msg.recalled {
            msg.sender.clear();
            msg.body.clear();
            msg.image = None;
        }
        msg
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}
