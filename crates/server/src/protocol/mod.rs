//! Realtime event protocol
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! [`ClientEvent`] is what connections send in, [`ServerEvent`] is what the
//! router fans out.

use crate::error::ChatError;
use crate::models::{Message, MessageKind, PresenceStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(String),
    SendMessage(SendMessagePayload),
    #[serde(alias = "message_recall")]
    RecallMessage(RecallPayload),
    AddFriend(AddFriendPayload),
}

impl ClientEvent {
    pub fn parse(frame: &str) -> Result<Self, ChatError> {
        serde_json::from_str(frame)
            .map_err(|e| ChatError::validation(format!("malformed event: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SendMessagePayload {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<MessageKind>,
    #[serde(default, alias = "message")]
    pub body: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RecallPayload {
    #[serde(rename = "msgId")]
    pub msg_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AddFriendPayload {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(Message),
    MessageRecalled {
        #[serde(rename = "msgId")]
        msg_id: Uuid,
    },
    RoomHistory(Vec<Message>),
    FriendsList(Vec<String>),
    FriendAdded {
        username: String,
    },
    FriendStatus {
        username: String,
        status: PresenceStatus,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(err: &ChatError) -> Self {
        ServerEvent::Error {
            message: err.client_message(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::MessageRecalled { .. } => "message_recalled",
            ServerEvent::RoomHistory(_) => "room_history",
            ServerEvent::FriendsList(_) => "friends_list",
            ServerEvent::FriendAdded { .. } => "friend_added",
            ServerEvent::FriendStatus { .. } => "friend_status",
            ServerEvent::Error { .. } => "error",
        }
    }
}
