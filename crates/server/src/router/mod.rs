//! Chat router
//!
//! The hub every connection event goes through. It owns the presence
//! registry, the friend graph, the message log and the room subscriptions,
//! and turns each inbound event into outbound events for specific
//! connections.
//!
//! Every operation finishes its in-memory changes and fan-out before it
//! returns; only disk writes are left running in the background. Each shared
//! structure has its own lock. Operations that touch the message log hold
//! `ordering` across the log change and its delivery, so every connection
//! sees messages in log order. Locks are always taken in the order
//! `ordering`, `connections`, `rooms`.
//!
//! Outbound channels are bounded. A connection whose buffer is full is
//! disconnected rather than allowed to grow without limit.

use crate::auth::Authenticator;
use crate::config::ChatServerConfig;
use crate::error::{ChatError, Result};
use crate::friends::FriendGraph;
use crate::messages::MessageLog;
use crate::models::{Destination, Message, MessageKind, PresenceStatus};
use crate::presence::PresenceRegistry;
use crate::protocol::{AddFriendPayload, ClientEvent, SendMessagePayload, ServerEvent};
use crate::session::{ConnectionId, Session, SessionState};
use crate::store::JsonStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type EventReceiver = mpsc::Receiver<ServerEvent>;

struct Connection {
    tx: mpsc::Sender<ServerEvent>,
    session: Session,
}

pub struct ChatRouter {
    store: Arc<JsonStore>,
    auth: Arc<dyn Authenticator>,
    presence: PresenceRegistry,
    friends: FriendGraph,
    log: MessageLog,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    rooms: Mutex<HashMap<String, HashSet<ConnectionId>>>,
    /// Serializes log mutation with its fan-out
    ordering: Mutex<()>,
    history_limit: usize,
    max_image_bytes: usize,
    outbound_capacity: usize,
}

impl ChatRouter {
    /// Load the friend graph and message log and start routing
    pub async fn load(
        config: &ChatServerConfig,
        store: Arc<JsonStore>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let friends = FriendGraph::load(store.clone()).await;
        let log = MessageLog::load(store.clone(), config.max_log_entries, config.recall_window).await;

        Self {
            store,
            auth,
            presence: PresenceRegistry::new(),
            friends,
            log,
            connections: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            ordering: Mutex::new(()),
            history_limit: config.history_limit,
            max_image_bytes: config.max_image_bytes,
            outbound_capacity: config.outbound_capacity.max(1),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn friends(&self) -> &FriendGraph {
        &self.friends
    }

    pub fn messages(&self) -> &MessageLog {
        &self.log
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Wait until every queued document write has landed
    pub async fn flush(&self) {
        self.store.flush().await;
    }

    // ---- lifecycle ----

    /// Register a freshly opened transport connection
    pub fn connect(&self) -> (ConnectionId, EventReceiver) {
        let conn = ConnectionId::next();
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        self.connections.lock().insert(
            conn,
            Connection {
                tx,
                session: Session::new(),
            },
        );
        debug!("[Router] {} opened", conn);
        (conn, rx)
    }

    /// Handshake: bind `conn` to the identity behind `token`.
    ///
    /// A bad token gets an `error` event and the connection is closed.
    pub async fn authenticate(&self, conn: ConnectionId, token: &str) -> Result<String> {
        let state = self
            .connections
            .lock()
            .get(&conn)
            .map(|c| c.session.state.clone());
        match state {
            Some(SessionState::Unauthenticated) => {}
            Some(SessionState::Authenticated(_)) => {
                return Err(ChatError::validation("connection is already authenticated"))
            }
            None => return Err(ChatError::NotFound(format!("connection {}", conn))),
        }

        let identity = match self.auth.verify_token(token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("[Router] {} failed authentication: {}", conn, e);
                self.send_to(conn, ServerEvent::error(&e));
                self.disconnect(conn);
                return Err(e);
            }
        };
        let username = identity.username;

        {
            let mut connections = self.connections.lock();
            // The socket may have closed while the token was being checked
            let connection = connections
                .get_mut(&conn)
                .ok_or_else(|| ChatError::NotFound(format!("connection {}", conn)))?;
            connection.session.state = SessionState::Authenticated(username.clone());
        }

        if let Some(previous) = self.presence.set_online(&username, conn) {
            info!("[Router] {} superseded {} for {}", conn, previous, username);
        }

        let friends = self.friends.friends_of(&username);
        self.send_to(conn, ServerEvent::FriendsList(friends.iter().cloned().collect()));
        self.send_to_many(
            self.online_connections(&friends),
            &ServerEvent::FriendStatus {
                username: username.clone(),
                status: PresenceStatus::Online,
            },
        );

        info!("[Router] {} authenticated as {}", conn, username);
        Ok(username)
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn disconnect(&self, conn: ConnectionId) {
        let session = {
            let mut connections = self.connections.lock();
            let Some(connection) = connections.remove(&conn) else {
                return;
            };

            let mut rooms = self.rooms.lock();
            for room in &connection.session.rooms {
                let now_empty = match rooms.get_mut(room) {
                    Some(members) => {
                        members.remove(&conn);
                        members.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    rooms.remove(room);
                }
            }
            connection.session
        };

        let SessionState::Authenticated(username) = session.state else {
            debug!("[Router] {} closed before authenticating", conn);
            return;
        };

        if !self.presence.set_offline(&username, conn) {
            debug!("[Router] {} closed after being superseded for {}", conn, username);
            return;
        }

        let friends = self.friends.friends_of(&username);
        self.send_to_many(
            self.online_connections(&friends),
            &ServerEvent::FriendStatus {
                username: username.clone(),
                status: PresenceStatus::Offline,
            },
        );
        info!("[Router] {} ({}) went offline", username, conn);
    }

    // ---- inbound events ----

    /// Dispatch one inbound event. Failures are reported to `conn` as an
    /// `error` event and also returned.
    pub fn handle_event(&self, conn: ConnectionId, event: ClientEvent) -> Result<()> {
        let result = match event {
            ClientEvent::JoinRoom(room) => self.join_room(conn, &room),
            ClientEvent::SendMessage(payload) => self.send_message(conn, payload).map(|_| ()),
            ClientEvent::RecallMessage(payload) => self.recall_message(conn, payload.msg_id),
            ClientEvent::AddFriend(payload) => self.add_friend(conn, payload),
        };

        if let Err(e) = &result {
            self.report(conn, e);
        }
        result
    }

    /// Send `err` back to the connection that caused it
    pub fn report(&self, conn: ConnectionId, err: &ChatError) {
        debug!("[Router] {} error: {}", conn, err);
        self.send_to(conn, ServerEvent::error(err));
    }

    pub fn join_room(&self, conn: ConnectionId, room: &str) -> Result<()> {
        let room = non_blank(Some(room)).ok_or_else(|| ChatError::validation("room name is required"))?;
        self.username_of(conn)?;

        let _ordering = self.ordering.lock();
        {
            let mut connections = self.connections.lock();
            let connection = connections
                .get_mut(&conn)
                .ok_or_else(|| ChatError::NotFound(format!("connection {}", conn)))?;
            connection.session.rooms.insert(room.clone());
            self.rooms.lock().entry(room.clone()).or_default().insert(conn);
        }

        let history = self.log.history(&room, self.history_limit);
        debug!("[Router] {} joined {} ({} in history)", conn, room, history.len());
        self.send_to(conn, ServerEvent::RoomHistory(history));
        Ok(())
    }

    pub fn send_message(&self, conn: ConnectionId, payload: SendMessagePayload) -> Result<Message> {
        let sender = self.username_of(conn)?;
        let destination = resolve_destination(&payload)?;

        let image = payload.image.filter(|img| !img.is_empty());
        if payload.body.is_empty() && image.is_none() {
            return Err(ChatError::validation("message has no body or image"));
        }
        if let Some(img) = &image {
            if img.len() > self.max_image_bytes {
                return Err(ChatError::validation(format!(
                    "image is larger than {} bytes",
                    self.max_image_bytes
                )));
            }
        }

        let _ordering = self.ordering.lock();
        let (message, write) = self.log.append(&sender, destination.clone(), payload.body, image);
        write.detach("messages");

        let event = ServerEvent::ReceiveMessage(message.clone());
        match &destination {
            Destination::Room(room) => {
                self.send_to_many(self.room_members(room), &event);
            }
            Destination::Direct(target) => {
                // Offline targets simply miss it; DMs are never replayed
                let mut audience = BTreeSet::from([conn]);
                audience.extend(self.presence.lookup(target));
                self.send_to_many(audience, &event);
            }
        }

        debug!("[Router] {} sent {} ({:?})", sender, message.id, message.kind);
        Ok(message)
    }

    pub fn recall_message(&self, conn: ConnectionId, msg_id: Uuid) -> Result<()> {
        let requester = self.username_of(conn)?;
        let _ordering = self.ordering.lock();
        let (message, write) = self.log.recall(msg_id, &requester, Utc::now())?;
        write.detach("messages");

        let event = ServerEvent::MessageRecalled { msg_id };
        match message.destination() {
            Some(Destination::Room(room)) => {
                self.send_to_many(self.room_members(&room), &event);
            }
            Some(Destination::Direct(target)) => {
                let mut audience = BTreeSet::from([conn]);
                audience.extend(self.presence.lookup(&message.sender));
                audience.extend(self.presence.lookup(&target));
                self.send_to_many(audience, &event);
            }
            None => warn!("[Router] Recalled message {} has no destination", msg_id),
        }
        Ok(())
    }

    pub fn add_friend(&self, conn: ConnectionId, payload: AddFriendPayload) -> Result<()> {
        let username = self.username_of(conn)?;
        if payload.from != username {
            warn!(
                "[Router] {} tried to add a friend as {}",
                username, payload.from
            );
            return Err(ChatError::denied("cannot add friends on behalf of another user"));
        }
        let target = non_blank(Some(payload.to.as_str()))
            .ok_or_else(|| ChatError::validation("friend username is required"))?;
        if target == username {
            return Err(ChatError::validation("cannot add yourself as a friend"));
        }

        if let Some(write) = self.friends.add_edge(&username, &target) {
            write.detach("friends");
        }

        let target_conn = self.presence.lookup(&target);
        if let Some(target_conn) = target_conn {
            self.send_to(
                target_conn,
                ServerEvent::FriendAdded {
                    username: username.clone(),
                },
            );
            self.send_to(
                target_conn,
                ServerEvent::FriendStatus {
                    username: username.clone(),
                    status: PresenceStatus::Online,
                },
            );
        }

        self.send_to(
            conn,
            ServerEvent::FriendAdded {
                username: target.clone(),
            },
        );
        if target_conn.is_some() {
            self.send_to(
                conn,
                ServerEvent::FriendStatus {
                    username: target,
                    status: PresenceStatus::Online,
                },
            );
        }
        Ok(())
    }

    // ---- helpers ----

    fn username_of(&self, conn: ConnectionId) -> Result<String> {
        self.connections
            .lock()
            .get(&conn)
            .and_then(|c| c.session.username().map(str::to_string))
            .ok_or_else(|| ChatError::AuthenticationFailure(format!("{} is not authenticated", conn)))
    }

    fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .lock()
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    fn online_connections(&self, usernames: &BTreeSet<String>) -> Vec<ConnectionId> {
        usernames
            .iter()
            .filter_map(|name| self.presence.lookup(name))
            .collect()
    }

    fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
        self.send_to_many([conn], &event);
    }

    /// Queue `event` for each target. Connections whose buffer is full are
    /// disconnected once the connections lock is released.
    fn send_to_many<I>(&self, targets: I, event: &ServerEvent)
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let mut lagging = Vec::new();
        {
            let connections = self.connections.lock();
            for conn in targets {
                let Some(connection) = connections.get(&conn) else {
                    continue;
                };
                match connection.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => lagging.push(conn),
                    Err(TrySendError::Closed(_)) => {
                        debug!("[Router] {} is no longer reading", conn);
                    }
                }
            }
        }

        for conn in lagging {
            warn!(
                "[Router] {} fell {} events behind, dropping it",
                conn, self.outbound_capacity
            );
            self.disconnect(conn);
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Pick the destination: an explicit `type` wins, otherwise a present `room`
/// means a group message and anything else a DM
fn resolve_destination(payload: &SendMessagePayload) -> Result<Destination> {
    let kind = payload.kind.unwrap_or(if payload.room.is_some() {
        MessageKind::Group
    } else {
        MessageKind::Dm
    });

    match kind {
        MessageKind::Group => non_blank(payload.room.as_deref())
            .map(Destination::Room)
            .ok_or_else(|| ChatError::validation("group message needs a room")),
        MessageKind::Dm => non_blank(payload.target.as_deref())
            .map(Destination::Direct)
            .ok_or_else(|| ChatError::validation("direct message needs a target")),
    }
}
