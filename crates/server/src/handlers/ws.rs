//! WebSocket transport
//!
//! One socket per connection. The token comes from `?token=` (browsers can't
//! set headers on a WebSocket) or a Bearer header. Frames are JSON text in
//! both directions; see [`crate::protocol`].

use super::auth::get_token_from_headers;
use crate::config::AppState;
use crate::protocol::ClientEvent;
use crate::router::{ChatRouter, EventReceiver};
use crate::session::ConnectionId;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /ws
pub async fn chat_ws(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = params
        .token
        .or_else(|| get_token_from_headers(&headers))
        .unwrap_or_default();
    let router = state.router.clone();

    ws.on_upgrade(move |socket| handle_socket(router, token, socket))
}

async fn handle_socket(router: Arc<ChatRouter>, token: String, socket: WebSocket) {
    let (conn, mut rx) = router.connect();
    let (mut sender, mut receiver) = socket.split();

    if router.authenticate(conn, &token).await.is_err() {
        // The router already queued an error event and dropped the connection;
        // deliver what is left, then close.
        forward_events(&mut rx, &mut sender).await;
        let _ = sender.send(WsMessage::Close(None)).await;
        return;
    }

    let mut send_task = tokio::spawn(async move {
        forward_events(&mut rx, &mut sender).await;
        let _ = sender.close().await;
    });

    let recv_router = router.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => dispatch(&recv_router, conn, text.as_str()),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    router.disconnect(conn);
    debug!("[WS] {} closed", conn);
}

fn dispatch(router: &ChatRouter, conn: ConnectionId, frame: &str) {
    match ClientEvent::parse(frame) {
        Ok(event) => {
            // Errors were already reported to the client as `error` events
            let _ = router.handle_event(conn, event);
        }
        Err(e) => router.report(conn, &e),
    }
}

async fn forward_events(rx: &mut EventReceiver, sender: &mut SplitSink<WebSocket, WsMessage>) {
    while let Some(event) = rx.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!("[WS] Failed to encode {} event: {}", event.name(), e);
                continue;
            }
        };
        if sender.send(WsMessage::Text(text.into())).await.is_err() {
            break;
        }
    }
}
