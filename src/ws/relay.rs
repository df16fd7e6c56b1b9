//! The relay server: accepts WebSocket sessions and fans every inbound
//! message out to all other connected sessions.
//!
//! The relay holds no durable state. The session map is in-memory and lost
//! on restart; durability belongs to the content store, not the relay.

use super::protocol::{self, ProtocolError, SyncMessage};
use super::session::{Outgoing, Session, SessionId, SessionIdAllocator};
use axum::{
    extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Buffered outgoing frames per session before sends start dropping.
const SESSION_BUFFER: usize = 64;

/// Relay state shared by all session tasks.
pub struct Relay {
    sessions: RwLock<HashMap<SessionId, Session>>,
    ids: SessionIdAllocator,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ids: SessionIdAllocator::new(),
        }
    }

    /// Get the number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Register a new session and return its identifier.
    async fn register(&self, sender: mpsc::Sender<Outgoing>) -> SessionId {
        let id = self.ids.allocate();
        self.sessions
            .write()
            .await
            .insert(id, Session::new(id, sender));
        id
    }

    /// Remove a session; returns the number of sessions left.
    async fn unregister(&self, id: SessionId) -> usize {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
        sessions.len()
    }

    /// Broadcast a frame to all sessions except one.
    ///
    /// A failed send to one session never aborts delivery to the rest.
    pub async fn broadcast_except(&self, except: SessionId, text: &str) {
        let sessions = self.sessions.read().await;
        for (id, session) in sessions.iter() {
            if *id == except {
                continue;
            }
            if !session.try_send_frame(text.to_string()) {
                warn!(session = *id, "dropping frame for unresponsive session");
            }
        }
    }

    /// Send a frame to a single session.
    pub async fn send_to(&self, id: SessionId, text: String) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.get(&id) {
            Some(session) => session.try_send_frame(text),
            None => false,
        }
    }

    /// Close every session with a normal-closure frame.
    ///
    /// Used on graceful shutdown so peers see a clean close instead of a
    /// dropped socket.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        for session in sessions.values() {
            let _ = session.try_send(Outgoing::Close);
        }
        sessions.clear();
    }

    /// Drive one WebSocket session to completion.
    async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Outgoing>(SESSION_BUFFER);

        let id = self.register(tx).await;
        let total = self.session_count().await;
        info!(session = id, total, "session connected");

        // Writer task: owns the sink half, consumes queued frames.
        let writer = tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                match out {
                    Outgoing::Frame(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::NORMAL,
                                reason: "relay shutting down".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        });

        // Handshake goes to the new session only; the join event to peers.
        self.send_to(id, protocol::encode(&SyncMessage::Connection { client_id: id }))
            .await;
        self.broadcast_except(
            id,
            &protocol::encode(&SyncMessage::ClientJoined {
                total_clients: total,
            }),
        )
        .await;

        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_frame(id, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(session = id, error = %e, "socket error");
                    break;
                }
            }
        }

        writer.abort();
        let remaining = self.unregister(id).await;
        info!(session = id, total = remaining, "session disconnected");
        self.broadcast_except(
            id,
            &protocol::encode(&SyncMessage::ClientLeft {
                total_clients: remaining,
            }),
        )
        .await;
    }

    /// Route one inbound frame: ping is answered to the sender only,
    /// everything else is forwarded unmodified to all other sessions.
    async fn handle_frame(&self, from: SessionId, text: &str) {
        match protocol::decode(text) {
            Ok(SyncMessage::Ping) => {
                self.send_to(from, protocol::encode(&SyncMessage::Pong)).await;
            }
            Ok(msg) => {
                debug!(session = from, ?msg, "relaying");
                self.broadcast_except(from, text).await;
            }
            Err(ProtocolError::UnknownType(kind)) => {
                warn!(session = from, kind, "ignoring unknown message type");
            }
            Err(e) => {
                warn!(session = from, error = %e, "dropping malformed frame");
            }
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

async fn ws_handler(State(relay): State<Arc<Relay>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| relay.handle_socket(socket))
}

async fn health() -> &'static str {
    "OK"
}

/// Build the relay router with the WebSocket endpoint at `ws_path`.
pub fn create_router(relay: Arc<Relay>, ws_path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(ws_path, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(relay)
}
