//! Connection manager: owns one WebSocket connection to the relay.
//!
//! Handles connect, bounded reconnect at a fixed interval, heartbeat
//! ping/pong, and outbound queuing while disconnected. Messages sent while
//! the socket is not open sit in the outbound channel and are flushed in
//! FIFO order as soon as the socket opens.

use super::EditSink;
use crate::config::LinkConfig;
use crate::ws::protocol::{self, ProtocolError, SyncMessage};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Heartbeat periods without a pong before the link is declared dead and
/// dropped into the reconnect path.
const LIVENESS_MISSES: u32 = 3;

/// Link lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: the reconnect bound was exceeded. Retry stops until a
    /// manual `connect()`.
    ConnectionError,
}

/// Events surfaced to the owner of the link.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Message(SyncMessage),
    ConnectionError,
}

pub struct ConnectionManager {
    config: LinkConfig,
    running: Arc<AtomicBool>,
    state_tx: Arc<watch::Sender<LinkState>>,
    session: Arc<Mutex<Option<u64>>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    outbound_tx: Mutex<mpsc::UnboundedSender<SyncMessage>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncMessage>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager and the receiver its events arrive on.
    pub fn new(config: LinkConfig) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(LinkState::Disconnected);

        let manager = Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            state_tx: Arc::new(state_tx),
            session: Arc::new(Mutex::new(None)),
            events_tx,
            outbound_tx: Mutex::new(outbound_tx),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
        };
        (manager, events_rx)
    }

    /// Watch the link state.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// The relay-assigned session identifier from the handshake, for
    /// diagnostics. Not stable across reconnects.
    pub fn current_session_id(&self) -> Option<u64> {
        *self.session.lock().unwrap()
    }

    /// Start the link loop if it is not already running.
    pub fn connect(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        // Lock order is always outbound_tx then outbound_rx.
        let rx = {
            let mut tx_slot = self.outbound_tx.lock().unwrap();
            let mut rx_slot = self.outbound_rx.lock().unwrap();
            match rx_slot.take() {
                Some(rx) => rx,
                None => {
                    // A previous loop consumed the queue; start a fresh one.
                    let (tx, rx) = mpsc::unbounded_channel();
                    *tx_slot = tx;
                    rx
                }
            }
        };

        let handle = tokio::spawn(run_link_loop(
            self.config.clone(),
            Arc::clone(&self.running),
            Arc::clone(&self.state_tx),
            Arc::clone(&self.session),
            self.events_tx.clone(),
            rx,
        ));
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Tear the link down. Queued messages are discarded.
    pub fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        *self.session.lock().unwrap() = None;
        self.state_tx.send_replace(LinkState::Disconnected);
    }

    /// Queue a message for the relay. Transmitted immediately while the
    /// socket is open; otherwise queued FIFO and a connection attempt is
    /// triggered if none is in flight.
    pub fn send(&self, msg: SyncMessage) {
        {
            let mut tx = self.outbound_tx.lock().unwrap();
            if let Err(rejected) = tx.send(msg) {
                // The previous link loop exited and dropped its receiver.
                // Re-queue on a fresh channel and park the receiver for the
                // next connection, so the message is replayed, not lost.
                let (new_tx, new_rx) = mpsc::unbounded_channel();
                let _ = new_tx.send(rejected.0);
                *self.outbound_rx.lock().unwrap() = Some(new_rx);
                *tx = new_tx;
            }
        }
        if !self.running.load(Ordering::SeqCst)
            && *self.state_tx.borrow() != LinkState::ConnectionError
        {
            self.connect();
        }
    }
}

impl EditSink for ConnectionManager {
    fn send_message(&self, msg: SyncMessage) {
        self.send(msg);
    }

    fn session_id(&self) -> Option<u64> {
        self.current_session_id()
    }
}

async fn run_link_loop(
    config: LinkConfig,
    running: Arc<AtomicBool>,
    state_tx: Arc<watch::Sender<LinkState>>,
    session: Arc<Mutex<Option<u64>>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    mut outbound: mpsc::UnboundedReceiver<SyncMessage>,
) {
    let mut attempts: u32 = 0;

    while running.load(Ordering::SeqCst) {
        state_tx.send_replace(LinkState::Connecting);
        debug!(url = %config.relay_url, "connecting to relay");

        match connect_async(&config.relay_url).await {
            Ok((stream, _response)) => {
                attempts = 0;
                info!(url = %config.relay_url, "relay link open");
                state_tx.send_replace(LinkState::Connected);
                let _ = events_tx.send(ConnectionEvent::Connected);

                let clean_close = run_connected(
                    &config,
                    &running,
                    &session,
                    &events_tx,
                    &mut outbound,
                    stream,
                )
                .await;

                *session.lock().unwrap() = None;
                state_tx.send_replace(LinkState::Disconnected);
                let _ = events_tx.send(ConnectionEvent::Disconnected);

                if clean_close {
                    info!("relay closed the link cleanly; not reconnecting");
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
            Err(e) => {
                warn!(url = %config.relay_url, error = %e, "relay connection failed");
                state_tx.send_replace(LinkState::Disconnected);
            }
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }

        attempts += 1;
        if attempts >= config.max_reconnect_attempts {
            error!(
                attempts,
                "reconnect bound exceeded; relay link is down until a manual reconnect"
            );
            running.store(false, Ordering::SeqCst);
            state_tx.send_replace(LinkState::ConnectionError);
            let _ = events_tx.send(ConnectionEvent::ConnectionError);
            break;
        }

        debug!(
            attempts,
            delay_ms = config.reconnect_interval.as_millis() as u64,
            "scheduling reconnect"
        );
        tokio::time::sleep(config.reconnect_interval).await;
    }
}

/// Drive one open socket until it drops. Returns true when the peer closed
/// with a normal-closure code (no reconnect wanted).
async fn run_connected(
    config: &LinkConfig,
    running: &AtomicBool,
    session: &Mutex<Option<u64>>,
    events_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    outbound: &mut mpsc::UnboundedReceiver<SyncMessage>,
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> bool {
    let (mut write, mut read) = stream.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut missed_pongs: u32 = 0;

    loop {
        if !running.load(Ordering::SeqCst) {
            let _ = write.send(Message::Close(None)).await;
            return true;
        }

        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match protocol::decode(&text) {
                    Ok(SyncMessage::Connection { client_id }) => {
                        debug!(client_id, "relay assigned session id");
                        *session.lock().unwrap() = Some(client_id);
                        let _ = events_tx.send(ConnectionEvent::Message(
                            SyncMessage::Connection { client_id },
                        ));
                    }
                    Ok(SyncMessage::Pong) => {
                        missed_pongs = 0;
                    }
                    Ok(msg) => {
                        let _ = events_tx.send(ConnectionEvent::Message(msg));
                    }
                    Err(ProtocolError::UnknownType(kind)) => {
                        warn!(kind, "ignoring unknown message type");
                    }
                    Err(e) => {
                        warn!(error = %e, "dropping malformed frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let clean = frame.map_or(false, |f| f.code == CloseCode::Normal);
                    debug!(clean, "relay closed the link");
                    return clean;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "socket error");
                    return false;
                }
                None => return false,
            },

            queued = outbound.recv() => match queued {
                Some(msg) => {
                    if write.send(Message::Text(protocol::encode(&msg))).await.is_err() {
                        warn!("send failed; dropping link");
                        return false;
                    }
                }
                // Manager dropped; nothing left to send.
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return true;
                }
            },

            _ = heartbeat.tick() => {
                if missed_pongs >= LIVENESS_MISSES {
                    warn!(missed_pongs, "heartbeat unanswered; dropping link");
                    return false;
                }
                missed_pongs += 1;
                if write.send(Message::Text(protocol::encode(&SyncMessage::Ping))).await.is_err() {
                    return false;
                }
            },
        }
    }
}
