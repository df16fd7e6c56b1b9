//! Connection manager integration tests against a live (or dead) relay.

use futures::StreamExt;
use pagesync::config::LinkConfig;
use pagesync::content::ContentPath;
use pagesync::sync::{ConnectionEvent, ConnectionManager, LinkState};
use pagesync::ws::{create_router, protocol, Relay, SyncMessage};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay() -> (SocketAddr, Arc<Relay>) {
    let relay = Arc::new(Relay::new());
    let app = create_router(relay.clone(), "/ws");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, relay)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (stream, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    stream
}

async fn recv_msg(client: &mut WsClient) -> SyncMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return protocol::decode(&text).expect("relay sent a valid frame");
        }
    }
}

fn link_config(addr: SocketAddr) -> LinkConfig {
    LinkConfig {
        relay_url: format!("ws://{}/ws", addr),
        reconnect_interval: Duration::from_millis(50),
        max_reconnect_attempts: 3,
        heartbeat_interval: Duration::from_secs(5),
    }
}

fn update(value: &str) -> SyncMessage {
    SyncMessage::ContentUpdate {
        path: ContentPath::parse("hero.title").unwrap(),
        value: json!(value),
        client_id: None,
        timestamp: 1,
    }
}

async fn wait_for_state(manager: &ConnectionManager, wanted: LinkState) {
    let mut state = manager.state();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *state.borrow_and_update() == wanted {
                return;
            }
            state.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {:?}", wanted));
}

#[tokio::test]
async fn test_queued_messages_replay_in_fifo_order() {
    let (addr, _relay) = spawn_relay().await;
    let mut observer = connect(addr).await;
    recv_msg(&mut observer).await; // handshake

    let (manager, _events) = ConnectionManager::new(link_config(addr));

    // Queue while disconnected; the first send kicks off the connection.
    manager.send(update("first"));
    manager.send(update("second"));
    manager.send(update("third"));

    // The observer sees the join, then the queue replayed in order.
    assert_eq!(
        recv_msg(&mut observer).await,
        SyncMessage::ClientJoined { total_clients: 2 }
    );
    assert_eq!(recv_msg(&mut observer).await, update("first"));
    assert_eq!(recv_msg(&mut observer).await, update("second"));
    assert_eq!(recv_msg(&mut observer).await, update("third"));
}

#[tokio::test]
async fn test_bounded_reconnection_reaches_terminal_state() {
    // Reserve a port, then free it so nothing is listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (manager, mut events) = ConnectionManager::new(link_config(addr));
    manager.connect();

    wait_for_state(&manager, LinkState::ConnectionError).await;

    let mut saw_terminal_event = false;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ConnectionEvent::Connected),
            "must never report a connection"
        );
        if event == ConnectionEvent::ConnectionError {
            saw_terminal_event = true;
        }
    }
    assert!(saw_terminal_event);

    // Terminal means terminal: no background retry resumes.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*manager.state().borrow(), LinkState::ConnectionError);
}

#[tokio::test]
async fn test_manual_reconnect_after_terminal_state() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (manager, _events) = ConnectionManager::new(link_config(addr));
    manager.connect();
    wait_for_state(&manager, LinkState::ConnectionError).await;

    // A relay appears on the reserved port; a manual connect recovers.
    let relay = Arc::new(Relay::new());
    let app = create_router(relay.clone(), "/ws");
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    manager.connect();
    wait_for_state(&manager, LinkState::Connected).await;
}

#[tokio::test]
async fn test_handshake_session_id_is_captured() {
    let (addr, _relay) = spawn_relay().await;
    let (manager, mut events) = ConnectionManager::new(link_config(addr));
    manager.connect();

    wait_for_state(&manager, LinkState::Connected).await;

    // The handshake is also surfaced as an event.
    let handshake = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await.expect("events channel closed") {
                ConnectionEvent::Message(SyncMessage::Connection { client_id }) => {
                    return client_id
                }
                _ => continue,
            }
        }
    })
    .await
    .expect("no handshake event");

    assert_eq!(manager.current_session_id(), Some(handshake));
}

#[tokio::test]
async fn test_heartbeat_keeps_link_alive() {
    let (addr, _relay) = spawn_relay().await;
    let mut config = link_config(addr);
    config.heartbeat_interval = Duration::from_millis(50);

    let (manager, _events) = ConnectionManager::new(config);
    manager.connect();
    wait_for_state(&manager, LinkState::Connected).await;

    // Several heartbeat periods pass; the relay answers pongs, so the
    // liveness check never trips.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(*manager.state().borrow(), LinkState::Connected);
}

#[tokio::test]
async fn test_disconnect_tears_down_link() {
    let (addr, relay) = spawn_relay().await;
    let (manager, _events) = ConnectionManager::new(link_config(addr));
    manager.connect();
    wait_for_state(&manager, LinkState::Connected).await;

    manager.disconnect();
    assert_eq!(*manager.state().borrow(), LinkState::Disconnected);
    assert_eq!(manager.current_session_id(), None);

    // The relay notices the drop.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if relay.session_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("relay never dropped the session");
}

#[tokio::test]
async fn test_clean_server_close_does_not_reconnect() {
    let (addr, relay) = spawn_relay().await;
    let (manager, _events) = ConnectionManager::new(link_config(addr));
    manager.connect();
    wait_for_state(&manager, LinkState::Connected).await;

    relay.close_all().await;

    wait_for_state(&manager, LinkState::Disconnected).await;
    // A clean close is final; no reconnect attempt follows.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*manager.state().borrow(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_send_after_clean_close_requeues_and_replays() {
    let (addr, relay) = spawn_relay().await;
    let (manager, _events) = ConnectionManager::new(link_config(addr));
    manager.connect();
    wait_for_state(&manager, LinkState::Connected).await;

    relay.close_all().await;
    wait_for_state(&manager, LinkState::Disconnected).await;

    let mut observer = connect(addr).await;
    recv_msg(&mut observer).await; // handshake

    // The previous link loop is gone; the send must survive the dead
    // queue, trigger a reconnect, and be replayed to peers.
    manager.send(update("after close"));

    assert_eq!(
        recv_msg(&mut observer).await,
        SyncMessage::ClientJoined { total_clients: 2 }
    );
    assert_eq!(recv_msg(&mut observer).await, update("after close"));
}

/// A WebSocket server that completes the handshake but never answers any
/// frame, application-level pings included.
async fn spawn_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_missed_pongs_drop_the_link() {
    let addr = spawn_silent_server().await;
    let mut config = link_config(addr);
    config.heartbeat_interval = Duration::from_millis(40);

    let (manager, mut events) = ConnectionManager::new(config);
    manager.connect();
    wait_for_state(&manager, LinkState::Connected).await;

    // The server swallows every heartbeat ping; the liveness check trips
    // and the link is dropped into the reconnect path.
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match events.recv().await.expect("events channel closed") {
                ConnectionEvent::Disconnected => return,
                _ => continue,
            }
        }
    })
    .await
    .expect("unanswered heartbeats never dropped the link");
}

#[tokio::test]
async fn test_messages_flow_between_two_managers() {
    let (addr, _relay) = spawn_relay().await;

    let (a, _a_events) = ConnectionManager::new(link_config(addr));
    let (b, mut b_events) = ConnectionManager::new(link_config(addr));
    a.connect();
    b.connect();
    wait_for_state(&a, LinkState::Connected).await;
    wait_for_state(&b, LinkState::Connected).await;

    a.send(update("hello"));

    let received = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match b_events.recv().await.expect("events channel closed") {
                ConnectionEvent::Message(msg @ SyncMessage::ContentUpdate { .. }) => return msg,
                _ => continue,
            }
        }
    })
    .await
    .expect("peer never received the update");

    assert_eq!(received, update("hello"));
}
