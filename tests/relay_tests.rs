//! Relay server integration tests: real listener, real WebSocket clients.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use pagesync::content::ContentPath;
use pagesync::ws::{create_router, protocol, Relay, SyncMessage};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::util::ServiceExt;

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

async fn send_msg(client: &mut WsClient, msg: &SyncMessage) {
    client
        .send(Message::Text(protocol::encode(msg)))
        .await
        .unwrap();
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

/// Assert no text frame arrives for a short while.
async fn expect_silence(client: &mut WsClient) {
    match tokio::time::timeout(Duration::from_millis(200), client.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {}", text),
        Ok(_) => {}
    }
}

async fn drain(client: &mut WsClient, n: usize) -> Vec<SyncMessage> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(recv_msg(client).await);
    }
    out
}

fn update(value: &str) -> SyncMessage {
    SyncMessage::ContentUpdate {
        path: ContentPath::parse("hero.title").unwrap(),
        value: json!(value),
        client_id: Some(1),
        timestamp: 1,
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let relay = Arc::new(Relay::new());
    let app = create_router(relay, "/ws");

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_handshake_carries_session_id() {
    let (addr, _relay) = spawn_relay().await;
    let mut a = connect(addr).await;

    match recv_msg(&mut a).await {
        SyncMessage::Connection { client_id } => assert!(client_id > 0),
        other => panic!("expected handshake first, got {:?}", other),
    }
}

#[tokio::test]
async fn test_session_ids_are_unique() {
    let (addr, _relay) = spawn_relay().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    let id_a = match recv_msg(&mut a).await {
        SyncMessage::Connection { client_id } => client_id,
        other => panic!("expected handshake, got {:?}", other),
    };
    let id_b = match recv_msg(&mut b).await {
        SyncMessage::Connection { client_id } => client_id,
        other => panic!("expected handshake, got {:?}", other),
    };
    assert_ne!(id_a, id_b);
}

#[tokio::test]
async fn test_join_event_goes_to_peers_only() {
    let (addr, _relay) = spawn_relay().await;
    let mut a = connect(addr).await;
    drain(&mut a, 1).await; // handshake

    let mut b = connect(addr).await;
    drain(&mut b, 1).await; // handshake

    assert_eq!(
        recv_msg(&mut a).await,
        SyncMessage::ClientJoined { total_clients: 2 }
    );
    expect_silence(&mut b).await;
}

#[tokio::test]
async fn test_broadcast_excludes_sender() {
    let (addr, _relay) = spawn_relay().await;
    let mut a = connect(addr).await;
    drain(&mut a, 1).await;
    let mut b = connect(addr).await;
    drain(&mut b, 1).await;
    drain(&mut a, 1).await; // b joined
    let mut c = connect(addr).await;
    drain(&mut c, 1).await;
    drain(&mut a, 1).await; // c joined
    drain(&mut b, 1).await; // c joined

    let msg = update("from a");
    send_msg(&mut a, &msg).await;

    assert_eq!(recv_msg(&mut b).await, msg);
    assert_eq!(recv_msg(&mut c).await, msg);
    expect_silence(&mut a).await;
}

#[tokio::test]
async fn test_ping_answered_to_sender_only() {
    let (addr, _relay) = spawn_relay().await;
    let mut a = connect(addr).await;
    drain(&mut a, 1).await;
    let mut b = connect(addr).await;
    drain(&mut b, 1).await;
    drain(&mut a, 1).await; // b joined

    send_msg(&mut a, &SyncMessage::Ping).await;

    assert_eq!(recv_msg(&mut a).await, SyncMessage::Pong);
    expect_silence(&mut b).await;
}

#[tokio::test]
async fn test_client_left_reports_remaining_count() {
    let (addr, relay) = spawn_relay().await;
    let mut a = connect(addr).await;
    drain(&mut a, 1).await;
    let mut b = connect(addr).await;
    drain(&mut b, 1).await;
    drain(&mut a, 1).await;
    let mut c = connect(addr).await;
    drain(&mut c, 1).await;
    drain(&mut a, 1).await;
    drain(&mut b, 1).await;

    assert_eq!(relay.session_count().await, 3);

    b.close(None).await.unwrap();

    assert_eq!(
        recv_msg(&mut a).await,
        SyncMessage::ClientLeft { total_clients: 2 }
    );
    assert_eq!(
        recv_msg(&mut c).await,
        SyncMessage::ClientLeft { total_clients: 2 }
    );
}

#[tokio::test]
async fn test_unknown_type_is_ignored_and_connection_survives() {
    let (addr, _relay) = spawn_relay().await;
    let mut a = connect(addr).await;
    drain(&mut a, 1).await;
    let mut b = connect(addr).await;
    drain(&mut b, 1).await;
    drain(&mut a, 1).await;

    a.send(Message::Text(r#"{"type":"mystery","data":1}"#.to_string()))
        .await
        .unwrap();

    expect_silence(&mut b).await;

    // The sender's connection is still usable.
    send_msg(&mut a, &SyncMessage::Ping).await;
    assert_eq!(recv_msg(&mut a).await, SyncMessage::Pong);
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() {
    let (addr, _relay) = spawn_relay().await;
    let mut a = connect(addr).await;
    drain(&mut a, 1).await;
    let mut b = connect(addr).await;
    drain(&mut b, 1).await;
    drain(&mut a, 1).await;

    a.send(Message::Text("not json".to_string())).await.unwrap();

    expect_silence(&mut b).await;
    send_msg(&mut a, &SyncMessage::Ping).await;
    assert_eq!(recv_msg(&mut a).await, SyncMessage::Pong);
}

#[tokio::test]
async fn test_admin_messages_are_relayed() {
    let (addr, _relay) = spawn_relay().await;
    let mut a = connect(addr).await;
    drain(&mut a, 1).await;
    let mut b = connect(addr).await;
    drain(&mut b, 1).await;
    drain(&mut a, 1).await;

    let msg = SyncMessage::AdminStatus {
        is_admin: true,
        client_id: Some(1),
    };
    send_msg(&mut a, &msg).await;
    assert_eq!(recv_msg(&mut b).await, msg);
}

#[tokio::test]
async fn test_close_all_sends_normal_closure() {
    let (addr, relay) = spawn_relay().await;
    let mut a = connect(addr).await;
    drain(&mut a, 1).await;

    relay.close_all().await;

    let frame = tokio::time::timeout(Duration::from_secs(2), a.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .expect("socket error");
    match frame {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected normal close, got {:?}", other),
    }
}
