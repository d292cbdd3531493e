//! End-to-end tests using a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parlor_protocol::{codec, ClientEvent, ServerEvent};
use parlor_server::{router, AppState, Config, JwtVerifier};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "integration-secret";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a server on an ephemeral port.
async fn boot(grace_period_ms: u64) -> SocketAddr {
    boot_with(|config| config.session.grace_period_ms = grace_period_ms).await
}

/// Boot a server with adjusted settings.
async fn boot_with(configure: impl FnOnce(&mut Config)) -> SocketAddr {
    let mut config = Config::default();
    config.auth.jwt_secret = SECRET.to_string();
    config.metrics.enabled = false;
    configure(&mut config);

    let state = Arc::new(AppState::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

fn token(username: &str) -> String {
    JwtVerifier::new(SECRET, 0)
        .issue(username, chrono::Duration::minutes(5))
        .unwrap()
}

async fn connect(addr: SocketAddr, username: &str) -> WsStream {
    let url = format!("ws://{addr}/ws?token={}", token(username));
    let (mut ws, _) = connect_async(url).await.unwrap();
    match next_event(&mut ws).await {
        ServerEvent::Connected(payload) => assert_eq!(payload.username, username),
        other => panic!("expected connected, got {other:?}"),
    }
    ws
}

/// Read the next event, skipping control frames.
async fn next_event(ws: &mut WsStream) -> ServerEvent {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("socket error");
        match msg {
            Message::Text(text) => return codec::decode_json(&text).unwrap(),
            Message::Binary(data) => return codec::decode(&data).unwrap(),
            Message::Close(frame) => panic!("unexpected close {frame:?}"),
            _ => continue,
        }
    }
}

/// Read events until one matches.
async fn wait_for(ws: &mut WsStream, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    loop {
        let event = next_event(ws).await;
        if pred(&event) {
            return event;
        }
    }
}

async fn send(ws: &mut WsStream, event: serde_json::Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

/// Read until the server closes, returning the close code.
async fn close_code(ws: &mut WsStream) -> Option<u16> {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code));
        }
    }
}

/// Open a WebSocket by hand that never writes after the handshake, so it
/// never answers pings. Returns every frame the server sent until EOF as
/// `(opcode, payload)`.
async fn silent_client(addr: SocketAddr, username: &str) -> Vec<(u8, Vec<u8>)> {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws?token={} HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        token(username)
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    timeout(TIMEOUT, stream.read_to_end(&mut raw))
        .await
        .expect("server never closed the socket")
        .unwrap();

    let head_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no handshake response")
        + 4;
    assert!(raw.starts_with(b"HTTP/1.1 101"));

    let mut frames = Vec::new();
    let mut rest = &raw[head_end..];
    while rest.len() >= 2 {
        let opcode = rest[0] & 0x0F;
        let (len, header) = match rest[1] & 0x7F {
            126 => (u16::from_be_bytes([rest[2], rest[3]]) as usize, 4),
            127 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&rest[2..10]);
                (u64::from_be_bytes(bytes) as usize, 10)
            }
            n => (n as usize, 2),
        };
        frames.push((opcode, rest[header..header + len].to_vec()));
        rest = &rest[header + len..];
    }
    frames
}

#[tokio::test]
async fn test_upgrade_without_token_is_unauthorized() {
    let addr = boot(5_000).await;

    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP error, got {other:?}"),
    }

    let bad = connect_async(format!("ws://{addr}/ws?token=garbage"))
        .await
        .unwrap_err();
    assert!(matches!(bad, tungstenite::Error::Http(ref r) if r.status() == 401));
}

#[tokio::test]
async fn test_join_and_broadcast_chat() {
    let addr = boot(5_000).await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;

    wait_for(&mut alice, |e| *e == ServerEvent::UserJoined("bob".into())).await;

    send(&mut bob, json!({"event": "chat-message", "data": "hello"})).await;

    for ws in [&mut alice, &mut bob] {
        match wait_for(ws, |e| matches!(e, ServerEvent::ChatMessage(_))).await {
            ServerEvent::ChatMessage(msg) => {
                assert_eq!(msg.sender_username, "bob");
                assert_eq!(msg.payload, json!("hello"));
            }
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_second_login_closes_first() {
    let addr = boot(5_000).await;
    let mut first = connect(addr, "alice").await;
    let _second = connect(addr, "alice").await;

    assert_eq!(close_code(&mut first).await, Some(4001));
}

#[tokio::test]
async fn test_private_message_and_history() {
    let addr = boot(5_000).await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;

    send(
        &mut alice,
        json!({"event": "private-message", "data": {"receiverUsername": "bob", "payload": "psst"}}),
    )
    .await;

    match wait_for(&mut bob, |e| matches!(e, ServerEvent::PrivateMessage(_))).await {
        ServerEvent::PrivateMessage(msg) => {
            assert_eq!(msg.sender_username, "alice");
            assert!(msg.is_private);
        }
        _ => unreachable!(),
    }

    send(
        &mut bob,
        json!({"event": "load-private-history", "data": {"targetUsername": "alice"}}),
    )
    .await;
    match wait_for(&mut bob, |e| matches!(e, ServerEvent::PrivateHistory(_))).await {
        ServerEvent::PrivateHistory(history) => {
            assert_eq!(history.target_username, "alice");
            assert_eq!(history.messages.len(), 1);
        }
        _ => unreachable!(),
    }

    send(
        &mut alice,
        json!({"event": "private-message", "data": {"receiverUsername": "alice", "payload": "me"}}),
    )
    .await;
    wait_for(&mut alice, |e| matches!(e, ServerEvent::Error(_))).await;
}

#[tokio::test]
async fn test_msgpack_client_gets_msgpack_replies() {
    let addr = boot(5_000).await;
    let mut alice = connect(addr, "alice").await;

    let request = codec::encode(&ClientEvent::RequestUserList).unwrap();
    alice.send(Message::Binary(request.to_vec())).await.unwrap();

    loop {
        let msg = timeout(TIMEOUT, alice.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Binary(data) = msg {
            let event: ServerEvent = codec::decode(&data).unwrap();
            if let ServerEvent::UserList(list) = event {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].username, "alice");
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_departure_after_grace_period() {
    let addr = boot(100).await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    wait_for(&mut alice, |e| *e == ServerEvent::UserJoined("bob".into())).await;

    bob.close(None).await.unwrap();
    drop(bob);

    wait_for(&mut alice, |e| *e == ServerEvent::UserLeft("bob".into())).await;
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let addr = boot(5_000).await;
    let _alice = connect(addr, "alice").await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET /health HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut body = String::new();
    stream.read_to_string(&mut body).await.unwrap();

    assert!(body.starts_with("HTTP/1.1 200"));
    assert!(body.contains("\"sessions\":1"));
}

#[tokio::test]
async fn test_silent_client_times_out_and_leaves() {
    let addr = boot_with(|config| {
        config.heartbeat.interval_ms = 50;
        config.heartbeat.timeout_ms = 150;
        config.session.grace_period_ms = 100;
    })
    .await;
    let mut bob = connect(addr, "bob").await;

    let alice = tokio::spawn(silent_client(addr, "alice"));

    wait_for(&mut bob, |e| *e == ServerEvent::UserJoined("alice".into())).await;
    wait_for(&mut bob, |e| *e == ServerEvent::UserLeft("alice".into())).await;

    let frames = alice.await.unwrap();
    assert!(frames.iter().any(|(opcode, _)| *opcode == 0x9), "no ping sent");
    let (_, close) = frames
        .iter()
        .find(|(opcode, _)| *opcode == 0x8)
        .expect("no close frame");
    assert_eq!(u16::from_be_bytes([close[0], close[1]]), 4002);
}

#[tokio::test]
async fn test_oversized_text_frame_is_closed() {
    let addr = boot_with(|config| config.transport.max_message_size = 64).await;
    let mut alice = connect(addr, "alice").await;

    let chat = json!({"event": "chat-message", "data": "x".repeat(200)});
    send(&mut alice, chat).await;

    assert_eq!(close_code(&mut alice).await, Some(4003));
}

#[tokio::test]
async fn test_binary_frame_limit_allows_length_prefix() {
    let addr = boot_with(|config| config.transport.max_message_size = 64).await;
    let mut alice = connect(addr, "alice").await;

    // Exactly the limit plus the prefix: accepted, but not a valid event.
    alice.send(Message::Binary(vec![0; 68])).await.unwrap();
    loop {
        let msg = timeout(TIMEOUT, alice.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match msg {
            Message::Binary(data) => {
                let event: ServerEvent = codec::decode(&data).unwrap();
                assert!(matches!(event, ServerEvent::Error(_)));
                break;
            }
            Message::Close(frame) => panic!("unexpected close {frame:?}"),
            _ => continue,
        }
    }

    alice.send(Message::Binary(vec![0; 69])).await.unwrap();
    assert_eq!(close_code(&mut alice).await, Some(4003));
}
