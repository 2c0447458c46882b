use std::time::Duration;

use axum::{
    extract::ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade},
    http::{header, HeaderMap},
    routing::get,
    Router,
};
use serde_json::json;
use shared::protocol::{ClientFrame, ServerFrame};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

use super::{ConnectionState, SessionTransport, TransportError, TransportEvent};

const WAIT: Duration = Duration::from_secs(5);

/// WebSocket echo server: records the Authorization header, then
/// answers every subscribe with one message frame on that destination.
async fn spawn_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let (auth_tx, auth_rx) = mpsc::unbounded_channel();
    let app = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade, headers: HeaderMap| {
            let auth_tx = auth_tx.clone();
            async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let _ = auth_tx.send(auth);
                ws.on_upgrade(serve_socket)
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}/ws"), auth_rx)
}

async fn serve_socket(mut socket: WebSocket) {
    while let Some(Ok(frame)) = socket.recv().await {
        if let AxumWsMessage::Text(text) = frame {
            let parsed: ClientFrame = serde_json::from_str(&text).unwrap();
            if let ClientFrame::Subscribe { destination } = parsed {
                let reply = serde_json::to_string(&ServerFrame::Message {
                    destination,
                    body: json!({ "ok": true }),
                })
                .unwrap();
                if socket.send(AxumWsMessage::Text(reply)).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[tokio::test]
async fn connect_rejects_empty_credential() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = SessionTransport::new("ws://127.0.0.1:1/ws", tx);

    let result = transport.connect("   ").await;
    assert!(matches!(result, Err(TransportError::MissingCredential)));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn publish_while_disconnected_drops_frame() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = SessionTransport::new("ws://127.0.0.1:1/ws", tx);

    transport.publish("/app/chat.sendMessage", json!({})).await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn session_carries_bearer_credential_and_routes_frames() {
    let (url, mut auth_rx) = spawn_server().await;
    let (tx, mut events) = mpsc::unbounded_channel();
    let transport = SessionTransport::new(url, tx);

    transport.connect("token-1").await.unwrap();

    let connected = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(connected, TransportEvent::Connected));
    assert!(transport.is_connected());

    let auth = timeout(WAIT, auth_rx.recv()).await.unwrap().unwrap();
    assert_eq!(auth, "Bearer token-1");

    transport
        .send_frame(ClientFrame::Subscribe {
            destination: "/user/queue/messages".to_string(),
        })
        .await;

    let frame = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    match frame {
        TransportEvent::Frame { destination, body } => {
            assert_eq!(destination, "/user/queue/messages");
            assert_eq!(body, json!({ "ok": true }));
        }
        other => panic!("expected inbound frame, got {other:?}"),
    }

    transport.disconnect().await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_twice_keeps_one_session() {
    let (url, _auth_rx) = spawn_server().await;
    let (tx, mut events) = mpsc::unbounded_channel();
    let transport = SessionTransport::new(url, tx);

    transport.connect("token-1").await.unwrap();
    let connected = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(connected, TransportEvent::Connected));

    // Second connect is a no-op while the supervisor is alive.
    transport.connect("token-1").await.unwrap();
    let extra = timeout(Duration::from_millis(300), events.recv()).await;
    assert!(extra.is_err(), "no second Connected event expected");

    transport.disconnect().await;
}
