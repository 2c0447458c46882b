//! Session transport: owns the one persistent connection to the server.
//!
//! Higher layers see three primitives: connect, disconnect, publish.
//! Reconnection after an unexpected close runs on a fixed backoff,
//! forever, until `disconnect()` is called; subscriptions are replayed
//! by the channel multiplexer on every `Connected` event because the
//! transport does not remember them across a hard reconnect.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shared::protocol::{ClientFrame, ServerFrame};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::header::AUTHORIZATION, Message as WsMessage},
};
use tracing::{error, info, warn};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(4);
/// Three missed heartbeats tear the socket down and enter the reconnect path.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Frame { destination: String, body: Value },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("missing credential: refusing to open a session")]
    MissingCredential,
    #[error("credential is not a valid header value")]
    InvalidCredential,
}

struct TransportInner {
    supervisor: Option<JoinHandle<()>>,
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
}

pub struct SessionTransport {
    ws_url: String,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<TransportInner>,
}

impl SessionTransport {
    pub fn new(
        ws_url: impl Into<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<Self> {
        Self::with_reconnect_delay(ws_url, events, RECONNECT_DELAY)
    }

    pub fn with_reconnect_delay(
        ws_url: impl Into<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
        reconnect_delay: Duration,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            ws_url: ws_url.into(),
            reconnect_delay,
            events,
            state_tx,
            inner: Mutex::new(TransportInner {
                supervisor: None,
                outbound: None,
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Establishes (or resumes) the logical session. No-op if a session
    /// supervisor is already running. An empty credential is fatal for
    /// this attempt: logged, no reconnect until a new one is supplied.
    pub async fn connect(self: &Arc<Self>, credential: &str) -> Result<(), TransportError> {
        if credential.trim().is_empty() {
            error!("session transport: missing credential, cannot connect");
            return Err(TransportError::MissingCredential);
        }

        let mut inner = self.inner.lock().await;
        if inner
            .supervisor
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            info!("session transport: already connected");
            return Ok(());
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        inner.outbound = Some(outbound_tx);
        let transport = Arc::clone(self);
        let credential = credential.to_string();
        inner.supervisor = Some(tokio::spawn(async move {
            transport.run_session(credential, outbound_rx).await;
        }));
        Ok(())
    }

    /// Deterministic teardown: stops the supervisor, drops queued
    /// outbound frames, and settles in `Disconnected`.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.supervisor.take() {
            task.abort();
        }
        inner.outbound = None;
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        let _ = self.events.send(TransportEvent::Disconnected);
        info!("session transport: disconnected");
    }

    /// Fire-and-forget publish. When the session is not connected the
    /// frame is logged and dropped; callers get no delivery guarantee
    /// beyond "transport accepted it".
    pub async fn publish(&self, destination: &str, body: Value) {
        self.send_frame(ClientFrame::Send {
            destination: destination.to_string(),
            body,
        })
        .await;
    }

    pub(crate) async fn send_frame(&self, frame: ClientFrame) {
        if !self.is_connected() {
            warn!("session transport: not connected, dropping frame: {frame:?}");
            return;
        }
        let inner = self.inner.lock().await;
        match &inner.outbound {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    warn!("session transport: session task gone, frame dropped");
                }
            }
            None => warn!("session transport: no active session, frame dropped"),
        }
    }

    async fn run_session(
        self: Arc<Self>,
        credential: String,
        mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
    ) {
        let mut first_attempt = true;
        loop {
            let _ = self.state_tx.send(if first_attempt {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });
            first_attempt = false;

            match self.run_connection(&credential, &mut outbound_rx).await {
                Ok(()) => info!("session transport: connection closed"),
                Err(err) => warn!("session transport: connection failed: {err:#}"),
            }

            let _ = self.state_tx.send(ConnectionState::Reconnecting);
            let _ = self.events.send(TransportEvent::Disconnected);
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn run_connection(
        &self,
        credential: &str,
        outbound_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
    ) -> Result<()> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid websocket url {}", self.ws_url))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {credential}")
                .parse()
                .map_err(|_| anyhow!("credential is not a valid header value"))?,
        );

        let (stream, _) = connect_async(request)
            .await
            .context("websocket connect failed")?;
        let (mut sink, mut reader) = stream.split();

        let _ = self.state_tx.send(ConnectionState::Connected);
        let _ = self.events.send(TransportEvent::Connected);
        info!("session transport: connected to {}", self.ws_url);

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_traffic = Instant::now();

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { return Ok(()); };
                    let text = serde_json::to_string(&frame).context("encode outbound frame")?;
                    sink.send(WsMessage::Text(text))
                        .await
                        .context("websocket send failed")?;
                }
                inbound = reader.next() => {
                    match inbound {
                        Some(Ok(WsMessage::Text(text))) => {
                            last_traffic = Instant::now();
                            self.route_inbound(&text);
                        }
                        Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                            last_traffic = Instant::now();
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            return Err(anyhow!("websocket receive failed: {err}"));
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if last_traffic.elapsed() > HEARTBEAT_TIMEOUT {
                        return Err(anyhow!("no traffic for {HEARTBEAT_TIMEOUT:?}, dropping connection"));
                    }
                    sink.send(WsMessage::Ping(Vec::new()))
                        .await
                        .context("websocket ping failed")?;
                }
            }
        }
    }

    fn route_inbound(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(ServerFrame::Message { destination, body }) => {
                let _ = self.events.send(TransportEvent::Frame { destination, body });
            }
            Ok(ServerFrame::Error { message }) => {
                warn!("session transport: server error frame: {message}");
            }
            Err(err) => warn!("session transport: dropping malformed frame: {err}"),
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
