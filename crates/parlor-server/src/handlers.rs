//! Connection handlers for Parlor server.
//!
//! This module handles the connection lifecycle: token check on upgrade,
//! frame decoding, heartbeat, and forwarding of core output to the socket.

use crate::auth::{extract_token, IdentityVerifier, JwtVerifier};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parlor_core::{ConnectionContext, Dispatcher, InboundEvent};
use parlor_protocol::{codec, ClientEvent, CloseCode, ConnectedPayload, Encoding, ServerEvent};
use parlor_transport::{ConnectionHub, ConnectionId, Outbound, Transport};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Headroom above `max_message_size` for the socket layer, so oversized
/// frames reach the handler and get a proper close code.
const FRAME_SLACK: usize = 64 * 1024;

/// Shared server state.
pub struct AppState {
    /// Per-connection outboxes.
    pub hub: Arc<ConnectionHub>,
    /// The core.
    pub dispatcher: Dispatcher,
    /// Upgrade token check.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with a JWT verifier built from the config.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let verifier = JwtVerifier::new(&config.auth.jwt_secret, config.auth.leeway_secs);
        Self::with_verifier(config, Arc::new(verifier))
    }

    /// Create new app state with a custom verifier.
    #[must_use]
    pub fn with_verifier(config: Config, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let hub = Arc::new(ConnectionHub::new());
        let dispatcher = Dispatcher::new(Arc::clone(&hub) as Arc<dyn Transport>, config.core());

        Self {
            hub,
            dispatcher,
            verifier,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config));
    let ws_path = state.config.transport.websocket_path.clone();
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;

    info!("Parlor server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.dispatcher.registry().len(),
        "connections": state.hub.len(),
    }))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// WebSocket upgrade handler. Rejects unauthenticated upgrades with 401.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let verified = match extract_token(params.token.as_deref(), &headers) {
        Ok(token) => state.verifier.verify(&token).await,
        Err(e) => Err(e),
    };
    let username = match verified {
        Ok(username) => username,
        Err(e) => {
            warn!(error = %e, "Rejected upgrade");
            metrics::record_auth_failure();
            return e.into_response();
        }
    };

    let limit = state
        .config
        .transport
        .max_message_size
        .saturating_add(FRAME_SLACK);
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_websocket(socket, state, username))
        .into_response()
}

/// Handle an authenticated WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, username: String) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let ctx = ConnectionContext::new(connection_id.clone(), username);
    let mut outbox = state.hub.register(connection_id.clone());

    debug!(connection = %connection_id, username = %ctx.username, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut encoding = Encoding::default();

    let connected = ServerEvent::Connected(ConnectedPayload {
        connection_id: connection_id.to_string(),
        username: ctx.username.clone(),
        heartbeat_ms: state.config.heartbeat.interval_ms,
    });
    if let Err(e) = send_event(&mut sender, &connected, encoding).await {
        error!(connection = %connection_id, error = %e, "Failed to send Connected event");
        state.hub.unregister(&connection_id);
        return;
    }

    let _ = state.dispatcher.dispatch(&ctx, InboundEvent::Connect);
    metrics::set_active_sessions(state.dispatcher.registry().len());

    let max_message_size = state.config.transport.max_message_size;
    let heartbeat_timeout = state.config.heartbeat.timeout();
    let interval = state.config.heartbeat.interval();
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    let mut last_seen = tokio::time::Instant::now();

    let reason: &'static str = loop {
        tokio::select! {
            biased;

            // Events queued by the core for this connection
            item = outbox.recv() => {
                match item {
                    Some(Outbound::Event(event)) => {
                        if let Err(e) = send_event(&mut sender, &event, encoding).await {
                            debug!(connection = %connection_id, error = %e, "Send failed");
                            break "send failed";
                        }
                    }
                    Some(Outbound::Close(code)) => {
                        if code == CloseCode::SessionReplaced {
                            metrics::record_replacement();
                        }
                        close_with(&mut sender, code).await;
                        break code.reason();
                    }
                    None => break "outbox closed",
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = tokio::time::Instant::now();
                        if text.len() > max_message_size {
                            warn!(connection = %connection_id, size = text.len(), "Message too large");
                            close_with(&mut sender, CloseCode::MessageTooLarge).await;
                            break CloseCode::MessageTooLarge.reason();
                        }
                        encoding = Encoding::Json;
                        metrics::record_message(text.len(), "inbound");
                        handle_client_event(&state, &ctx, codec::decode_json(&text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = tokio::time::Instant::now();
                        if data.len() > max_message_size.saturating_add(codec::LENGTH_PREFIX_SIZE) {
                            warn!(connection = %connection_id, size = data.len(), "Message too large");
                            close_with(&mut sender, CloseCode::MessageTooLarge).await;
                            break CloseCode::MessageTooLarge.reason();
                        }
                        encoding = Encoding::MessagePack;
                        metrics::record_message(data.len(), "inbound");
                        handle_client_event(&state, &ctx, codec::decode(&data));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = tokio::time::Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break "send failed";
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = tokio::time::Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break "client closed";
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break "socket error";
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break "stream ended";
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > heartbeat_timeout {
                    info!(connection = %connection_id, "Heartbeat timeout");
                    close_with(&mut sender, CloseCode::HeartbeatTimeout).await;
                    break CloseCode::HeartbeatTimeout.reason();
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break "send failed";
                }
            }
        }
    };

    // Unregister first so the departure broadcasts skip this socket.
    state.hub.unregister(&connection_id);
    let _ = state.dispatcher.dispatch(
        &ctx,
        InboundEvent::Disconnect {
            reason: reason.to_string(),
        },
    );
    metrics::set_active_sessions(state.dispatcher.registry().len());

    debug!(connection = %connection_id, reason, "WebSocket disconnected");
}

/// Dispatch a decoded client event, or report the decode failure.
fn handle_client_event(
    state: &AppState,
    ctx: &ConnectionContext,
    decoded: Result<ClientEvent, codec::ProtocolError>,
) {
    let event = match decoded {
        Ok(event) => event,
        Err(e) => {
            warn!(connection = %ctx.connection_id, error = %e, "Undecodable message");
            metrics::record_error("decode");
            let reply = Arc::new(ServerEvent::error("Invalid message format"));
            let _ = state.hub.deliver(&ctx.connection_id, reply);
            return;
        }
    };

    let start = Instant::now();
    if state
        .dispatcher
        .dispatch(ctx, InboundEvent::Client(event))
        .is_err()
    {
        metrics::record_error("dispatch");
    }
    metrics::record_dispatch(start.elapsed().as_secs_f64());
}

/// Send an event in the encoding the client last used.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    encoding: Encoding,
) -> Result<()> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_json(event)?),
        Encoding::MessagePack => Message::Binary(codec::encode(event)?.to_vec()),
    };
    let size = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_message(size, "outbound");
    sender.send(message).await?;
    Ok(())
}

/// Send a close frame, ignoring failures.
async fn close_with(sender: &mut SplitSink<WebSocket, Message>, code: CloseCode) {
    let frame = CloseFrame {
        code: code.as_u16(),
        reason: code.reason().into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}
