//! WebSocket transport for API clients.
//!
//! Flow:
//! 1. Client connects to `/ws`, optionally pre-authenticating with an
//!    `X-API-Key` header.
//! 2. Messages are JSON-RPC 2.0 text frames, handled by
//!    [`crate::api::methods::handle_payload`].
//! 3. A writer task drains the connection's outbound channel; the
//!    gateway pings every `ping_interval` and closes the socket when no
//!    pong arrives within `ping_timeout`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use i3_sessions::Transport;

use crate::api::methods::{handle_payload, ApiContext, ConnCtx};

/// GET /ws — upgrade to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let preauth_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(socket, ctx, preauth_key, addr))
}

async fn handle_socket(
    socket: WebSocket,
    ctx: ApiContext,
    preauth_key: Option<String>,
    addr: SocketAddr,
) {
    ctx.state.metrics.clients_connected.inc();
    let remote_ip = addr.ip().to_string();
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<String>(ctx.state.config.api.max_queue);
    // Control frames (pongs, close) bypass the text queue.
    let (ctrl_tx, mut ctrl_rx) = mpsc::channel::<Message>(8);
    let conn = Arc::new(ConnCtx::new(
        Transport::Ws,
        Some(remote_ip.clone()),
        outbound_tx,
    ));

    // Header pre-authentication: a bad key never gets a socket.
    if let Some(key) = preauth_key {
        match ctx.state.keys.authenticate(&key, Some(&remote_ip)) {
            Ok(grant) => {
                let session = ctx.state.sessions.create(
                    &grant.mud_name,
                    &grant.key_id,
                    grant.permissions,
                    Transport::Ws,
                );
                ctx.state
                    .sessions
                    .attach_sink(&session.id, conn.sink.clone());
                *conn.session_id.lock() = Some(session.id.clone());
                tracing::info!(
                    session_id = %session.id,
                    mud_name = %session.mud_name,
                    "client pre-authenticated via X-API-Key"
                );
            }
            Err(e) => {
                tracing::warn!(ip = %remote_ip, error = %e, "X-API-Key rejected");
                let _ = ws_sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: "invalid api key".into(),
                    })))
                    .await;
                ctx.state.metrics.clients_connected.dec();
                return;
            }
        }
    }

    // Writer: text frames from the queue, pings on schedule, close on
    // missed pong.
    let ping_interval = Duration::from_secs(ctx.state.config.api.ping_interval_secs);
    let ping_timeout = Duration::from_secs(ctx.state.config.api.ping_timeout_secs);
    let last_pong = Arc::new(Mutex::new(Instant::now()));
    let last_pong_writer = last_pong.clone();

    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + ping_interval,
            ping_interval,
        );
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => match msg {
                    Some(text) => {
                        if ws_sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                msg = ctrl_rx.recv() => match msg {
                    Some(msg) => {
                        let closing = matches!(msg, Message::Close(_));
                        if ws_sink.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if last_pong_writer.lock().elapsed() > ping_interval + ping_timeout {
                        tracing::debug!("no pong within timeout, closing socket");
                        let _ = ws_sink
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::AWAY,
                                reason: "ping timeout".into(),
                            })))
                            .await;
                        break;
                    }
                    if ws_sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader loop.
    let shutdown = ctx.state.shutdown.clone();
    loop {
        tokio::select! {
            msg = ws_stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(response) = handle_payload(&ctx, &conn, &text).await {
                        if conn.sink.try_send(response).is_err() {
                            // Queue saturated: this client is too slow.
                            tracing::warn!(ip = %remote_ip, "closing slow client");
                            let _ = ctrl_tx
                                .send(Message::Close(Some(CloseFrame {
                                    code: close_code::AGAIN,
                                    reason: "slow_client".into(),
                                })))
                                .await;
                            break;
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ctrl_tx.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    *last_pong.lock() = Instant::now();
                    if let Some(session_id) = conn.current_session_id() {
                        ctx.state.sessions.touch(&session_id);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(ip = %remote_ip, "ignoring binary frame");
                }
                Some(Err(e)) => {
                    tracing::debug!(ip = %remote_ip, error = %e, "websocket read error");
                    break;
                }
            },
            _ = shutdown.notified() => {
                let _ = ctrl_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "gateway shutting down".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    // Cleanup: the session survives for resume; only the sink goes.
    if let Some(session_id) = conn.current_session_id() {
        ctx.state.sessions.detach_sink(&session_id);
        tracing::info!(session_id = %session_id, "client disconnected");
    }
    // Let the writer flush a pending close frame before it dies.
    tokio::time::sleep(Duration::from_millis(50)).await;
    writer.abort();
    ctx.state.metrics.clients_connected.dec();
}
