//! Line-delimited TCP transport: one JSON-RPC message per
//! `\n`-terminated line. Oversized lines are a protocol error and cost
//! the connection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use i3_protocol::rpc::{Response, RpcError, INVALID_REQUEST};
use i3_sessions::Transport;

use crate::api::methods::{handle_payload, ApiContext, ConnCtx};

/// Accept loop. Runs until shutdown is signalled.
pub async fn serve(ctx: ApiContext, listener: TcpListener) {
    let shutdown = ctx.state.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        handle_conn(ctx, stream, addr.ip().to_string()).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tcp accept failed");
                }
            },
            _ = shutdown.notified() => {
                tracing::info!("tcp acceptor stopping");
                return;
            }
        }
    }
}

async fn handle_conn(ctx: ApiContext, stream: TcpStream, remote_ip: String) {
    ctx.state.metrics.clients_connected.inc();
    let max_line = ctx.state.config.api.max_line;
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(max_line));
    let (mut line_sink, mut line_stream) = framed.split();

    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<String>(ctx.state.config.api.max_queue);
    let conn = Arc::new(ConnCtx::new(
        Transport::Tcp,
        Some(remote_ip.clone()),
        outbound_tx,
    ));

    let writer = tokio::spawn(async move {
        while let Some(line) = outbound_rx.recv().await {
            if line_sink.send(line).await.is_err() {
                break;
            }
        }
    });

    let shutdown = ctx.state.shutdown.clone();
    loop {
        tokio::select! {
            line = line_stream.next() => match line {
                Some(Ok(line)) => {
                    let line = line.trim_end_matches('\r');
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(response) = handle_payload(&ctx, &conn, line).await {
                        if conn.sink.try_send(response).is_err() {
                            tracing::warn!(ip = %remote_ip, "closing slow client");
                            break;
                        }
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    tracing::warn!(ip = %remote_ip, max_line, "line too long, closing");
                    let error = Response::error(
                        None,
                        RpcError::new(INVALID_REQUEST, format!("line exceeds {max_line} bytes")),
                    );
                    if let Ok(json) = serde_json::to_string(&error) {
                        let _ = conn.sink.try_send(json);
                    }
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(ip = %remote_ip, error = %e, "tcp read error");
                    break;
                }
                None => break,
            },
            _ = shutdown.notified() => break,
        }
    }

    if let Some(session_id) = conn.current_session_id() {
        ctx.state.sessions.detach_sink(&session_id);
        tracing::info!(session_id = %session_id, "client disconnected");
    }
    // Give the writer a moment to flush the protocol error, then stop.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    writer.abort();
    ctx.state.metrics.clients_connected.dec();
}
