//! JSON-RPC method dispatch: auth, rate limiting, permission checks,
//! then the service call. One entry point per connection payload, used
//! identically by the WebSocket and TCP transports.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};

use i3_domain::event::{name, Event, EventScope};
use i3_domain::Error;
use i3_protocol::rpc::{
    self, parse_incoming, Incoming, Notification, Request, Response, RpcError,
};
use i3_sessions::{SessionEntry, Transport};

use crate::services::Services;
use crate::state::AppState;

/// Shared handles every connection handler needs.
#[derive(Clone)]
pub struct ApiContext {
    pub state: AppState,
    pub services: Arc<Services>,
}

/// Per-connection context, owned by the connection's reader task.
pub struct ConnCtx {
    pub transport: Transport,
    pub remote_ip: Option<String>,
    /// Outbound channel drained by the connection's writer task.
    pub sink: tokio::sync::mpsc::Sender<String>,
    pub session_id: Mutex<Option<String>>,
}

impl ConnCtx {
    pub fn new(
        transport: Transport,
        remote_ip: Option<String>,
        sink: tokio::sync::mpsc::Sender<String>,
    ) -> Self {
        Self {
            transport,
            remote_ip,
            sink,
            session_id: Mutex::new(None),
        }
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle one wire payload (a WS text frame or a TCP line). Returns the
/// serialized response to write back, if one is owed.
pub async fn handle_payload(ctx: &ApiContext, conn: &ConnCtx, raw: &str) -> Option<String> {
    if let Some(session_id) = conn.current_session_id() {
        ctx.state
            .sessions
            .record_request(&session_id, raw.len() as u64);
    }

    match parse_incoming(raw) {
        Incoming::Single(Err(response)) => {
            ctx.state.metrics.api_errors.inc();
            serialize(&response)
        }
        Incoming::Single(Ok(request)) => {
            let response = handle_request(ctx, conn, request).await?;
            serialize(&response)
        }
        Incoming::Batch(items) => {
            let mut responses = Vec::new();
            for item in items {
                match item {
                    Err(response) => {
                        ctx.state.metrics.api_errors.inc();
                        responses.push(response);
                    }
                    Ok(request) => {
                        if let Some(response) = handle_request(ctx, conn, request).await {
                            responses.push(response);
                        }
                    }
                }
            }
            if responses.is_empty() {
                // All notifications: no batch response at all.
                None
            } else {
                serde_json::to_string(&responses).ok()
            }
        }
    }
}

fn serialize(response: &Response) -> Option<String> {
    serde_json::to_string(response).ok()
}

/// Handle one request. Notifications return `None`; their failures
/// become `error_occurred` events instead of responses.
pub async fn handle_request(
    ctx: &ApiContext,
    conn: &ConnCtx,
    request: Request,
) -> Option<Response> {
    ctx.state
        .metrics
        .api_requests
        .with_label_values(&[request.method.as_str()])
        .inc();

    let id = request.id.clone();
    let result = route(ctx, conn, &request).await;

    match id {
        Some(id) => Some(match result {
            Ok(value) => Response::result(id, value),
            Err(error) => {
                ctx.state.metrics.api_errors.inc();
                if let Some(session_id) = conn.current_session_id() {
                    ctx.state.sessions.record_error(&session_id);
                }
                Response::error(Some(id), error)
            }
        }),
        None => {
            if let Err(error) = result {
                ctx.state.metrics.api_errors.inc();
                if let Some(session_id) = conn.current_session_id() {
                    ctx.state.bus.publish(
                        Event::new(
                            name::ERROR_OCCURRED,
                            json!({
                                "method": request.method,
                                "code": error.code,
                                "message": error.message,
                            }),
                            EventScope::Session(session_id),
                        )
                        .priority(6)
                        .expires_in(chrono::Duration::seconds(300)),
                    );
                }
            }
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Method tag required to call a method; `None` means any session.
fn permission_tag(method: &str) -> Option<&'static str> {
    match method {
        "tell" | "emoteto" => Some("tell"),
        m if m.starts_with("channel_") => Some("channel"),
        "who" | "finger" | "locate" | "mudlist" => Some("info"),
        "reconnect" | "shutdown" => Some("admin"),
        _ => None,
    }
}

async fn route(
    ctx: &ApiContext,
    conn: &ConnCtx,
    request: &Request,
) -> std::result::Result<Value, RpcError> {
    let params = request.params.clone().unwrap_or_else(|| json!({}));
    let method = request.method.as_str();

    // Unauthenticated methods first.
    match method {
        "authenticate" => return authenticate(ctx, conn, params).map_err(rpc_error_of),
        "resume" => return resume(ctx, conn, params).await.map_err(rpc_error_of),
        "ping" => {
            return Ok(json!({ "status": "pong", "time": Utc::now() }));
        }
        _ => {}
    }

    let session = current_session(ctx, conn).map_err(rpc_error_of)?;

    // Rate limits before permissions: a throttled client learns nothing
    // about which methods its key covers.
    ctx.state
        .rate
        .check(&session.id, method)
        .map_err(|retry_after_ms| {
            ctx.state.metrics.rate_limited.inc();
            rpc_error_of(Error::RateLimited { retry_after_ms })
        })?;
    if let Some(remaining) = ctx.state.rate.remaining(&session.id, method) {
        if remaining <= 2 {
            ctx.state.bus.publish(
                Event::new(
                    name::RATE_LIMIT_WARNING,
                    json!({ "method": method, "remaining": remaining }),
                    EventScope::Session(session.id.clone()),
                )
                .priority(4)
                .expires_in(chrono::Duration::seconds(60)),
            );
        }
    }

    if let Some(tag) = permission_tag(method) {
        if !session.has_permission(tag) {
            return Err(rpc_error_of(Error::PermissionDenied(method.to_string())));
        }
    }

    let services = &ctx.services;
    let result = match method {
        "tell" => services.tell.send_tell(&session, params),
        "emoteto" => services.tell.send_emoteto(&session, params),
        "channel_send" => services.channel.send_message(&session, params),
        "channel_emote" => services.channel.send_emote(&session, params),
        "channel_targeted" => services.channel.send_targeted(&session, params),
        "channel_join" => services.channel.join(&session, params),
        "channel_leave" => services.channel.leave(&session, params),
        "channel_list" => services.channel.list(params),
        "channel_who" => services.channel.who(params).await,
        "channel_history" => services.channel.history(params),
        "who" => services.query.who(params).await,
        "finger" => services.query.finger(params).await,
        "locate" => services.query.locate(params).await,
        "mudlist" => services.mudlist.mudlist(params),
        "subscribe" => subscribe(ctx, &session, params, true),
        "unsubscribe" => subscribe(ctx, &session, params, false),
        "close" => close(ctx, conn, &session),
        "status" => status(ctx),
        "stats" => stats(ctx),
        "reconnect" => {
            ctx.state.link.request_reconnect();
            Ok(json!({ "status": "reconnecting" }))
        }
        "shutdown" => {
            tracing::warn!(session_id = %session.id, "shutdown requested via API");
            ctx.state.shutdown.notify_waiters();
            ctx.state.shutdown.notify_one();
            Ok(json!({ "status": "shutting_down" }))
        }
        _ => return Err(RpcError::method_not_found(method)),
    };
    result.map_err(rpc_error_of)
}

fn current_session(ctx: &ApiContext, conn: &ConnCtx) -> Result<SessionEntry, Error> {
    let session_id = conn
        .current_session_id()
        .ok_or(Error::NotAuthenticated)?;
    ctx.state
        .sessions
        .get(&session_id)
        .ok_or(Error::SessionExpired)
}

// ── Session methods ──────────────────────────────────────────────────

fn authenticate(ctx: &ApiContext, conn: &ConnCtx, params: Value) -> Result<Value, Error> {
    // Idempotent within an authenticated connection.
    if let Some(session_id) = conn.current_session_id() {
        if let Some(session) = ctx.state.sessions.get(&session_id) {
            return Ok(auth_result(&session));
        }
    }

    let api_key = params
        .get("api_key")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidParams("api_key is required".into()))?;
    let grant = ctx
        .state
        .keys
        .authenticate(api_key, conn.remote_ip.as_deref())?;

    let session = ctx.state.sessions.create(
        &grant.mud_name,
        &grant.key_id,
        grant.permissions,
        conn.transport,
    );
    ctx.state.sessions.attach_sink(&session.id, conn.sink.clone());
    *conn.session_id.lock() = Some(session.id.clone());
    ctx.state
        .metrics
        .sessions_active
        .set(ctx.state.sessions.len() as i64);
    Ok(auth_result(&session))
}

fn auth_result(session: &SessionEntry) -> Value {
    let mut permissions: Vec<&String> = session.permissions.iter().collect();
    permissions.sort();
    json!({
        "status": "authenticated",
        "mud_name": session.mud_name,
        "session_id": session.id,
        "permissions": permissions,
    })
}

async fn resume(ctx: &ApiContext, conn: &ConnCtx, params: Value) -> Result<Value, Error> {
    let session_id = params
        .get("session_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidParams("session_id is required".into()))?;

    let (session, queued) = ctx.state.sessions.resume(session_id, conn.transport)?;
    ctx.state.sessions.attach_sink(&session.id, conn.sink.clone());
    *conn.session_id.lock() = Some(session.id.clone());

    // Drain the offline queue before any new live event can interleave.
    let queued_count = queued.len();
    for event in queued {
        let notification = Notification::new(&event.name, event.payload);
        if let Ok(json) = serde_json::to_string(&notification) {
            if conn.sink.send(json).await.is_err() {
                break;
            }
        }
    }
    Ok(json!({ "status": "resumed", "queued_events": queued_count }))
}

fn subscribe(
    ctx: &ApiContext,
    session: &SessionEntry,
    params: Value,
    add: bool,
) -> Result<Value, Error> {
    let events: Vec<String> = params
        .get("events")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let mut filters = session.event_filters.clone();
    if add {
        filters.extend(events);
    } else {
        for event in &events {
            filters.remove(event);
        }
    }
    ctx.state.sessions.set_event_filters(&session.id, filters);
    Ok(json!({ "status": "ok" }))
}

fn close(ctx: &ApiContext, conn: &ConnCtx, session: &SessionEntry) -> Result<Value, Error> {
    ctx.state.sessions.remove(&session.id);
    ctx.state.rate.remove(&session.id);
    *conn.session_id.lock() = None;
    ctx.state
        .metrics
        .sessions_active
        .set(ctx.state.sessions.len() as i64);
    Ok(json!({ "status": "closed" }))
}

// ── Introspection ────────────────────────────────────────────────────

fn status(ctx: &ApiContext) -> Result<Value, Error> {
    let state = &ctx.state;
    Ok(json!({
        "router": state.link.current_router(),
        "state": state.link.state(),
        "connected": state.link.is_connected(),
        "rtt_ms": state.link.rtt_ms(),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "sessions": state.sessions.len(),
        "clients_connected": state.sessions.connected_count(),
        "muds": state.mudlist.len(),
        "channels": state.channels.len(),
        "mudlist_id": state.mudlist.mudlist_id(),
        "chanlist_id": state.channels.chanlist_id(),
    }))
}

fn stats(ctx: &ApiContext) -> Result<Value, Error> {
    let metrics = &ctx.state.metrics;
    let sessions: Vec<Value> = ctx
        .state
        .sessions
        .list()
        .into_iter()
        .map(|s| {
            json!({
                "session_id": s.id,
                "mud_name": s.mud_name,
                "requests": s.requests,
                "errors": s.errors,
                "bytes_in": s.bytes_in,
                "bytes_out": s.bytes_out,
            })
        })
        .collect();
    Ok(json!({
        "packets_in": metrics.packets_in.get(),
        "packets_out": metrics.packets_out.get(),
        "packets_dropped": metrics.packets_dropped.get(),
        "decode_errors": metrics.decode_errors.get(),
        "events_published": metrics.events_published.get(),
        "events_delivered": metrics.events_delivered.get(),
        "rate_limited": metrics.rate_limited.get(),
        "pending_requests": ctx.state.pending.len(),
        "outbound_queue": ctx.state.outbound.len(),
        "sessions": sessions,
    }))
}

// ── Error mapping ────────────────────────────────────────────────────

/// Map a domain error onto the JSON-RPC error space.
pub fn rpc_error_of(error: Error) -> RpcError {
    match error {
        Error::NotAuthenticated => RpcError::new(rpc::NOT_AUTHENTICATED, "not_authenticated"),
        Error::RateLimited { retry_after_ms } => {
            RpcError::new(rpc::RATE_LIMITED, "rate_limited")
                .with_data(json!({ "retry_after_ms": retry_after_ms }))
        }
        Error::PermissionDenied(detail) => RpcError::new(rpc::PERMISSION_DENIED, "permission_denied")
            .with_data(json!({ "detail": detail })),
        Error::SessionExpired => RpcError::new(rpc::SESSION_EXPIRED, "session_expired"),
        Error::MudUnknown(mud) => {
            RpcError::new(rpc::TARGET_UNKNOWN, "mud_unknown").with_data(json!({ "target": mud }))
        }
        Error::UserUnknown(user) => {
            RpcError::new(rpc::TARGET_UNKNOWN, "user_unknown").with_data(json!({ "target": user }))
        }
        Error::ChannelUnknown(channel) => RpcError::new(rpc::TARGET_UNKNOWN, "channel_unknown")
            .with_data(json!({ "target": channel })),
        Error::TargetOffline(mud) => {
            RpcError::new(rpc::TARGET_UNKNOWN, "target_offline").with_data(json!({ "target": mud }))
        }
        Error::Timeout(detail) => {
            RpcError::new(rpc::TIMEOUT, "timeout").with_data(json!({ "detail": detail }))
        }
        Error::InvalidParams(detail) => RpcError::invalid_params(detail),
        Error::Backpressure => RpcError::new(rpc::GATEWAY_ERROR, "backpressure"),
        Error::Link(detail) => {
            RpcError::new(rpc::GATEWAY_ERROR, "gateway_error").with_data(json!({ "detail": detail }))
        }
        other => {
            tracing::error!(error = %other, "internal error in handler");
            RpcError::new(rpc::INTERNAL_ERROR, "internal_error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::test_support::{test_state_with_keys, KEY};
    use i3_protocol::rpc::RequestId;

    fn context() -> ApiContext {
        let state = test_state_with_keys();
        let services = Arc::new(Services::new(state.clone()));
        ApiContext { state, services }
    }

    fn conn() -> (ConnCtx, tokio::sync::mpsc::Receiver<String>) {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        (
            ConnCtx::new(Transport::Ws, Some("127.0.0.1".into()), tx),
            rx,
        )
    }

    async fn call(ctx: &ApiContext, conn: &ConnCtx, raw: &str) -> Value {
        let out = handle_payload(ctx, conn, raw).await.unwrap();
        serde_json::from_str(&out).unwrap()
    }

    #[tokio::test]
    async fn authenticate_happy_path() {
        let ctx = context();
        let (conn, _rx) = conn();
        let resp = call(
            &ctx,
            &conn,
            &format!(
                r#"{{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{{"api_key":"{KEY}"}}}}"#
            ),
        )
        .await;
        assert_eq!(resp["jsonrpc"], "2.0");
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["status"], "authenticated");
        assert_eq!(resp["result"]["mud_name"], "LuminariMUD");
        assert!(resp["result"]["session_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn authenticate_is_idempotent_per_connection() {
        let ctx = context();
        let (conn, _rx) = conn();
        let raw = format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{{"api_key":"{KEY}"}}}}"#
        );
        let first = call(&ctx, &conn, &raw).await;
        let second = call(&ctx, &conn, &raw).await;
        assert_eq!(
            first["result"]["session_id"],
            second["result"]["session_id"]
        );
        assert_eq!(ctx.state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn bad_key_is_not_authenticated() {
        let ctx = context();
        let (conn, _rx) = conn();
        let resp = call(
            &ctx,
            &conn,
            r#"{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{"api_key":"wrong"}}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], rpc::NOT_AUTHENTICATED);
    }

    #[tokio::test]
    async fn methods_require_authentication() {
        let ctx = context();
        let (conn, _rx) = conn();
        let resp = call(
            &ctx,
            &conn,
            r#"{"jsonrpc":"2.0","id":1,"method":"mudlist"}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], rpc::NOT_AUTHENTICATED);
        assert_eq!(resp["error"]["message"], "not_authenticated");
    }

    #[tokio::test]
    async fn unknown_method_is_32601() {
        let ctx = context();
        let (conn, _rx) = conn();
        call(
            &ctx,
            &conn,
            &format!(
                r#"{{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{{"api_key":"{KEY}"}}}}"#
            ),
        )
        .await;
        let resp = call(
            &ctx,
            &conn,
            r#"{"jsonrpc":"2.0","id":2,"method":"frobnicate"}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], rpc::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn permission_denied_for_missing_tag() {
        let ctx = context();
        let (conn, _rx) = conn();
        // The second configured key only grants "info".
        let resp = call(
            &ctx,
            &conn,
            r#"{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{"api_key":"K-limited"}}"#,
        )
        .await;
        assert_eq!(resp["result"]["status"], "authenticated");

        let resp = call(
            &ctx,
            &conn,
            r#"{"jsonrpc":"2.0","id":2,"method":"tell","params":{"target_mud":"X","target_user":"y","message":"hi"}}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], rpc::PERMISSION_DENIED);

        let resp = call(&ctx, &conn, r#"{"jsonrpc":"2.0","id":3,"method":"mudlist"}"#).await;
        assert!(resp.get("result").is_some());
    }

    #[tokio::test]
    async fn rate_limit_scenario_thirty_tells() {
        let ctx = context();
        let (conn, _rx) = conn();
        call(
            &ctx,
            &conn,
            &format!(
                r#"{{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{{"api_key":"{KEY}"}}}}"#
            ),
        )
        .await;
        let session_id = conn.current_session_id().unwrap();

        for i in 0..30 {
            assert!(
                ctx.state.rate.check(&session_id, "tell").is_ok(),
                "tell {i} should pass"
            );
        }
        let resp = call(
            &ctx,
            &conn,
            r#"{"jsonrpc":"2.0","id":40,"method":"tell","params":{"target_mud":"X","target_user":"y","message":"hi"}}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], rpc::RATE_LIMITED);
        assert_eq!(resp["error"]["message"], "rate_limited");
        assert!(resp["error"]["data"]["retry_after_ms"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn batch_mixes_responses_and_skips_notifications() {
        let ctx = context();
        let (conn, _rx) = conn();
        let raw = format!(
            r#"[
                {{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{{"api_key":"{KEY}"}}}},
                {{"jsonrpc":"2.0","method":"ping"}},
                {{"jsonrpc":"2.0","id":2,"method":"ping"}}
            ]"#
        );
        let out = handle_payload(&ctx, &conn, &raw).await.unwrap();
        let batch: Vec<Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["id"], 1);
        assert_eq!(batch[1]["id"], 2);
    }

    #[tokio::test]
    async fn empty_batch_is_invalid_request() {
        let ctx = context();
        let (conn, _rx) = conn();
        let resp = call(&ctx, &conn, "[]").await;
        assert_eq!(resp["error"]["code"], rpc::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn resume_replays_offline_events_in_order() {
        let ctx = context();
        let (conn, _rx) = conn();
        let resp = call(
            &ctx,
            &conn,
            &format!(
                r#"{{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{{"api_key":"{KEY}"}}}}"#
            ),
        )
        .await;
        let session_id = resp["result"]["session_id"].as_str().unwrap().to_string();

        // Simulate a disconnect, then events piling up.
        ctx.state.sessions.detach_sink(&session_id);
        ctx.state.sessions.queue_offline(
            &session_id,
            Event::new("channel_message", json!({"n": 1}), EventScope::Broadcast).priority(3),
        );
        ctx.state.sessions.queue_offline(
            &session_id,
            Event::new("tell_received", json!({"n": 2}), EventScope::Broadcast).priority(9),
        );

        let (conn2, mut rx2) = {
            let (tx, rx) = tokio::sync::mpsc::channel(64);
            (
                ConnCtx::new(Transport::Tcp, Some("127.0.0.1".into()), tx),
                rx,
            )
        };
        let resp = call(
            &ctx,
            &conn2,
            &format!(
                r#"{{"jsonrpc":"2.0","id":2,"method":"resume","params":{{"session_id":"{session_id}"}}}}"#
            ),
        )
        .await;
        assert_eq!(resp["result"]["status"], "resumed");
        assert_eq!(resp["result"]["queued_events"], 2);

        // Priority 9 first, then priority 3.
        let first: Value = serde_json::from_str(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(first["method"], "tell_received");
        let second: Value = serde_json::from_str(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(second["method"], "channel_message");
    }

    #[tokio::test]
    async fn resume_unknown_session_expired() {
        let ctx = context();
        let (conn, _rx) = conn();
        let resp = call(
            &ctx,
            &conn,
            r#"{"jsonrpc":"2.0","id":1,"method":"resume","params":{"session_id":"nope"}}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], rpc::SESSION_EXPIRED);
    }

    #[tokio::test]
    async fn notification_failures_become_events_not_responses() {
        let ctx = context();
        let (conn, _rx) = conn();
        call(
            &ctx,
            &conn,
            &format!(
                r#"{{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{{"api_key":"{KEY}"}}}}"#
            ),
        )
        .await;
        let session_id = conn.current_session_id().unwrap();
        ctx.state.sessions.detach_sink(&session_id);

        // A notification calling an unknown mud: no response, one event.
        let out = handle_payload(
            &ctx,
            &conn,
            r#"{"jsonrpc":"2.0","method":"tell","params":{"target_mud":"Ghost","target_user":"x","message":"hi"}}"#,
        )
        .await;
        assert!(out.is_none());
        assert_eq!(ctx.state.sessions.offline_len(&session_id), 1);
    }

    #[test]
    fn request_id_shapes() {
        let n = RequestId::Num(7);
        let s = RequestId::Str("abc".into());
        assert_eq!(serde_json::to_value(&n).unwrap(), json!(7));
        assert_eq!(serde_json::to_value(&s).unwrap(), json!("abc"));
    }
}
