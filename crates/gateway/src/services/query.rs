//! Remote queries: who, finger, locate.
//!
//! Each outbound query registers in the pending table and waits for the
//! matching reply with a deadline. Replies feed a TTL cache so repeat
//! queries within the window never touch the router.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use i3_domain::{Error, Result};
use i3_protocol::packet::{
    ErrorPacket, FingerReplyPacket, FingerReqPacket, Header, LocateReplyPacket, LocateReqPacket,
    Packet, WhoEntry, WhoReplyPacket, WhoReqPacket,
};

use crate::link::SendPriority;
use crate::services::pending::PendingKey;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct WhoParams {
    target_mud: String,
    /// Optional case-insensitive substring filter on user names.
    filter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FingerParams {
    target_mud: String,
    target_user: String,
}

#[derive(Debug, Deserialize)]
struct LocateParams {
    target_user: String,
}

pub struct QueryService {
    state: AppState,
}

impl QueryService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.state.config.cache.request_timeout_secs)
    }

    // ── API: who ─────────────────────────────────────────────────────

    pub async fn who(&self, params: Value) -> Result<Value> {
        let params: WhoParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let mud_key = params.target_mud.to_ascii_lowercase();
        if !self.state.mudlist.contains(&mud_key) {
            return Err(Error::MudUnknown(params.target_mud));
        }

        let result = match self.state.who_cache.get(&mud_key) {
            Some(cached) => cached,
            None => {
                let (rx, fresh) = self
                    .state
                    .pending
                    .register(PendingKey::Who(mud_key.clone()), self.request_timeout());
                if fresh {
                    let packet = Packet::WhoReq(WhoReqPacket {
                        header: Header::new(&self.state.config.mud.name).to_mud(&mud_key),
                    });
                    super::enqueue(&self.state, packet, SendPriority::User)?;
                }
                let result = rx
                    .await
                    .map_err(|_| Error::Timeout("who reply lost".into()))??;
                self.state.who_cache.put(mud_key, result.clone());
                result
            }
        };

        Ok(apply_who_filter(result, params.filter.as_deref()))
    }

    // ── API: finger ──────────────────────────────────────────────────

    pub async fn finger(&self, params: Value) -> Result<Value> {
        let params: FingerParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let mud_key = params.target_mud.to_ascii_lowercase();
        let user_key = params.target_user.to_ascii_lowercase();
        if !self.state.mudlist.contains(&mud_key) {
            return Err(Error::MudUnknown(params.target_mud));
        }

        let cache_key = format!("{mud_key}:{user_key}");
        if let Some(cached) = self.state.finger_cache.get(&cache_key) {
            return Ok(cached);
        }

        let (rx, fresh) = self.state.pending.register(
            PendingKey::Finger(mud_key.clone(), user_key.clone()),
            self.request_timeout(),
        );
        if fresh {
            let packet = Packet::FingerReq(FingerReqPacket {
                header: Header::new(&self.state.config.mud.name)
                    .to_mud(&mud_key)
                    .to_user(&user_key),
                username: user_key.clone(),
            });
            super::enqueue(&self.state, packet, SendPriority::User)?;
        }
        let result = rx
            .await
            .map_err(|_| Error::Timeout("finger reply lost".into()))??;
        self.state.finger_cache.put(cache_key, result.clone());
        Ok(result)
    }

    // ── API: locate ──────────────────────────────────────────────────

    /// Broadcast a locate and gather every reply that arrives within
    /// the locate window. Late replies are dropped by the collector.
    pub async fn locate(&self, params: Value) -> Result<Value> {
        let params: LocateParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let user_key = params.target_user.to_ascii_lowercase();
        if user_key.is_empty() {
            return Err(Error::InvalidParams("target_user must not be empty".into()));
        }

        if let Some(cached) = self.state.locate_cache.get(&user_key) {
            return Ok(cached);
        }

        let Some(mut rx) = self.state.pending.open_locate(&user_key) else {
            // A locate for this user is already collecting; rather than
            // double-broadcast, report the busy window to the caller.
            return Err(Error::InvalidParams(format!(
                "locate for {user_key} already in progress"
            )));
        };

        let packet = Packet::LocateReq(LocateReqPacket {
            // target_mud stays empty: integer 0 on the wire, broadcast.
            header: Header::new(&self.state.config.mud.name).to_user(&user_key),
            username: user_key.clone(),
        });
        if let Err(e) = super::enqueue(&self.state, packet, SendPriority::User) {
            self.state.pending.close_locate(&user_key);
            return Err(e);
        }

        let window = Duration::from_millis(self.state.config.cache.locate_window_ms);
        let deadline = tokio::time::Instant::now() + window;
        let mut locations = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(reply)) => locations.push(json!({
                    "mud": reply.mud_name,
                    "user": reply.user_name,
                    "idle": reply.idle,
                    "status": reply.status,
                })),
                Ok(None) | Err(_) => break,
            }
        }
        self.state.pending.close_locate(&user_key);

        let result = json!({ "locations": locations });
        self.state.locate_cache.put(user_key, result.clone());
        Ok(result)
    }

    // ── Inbound replies ──────────────────────────────────────────────

    pub fn accept_who_reply(&self, packet: &WhoReplyPacket) {
        let users: Vec<Value> = packet
            .users
            .iter()
            .map(|u| json!({ "name": u.name, "idle": u.idle, "extra": u.extra }))
            .collect();
        let value = json!({ "mud": packet.header.origin_mud, "users": users });
        let key = PendingKey::Who(packet.header.origin_mud.to_ascii_lowercase());
        if !self.state.pending.complete(&key, value) {
            tracing::debug!(mud = %packet.header.origin_mud, "unsolicited who reply dropped");
        }
    }

    pub fn accept_finger_reply(&self, packet: &FingerReplyPacket) {
        let info = &packet.info;
        let value = json!({
            "mud": packet.header.origin_mud,
            "user": info.visname,
            "title": info.title,
            "real_name": info.real_name,
            "email": info.email,
            "login_time": info.login_time,
            "idle": info.idle,
            "level": info.level,
            "extra": info.extra,
        });
        let key = PendingKey::Finger(
            packet.header.origin_mud.to_ascii_lowercase(),
            info.visname.to_ascii_lowercase(),
        );
        if !self.state.pending.complete(&key, value) {
            tracing::debug!(mud = %packet.header.origin_mud, "unsolicited finger reply dropped");
        }
    }

    pub fn accept_locate_reply(&self, packet: LocateReplyPacket) {
        if !self.state.pending.push_locate(packet) {
            tracing::debug!("locate reply outside any window dropped");
        }
    }

    // ── Inbound requests about this gateway's mud ────────────────────

    /// who-req: synthesize a reply from locally known users (channel
    /// membership). Without any local user data, answer unk-user.
    pub fn accept_who_req(&self, packet: &WhoReqPacket) {
        let users = self
            .state
            .channels
            .users_of_mud(&packet.header.target_mud);
        if users.is_empty() {
            self.reply_error(&packet.header, "unk-user", "no user data available");
            return;
        }
        let reply = Packet::WhoReply(WhoReplyPacket {
            header: Header::new(&self.state.config.mud.name)
                .to_mud(&packet.header.origin_mud)
                .to_user(&packet.header.origin_user),
            users: users
                .into_iter()
                .map(|name| WhoEntry {
                    name,
                    idle: 0,
                    extra: String::new(),
                })
                .collect(),
        });
        if let Err(e) = super::enqueue(&self.state, reply, SendPriority::Reply) {
            tracing::warn!(error = %e, "failed to queue who reply");
        }
    }

    /// finger-req: the gateway exposes no per-player data, so this is
    /// always answered with unk-user.
    pub fn accept_finger_req(&self, packet: &FingerReqPacket) {
        self.reply_error(&packet.header, "unk-user", "finger data not exposed");
    }

    /// locate-req: answer only when the user is visible through local
    /// channel membership; stay silent otherwise, as the protocol
    /// expects.
    pub fn accept_locate_req(&self, packet: &LocateReqPacket) {
        let mud_name = self.state.config.mud.name.clone();
        let known = self
            .state
            .channels
            .users_of_mud(&mud_name)
            .iter()
            .any(|u| u.eq_ignore_ascii_case(&packet.username));
        if !known {
            return;
        }
        let reply = Packet::LocateReply(LocateReplyPacket {
            header: Header::new(&mud_name)
                .to_mud(&packet.header.origin_mud)
                .to_user(&packet.header.origin_user),
            mud_name: mud_name.clone(),
            user_name: packet.username.clone(),
            idle: 0,
            status: "active".into(),
        });
        if let Err(e) = super::enqueue(&self.state, reply, SendPriority::Reply) {
            tracing::warn!(error = %e, "failed to queue locate reply");
        }
    }

    fn reply_error(&self, inbound: &Header, code: &str, message: &str) {
        let reply = Packet::Error(ErrorPacket {
            header: Header::new(&self.state.config.mud.name)
                .to_mud(&inbound.origin_mud)
                .to_user(&inbound.origin_user),
            code: code.to_string(),
            message: message.to_string(),
            bad_packet: None,
        });
        if let Err(e) = super::enqueue(&self.state, reply, SendPriority::Reply) {
            tracing::warn!(error = %e, "failed to queue error reply");
        }
    }
}

/// Apply the optional `filter` to a cached who result without touching
/// the cached value itself.
fn apply_who_filter(result: Value, filter: Option<&str>) -> Value {
    let Some(filter) = filter.filter(|f| !f.is_empty()) else {
        return result;
    };
    let needle = filter.to_ascii_lowercase();
    let mut filtered = result.clone();
    if let Some(users) = filtered.get_mut("users").and_then(Value::as_array_mut) {
        users.retain(|u| {
            u.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.to_ascii_lowercase().contains(&needle))
        });
    }
    filtered
}
