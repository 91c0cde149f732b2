//! The event model shared by the event bus, the offline queues, and the
//! API notification path.
//!
//! An [`Event`] is born on the gateway side (inbound I3 packet, link state
//! change, session lifecycle) and is delivered to API sessions as a
//! JSON-RPC notification whose method is the event name.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification method names, as they appear on the wire.
pub mod name {
    pub const TELL_RECEIVED: &str = "tell_received";
    pub const EMOTETO_RECEIVED: &str = "emoteto_received";
    pub const CHANNEL_MESSAGE: &str = "channel_message";
    pub const CHANNEL_EMOTE: &str = "channel_emote";
    pub const CHANNEL_JOINED: &str = "channel_joined";
    pub const CHANNEL_LEFT: &str = "channel_left";
    pub const MUD_ONLINE: &str = "mud_online";
    pub const MUD_OFFLINE: &str = "mud_offline";
    pub const GATEWAY_RECONNECTED: &str = "gateway_reconnected";
    pub const ERROR_OCCURRED: &str = "error_occurred";
    pub const RATE_LIMIT_WARNING: &str = "rate_limit_warning";
    /// Internal observability events from the router link.
    pub const ROUTER_STATE: &str = "gateway.router.state";
    pub const ROUTER_LATENCY: &str = "gateway.router.latency";
    pub const BACKPRESSURE: &str = "backpressure";
    pub const SHUTDOWN_COMPLETE: &str = "shutdown_complete";
}

/// Who an event is for. The bus expands the scope into concrete session
/// ids; sessions themselves are never referenced from events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventScope {
    /// Every subscribed session.
    Broadcast,
    /// Sessions belonging to the named mud (e.g. inbound tells).
    Mud(String),
    /// Sessions subscribed to the named channel.
    Channel(String),
    /// Exactly one session.
    Session(String),
}

/// An event in transit between the gateway core and API sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Notification method name (one of [`name`]).
    pub name: String,
    pub payload: Value,
    /// 1 (lowest) ..= 10 (highest). Drop policies evict low priority first.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    /// `None` = never expires (connection/disconnection notices).
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: EventScope,
    /// Permission tag a session must hold to receive this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_tag: Option<String>,
}

impl Event {
    pub fn new(name: &str, payload: Value, scope: EventScope) -> Self {
        Self {
            name: name.to_string(),
            payload,
            priority: 5,
            created_at: Utc::now(),
            expires_at: None,
            scope,
            permission_tag: None,
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.created_at + ttl);
        self
    }

    pub fn permission_tag(mut self, tag: &str) -> Self {
        self.permission_tag = Some(tag.to_string());
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
