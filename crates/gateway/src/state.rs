use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;

use i3_domain::config::Config;
use i3_sessions::{RateLimiterMap, SessionStore};

use crate::api::auth::KeyRing;
use crate::events::EventBus;
use crate::link::breaker::CircuitBreaker;
use crate::link::{LinkStatus, OutboundQueue};
use crate::metrics::Metrics;
use crate::services::pending::PendingTable;
use crate::store::{ChannelStore, MudlistStore, StateFile, TtlCache};

/// Shared application state passed to all handlers and tasks.
///
/// Fields are grouped by concern:
/// - **Core** — config, metrics, shutdown signal
/// - **Router link** — status, outbound queue, circuit breaker
/// - **State** — mudlist, channels, query caches, durable state
/// - **API** — sessions, auth keys, rate limiter
/// - **Events** — the bus, pending request correlation
#[derive(Clone)]
pub struct AppState {
    // ── Core ─────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub shutdown: Arc<Notify>,
    pub started_at: DateTime<Utc>,

    // ── Router link ──────────────────────────────────────────────────
    pub link: Arc<LinkStatus>,
    pub outbound: Arc<OutboundQueue>,
    pub breaker: Arc<CircuitBreaker>,

    // ── Gateway state ────────────────────────────────────────────────
    pub mudlist: Arc<MudlistStore>,
    pub channels: Arc<ChannelStore>,
    pub who_cache: Arc<TtlCache<String, Value>>,
    pub finger_cache: Arc<TtlCache<String, Value>>,
    pub locate_cache: Arc<TtlCache<String, Value>>,
    pub state_file: Arc<StateFile>,

    // ── API ──────────────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub keys: Arc<KeyRing>,
    pub rate: Arc<RateLimiterMap>,

    // ── Events & correlation ─────────────────────────────────────────
    pub bus: Arc<EventBus>,
    pub pending: Arc<PendingTable>,
}
