//! AppState construction and background-task spawning shared by the
//! `serve` path and the test harness.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::Notify;

use i3_domain::config::{Config, ConfigSeverity};
use i3_sessions::{RateLimiterMap, SessionStore};

use crate::api::auth::KeyRing;
use crate::events::EventBus;
use crate::link::breaker::{BreakerConfig, CircuitBreaker};
use crate::link::{LinkStatus, OutboundQueue};
use crate::metrics::Metrics;
use crate::services::pending::PendingTable;
use crate::state::AppState;
use crate::store::{ChannelStore, MudlistStore, StateFile, TtlCache};

/// Validate the config, initialize every subsystem and return a fully
/// wired [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let metrics = Arc::new(Metrics::new());

    // ── Durable state ────────────────────────────────────────────────
    let state_file =
        Arc::new(StateFile::load(&config.state.path).context("loading durable state")?);
    let persisted = state_file.snapshot();

    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(
        SessionStore::new(
            &config.state.path,
            config.api.session_ttl_secs,
            config.offline_queue.capacity,
            config.offline_queue.ttl_secs,
        )
        .context("initializing session store")?,
    );
    metrics.sessions_active.set(sessions.len() as i64);

    // ── Event bus ────────────────────────────────────────────────────
    let bus = Arc::new(EventBus::new(sessions.clone(), metrics.clone()));

    // ── Gateway state stores ─────────────────────────────────────────
    let mudlist = Arc::new(MudlistStore::new());
    mudlist.set_mudlist_id(persisted.mudlist_id);
    let channels = Arc::new(ChannelStore::new(config.limits.channel_history));
    channels.set_chanlist_id(persisted.chanlist_id);
    let who_cache = Arc::new(TtlCache::new(Duration::from_secs(config.cache.who_ttl_secs)));
    let finger_cache = Arc::new(TtlCache::new(Duration::from_secs(
        config.cache.finger_ttl_secs,
    )));
    let locate_cache = Arc::new(TtlCache::new(Duration::from_secs(
        config.cache.locate_ttl_secs,
    )));
    tracing::info!(
        mudlist_id = persisted.mudlist_id,
        chanlist_id = persisted.chanlist_id,
        "gateway state ready"
    );

    // ── Auth & rate limiting ─────────────────────────────────────────
    let keys = Arc::new(KeyRing::new(&config.api.keys));
    if keys.is_empty() {
        tracing::warn!("no usable API keys — no client will be able to authenticate");
    } else {
        tracing::info!(keys = keys.len(), "API key ring ready");
    }
    let rate = Arc::new(RateLimiterMap::new(config.limits.clone()));

    // ── Router link shared pieces ────────────────────────────────────
    let link = Arc::new(LinkStatus::new());
    let outbound = Arc::new(OutboundQueue::new(config.router.outbound_queue));
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));

    Ok(AppState {
        config,
        metrics,
        shutdown: Arc::new(Notify::new()),
        started_at: Utc::now(),
        link,
        outbound,
        breaker,
        mudlist,
        channels,
        who_cache,
        finger_cache,
        locate_cache,
        state_file,
        sessions,
        keys,
        rate,
        bus,
        pending: Arc::new(PendingTable::new()),
    })
}

/// Spawn the long-running background tasks: cache sweeps, session
/// expiry, offline-queue sweeps, pending-request timeouts and the
/// periodic session flush.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Pending request timeout sweep (1s keeps timeout skew small) ──
    {
        let pending = state.pending.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                pending.sweep();
            }
        });
    }

    // ── Cache + offline queue sweep ──────────────────────────────────
    {
        let who = state.who_cache.clone();
        let finger = state.finger_cache.clone();
        let locate = state.locate_cache.clone();
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let swept = who.sweep() + finger.sweep() + locate.sweep();
                if swept > 0 {
                    tracing::debug!(swept, "cache entries expired");
                }
                sessions.sweep_offline();
            }
        });
    }

    // ── Session TTL expiry ───────────────────────────────────────────
    {
        let sessions = state.sessions.clone();
        let rate = state.rate.clone();
        let metrics = state.metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                for id in sessions.expire_idle() {
                    rate.remove(&id);
                }
                metrics.sessions_active.set(sessions.len() as i64);
            }
        });
    }

    // ── Periodic session flush ───────────────────────────────────────
    {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                if let Err(e) = sessions.flush() {
                    tracing::warn!(error = %e, "session store flush failed");
                }
            }
        });
    }

    tracing::info!("background tasks spawned");
}
