//! Phased shutdown: drain the router link, stop accepting clients,
//! finish in-flight work, persist state, then close everything.

use std::time::Duration;

use serde_json::json;

use i3_domain::event::{name, Event, EventScope};

use crate::link::LinkState;
use crate::state::AppState;

/// Run the drain sequence. The caller is expected to wrap this in the
/// `force_timeout` hard deadline and abort whatever is left after it.
pub async fn run(state: AppState) {
    tracing::info!("shutdown: draining");

    // Phase 1: the link stops accepting outbound, flushes, sends the
    // graceful shutdown packet and closes. Acceptors and connection
    // tasks observe the shutdown notify and wind down in parallel.
    state.outbound.refuse_new();
    state.link.begin_drain();

    let drain = Duration::from_secs(state.config.shutdown.drain_timeout_secs);
    let drained = tokio::time::timeout(drain, async {
        while state.link.state() != LinkState::Closed {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok();
    if !drained {
        tracing::warn!(
            drain_secs = drain.as_secs(),
            "router link did not close within the drain window"
        );
    }

    // Phase 2: tell clients, then persist.
    state.bus.publish(
        Event::new(name::SHUTDOWN_COMPLETE, json!({}), EventScope::Broadcast).priority(10),
    );
    if let Err(e) = state.sessions.flush() {
        tracing::warn!(error = %e, "session flush during shutdown failed");
    }
    if let Err(e) = state.state_file.save() {
        tracing::warn!(error = %e, "state file save during shutdown failed");
    }

    tracing::info!("shutdown: complete");
}
