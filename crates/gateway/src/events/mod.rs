//! The event bus: one-to-many delivery from the gateway core to API
//! sessions.
//!
//! The bus holds no session objects — only ids resolved through the
//! session store at publish time. Connected sessions get the event
//! pushed onto their connection's outbound channel immediately;
//! disconnected sessions get it appended to their offline queue.

use std::sync::Arc;

use i3_domain::event::{Event, EventScope};
use i3_protocol::rpc::Notification;
use i3_sessions::SessionStore;

use crate::metrics::Metrics;

pub struct EventBus {
    sessions: Arc<SessionStore>,
    metrics: Arc<Metrics>,
}

impl EventBus {
    pub fn new(sessions: Arc<SessionStore>, metrics: Arc<Metrics>) -> Self {
        Self { sessions, metrics }
    }

    /// Fan an event out to every session its scope matches.
    pub fn publish(&self, event: Event) {
        self.metrics.events_published.inc();

        let ids = match &event.scope {
            EventScope::Broadcast => self.sessions.all_ids(),
            EventScope::Mud(mud) => self.sessions.ids_for_mud(mud),
            EventScope::Channel(channel) => self.sessions.ids_for_channel(channel),
            EventScope::Session(id) => vec![id.clone()],
        };

        for id in ids {
            self.deliver(&id, &event);
        }
    }

    fn deliver(&self, session_id: &str, event: &Event) {
        let Some(entry) = self.sessions.get(session_id) else {
            return;
        };
        if !entry.wants_event(&event.name) {
            return;
        }
        if let Some(tag) = &event.permission_tag {
            if !entry.has_permission(tag) {
                return;
            }
        }

        match self.sessions.sink(session_id) {
            Some(sink) => {
                let notification = Notification::new(&event.name, event.payload.clone());
                let json = match serde_json::to_string(&notification) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, event = %event.name, "event serialization failed");
                        return;
                    }
                };
                let bytes = json.len() as u64;
                match sink.try_send(json) {
                    Ok(()) => {
                        self.metrics.events_delivered.inc();
                        self.sessions.record_bytes_out(session_id, bytes);
                    }
                    Err(_) => {
                        // Writer saturated or gone: fall back to the
                        // offline queue rather than lose the event.
                        self.sessions.queue_offline(session_id, event.clone());
                        self.metrics.events_queued_offline.inc();
                    }
                }
            }
            None => {
                self.sessions.queue_offline(session_id, event.clone());
                self.metrics.events_queued_offline.inc();
            }
        }
    }
}
