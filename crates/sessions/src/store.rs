//! Gateway-owned session store.
//!
//! A session is created on successful authentication and survives
//! disconnects: within the inactivity TTL a client can `resume` with its
//! session id and get back its subscriptions plus everything queued in
//! its offline queue. The index (identity, permissions, subscriptions,
//! counters) is persisted to `sessions.json` under the state path; live
//! delivery sinks and offline queues are memory-only.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use i3_domain::error::{Error, Result};
use i3_domain::Event;

use crate::offline::OfflineQueue;

/// Serialized notification ready to be written by a connection's writer
/// task. Sessions do not know which transport they are on beyond the tag.
pub type SessionSink = mpsc::Sender<String>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Ws,
    Tcp,
}

/// A single authenticated client session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    pub mud_name: String,
    /// Fingerprint of the API key that authenticated this session.
    pub api_key_id: String,
    /// Method tags this session may call; `"*"` grants everything.
    pub permissions: HashSet<String>,
    pub transport: Transport,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Channels this session wants events for.
    #[serde(default)]
    pub channels: HashSet<String>,
    /// Event-name filters; empty means "all events".
    #[serde(default)]
    pub event_filters: HashSet<String>,
    #[serde(default)]
    pub requests: u64,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub bytes_in: u64,
    #[serde(default)]
    pub bytes_out: u64,
}

impl SessionEntry {
    pub fn has_permission(&self, tag: &str) -> bool {
        self.permissions.contains("*") || self.permissions.contains(tag)
    }

    /// Whether this session wants an event with the given name.
    pub fn wants_event(&self, name: &str) -> bool {
        self.event_filters.is_empty() || self.event_filters.contains(name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe store of all sessions, their live sinks, and their
/// offline queues.
pub struct SessionStore {
    sessions_path: PathBuf,
    ttl: Duration,
    queue_capacity: usize,
    queue_ttl: Duration,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    sinks: RwLock<HashMap<String, SessionSink>>,
    queues: Mutex<HashMap<String, OfflineQueue>>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions.json`.
    pub fn new(
        state_path: &Path,
        ttl_secs: u64,
        queue_capacity: usize,
        queue_ttl_secs: u64,
    ) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;

        let sessions_path = state_path.join("sessions.json");
        let sessions: HashMap<String, SessionEntry> = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            ttl: Duration::seconds(ttl_secs as i64),
            queue_capacity,
            queue_ttl: Duration::seconds(queue_ttl_secs as i64),
            sessions: RwLock::new(sessions),
            sinks: RwLock::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Create a fresh session after a successful authentication.
    pub fn create(
        &self,
        mud_name: &str,
        api_key_id: &str,
        permissions: HashSet<String>,
        transport: Transport,
    ) -> SessionEntry {
        let now = Utc::now();
        let entry = SessionEntry {
            id: uuid::Uuid::new_v4().to_string(),
            mud_name: mud_name.to_string(),
            api_key_id: api_key_id.to_string(),
            permissions,
            transport,
            connected_at: now,
            last_activity: now,
            channels: HashSet::new(),
            event_filters: HashSet::new(),
            requests: 0,
            errors: 0,
            bytes_in: 0,
            bytes_out: 0,
        };
        self.sessions.write().insert(entry.id.clone(), entry.clone());
        tracing::info!(
            session_id = %entry.id,
            mud_name = %entry.mud_name,
            "session created"
        );
        entry
    }

    /// Resume a previous session within its inactivity TTL.
    ///
    /// Returns the restored entry and the events accumulated while the
    /// client was away, already in priority-then-FIFO order.
    pub fn resume(&self, session_id: &str, transport: Transport) -> Result<(SessionEntry, Vec<Event>)> {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let entry = sessions.get_mut(session_id).ok_or(Error::SessionExpired)?;
        if now.signed_duration_since(entry.last_activity) > self.ttl {
            let id = entry.id.clone();
            drop(sessions);
            self.remove(&id);
            return Err(Error::SessionExpired);
        }
        entry.transport = transport;
        entry.last_activity = now;
        let restored = entry.clone();
        drop(sessions);

        let queued = self
            .queues
            .lock()
            .get_mut(session_id)
            .map(|q| q.drain(now))
            .unwrap_or_default();
        tracing::info!(
            session_id = %session_id,
            queued = queued.len(),
            "session resumed"
        );
        Ok((restored, queued))
    }

    /// Remove a session entirely (explicit close, expiry, shutdown).
    pub fn remove(&self, session_id: &str) {
        if self.sessions.write().remove(session_id).is_some() {
            tracing::info!(session_id = %session_id, "session removed");
        }
        self.sinks.write().remove(session_id);
        self.queues.lock().remove(session_id);
    }

    /// Attach the live delivery sink for a connected session.
    pub fn attach_sink(&self, session_id: &str, sink: SessionSink) {
        self.sinks.write().insert(session_id.to_string(), sink);
    }

    /// Detach on disconnect; the entry stays resumable until the TTL.
    pub fn detach_sink(&self, session_id: &str) {
        self.sinks.write().remove(session_id);
        self.touch(session_id);
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.sinks.read().contains_key(session_id)
    }

    pub fn sink(&self, session_id: &str) -> Option<SessionSink> {
        self.sinks.read().get(session_id).cloned()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe to a channel. Returns false if already subscribed.
    pub fn subscribe_channel(&self, session_id: &str, channel: &str) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(entry) => entry.channels.insert(channel.to_string()),
            None => false,
        }
    }

    pub fn unsubscribe_channel(&self, session_id: &str, channel: &str) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(entry) => entry.channels.remove(channel),
            None => false,
        }
    }

    pub fn set_event_filters(&self, session_id: &str, filters: HashSet<String>) {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.event_filters = filters;
        }
    }

    // ── Bookkeeping ──────────────────────────────────────────────────

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.last_activity = Utc::now();
        }
    }

    pub fn record_request(&self, session_id: &str, bytes_in: u64) {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.requests += 1;
            entry.bytes_in += bytes_in;
            entry.last_activity = Utc::now();
        }
    }

    pub fn record_error(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.errors += 1;
        }
    }

    pub fn record_bytes_out(&self, session_id: &str, bytes: u64) {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.bytes_out += bytes;
        }
    }

    pub fn list(&self) -> Vec<SessionEntry> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Session ids of every session belonging to the given mud.
    pub fn ids_for_mud(&self, mud_name: &str) -> Vec<String> {
        let needle = mud_name.to_ascii_lowercase();
        self.sessions
            .read()
            .values()
            .filter(|e| e.mud_name.to_ascii_lowercase() == needle)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Session ids subscribed to the given channel.
    pub fn ids_for_channel(&self, channel: &str) -> Vec<String> {
        self.sessions
            .read()
            .values()
            .filter(|e| e.channels.contains(channel))
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    // ── Offline queue ────────────────────────────────────────────────

    /// Queue an event for a disconnected session.
    pub fn queue_offline(&self, session_id: &str, event: Event) {
        let mut queues = self.queues.lock();
        let queue = queues
            .entry(session_id.to_string())
            .or_insert_with(|| OfflineQueue::new(self.queue_capacity, self.queue_ttl));
        queue.push(event, Utc::now());
    }

    pub fn offline_len(&self, session_id: &str) -> usize {
        self.queues.lock().get(session_id).map_or(0, |q| q.len())
    }

    /// Drop expired queued events. Called by the background sweeper.
    pub fn sweep_offline(&self) {
        let now = Utc::now();
        let mut queues = self.queues.lock();
        for queue in queues.values_mut() {
            queue.sweep(now);
        }
        queues.retain(|_, q| !q.is_empty());
    }

    /// Remove sessions idle beyond the TTL. Returns the removed ids so
    /// callers can drop per-session state of their own (rate limiters).
    pub fn expire_idle(&self) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.read();
            let sinks = self.sinks.read();
            sessions
                .values()
                .filter(|e| {
                    !sinks.contains_key(&e.id)
                        && now.signed_duration_since(e.last_activity) > self.ttl
                })
                .map(|e| e.id.clone())
                .collect()
        };
        for id in &expired {
            self.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(expired = expired.len(), "expired idle sessions");
        }
        expired
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Persist the session index to disk (tmp + rename).
    pub fn flush(&self) -> Result<()> {
        let json = {
            let sessions = self.sessions.read();
            serde_json::to_string_pretty(&*sessions)?
        };
        let tmp = self.sessions_path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.sessions_path).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use i3_domain::event::EventScope;
    use serde_json::json;

    fn make_store() -> SessionStore {
        let dir = std::env::temp_dir().join(format!("i3-sessions-{}", uuid::Uuid::new_v4()));
        SessionStore::new(&dir, 3_600, 10, 300).unwrap()
    }

    fn perms(tags: &[&str]) -> HashSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn create_and_get() {
        let store = make_store();
        let entry = store.create("LuminariMUD", "k1", perms(&["*"]), Transport::Ws);
        let fetched = store.get(&entry.id).unwrap();
        assert_eq!(fetched.mud_name, "LuminariMUD");
        assert!(fetched.has_permission("tell"));
    }

    #[test]
    fn permissions_are_exact_or_star() {
        let store = make_store();
        let entry = store.create("M", "k1", perms(&["tell", "channel"]), Transport::Tcp);
        assert!(entry.has_permission("tell"));
        assert!(entry.has_permission("channel"));
        assert!(!entry.has_permission("admin"));
    }

    #[test]
    fn resume_restores_subscriptions_and_queue() {
        let store = make_store();
        let entry = store.create("M", "k1", perms(&["*"]), Transport::Ws);
        store.subscribe_channel(&entry.id, "intermud");
        store.queue_offline(
            &entry.id,
            Event::new("channel_message", json!({"n": 1}), EventScope::Channel("intermud".into())),
        );
        store.queue_offline(
            &entry.id,
            Event::new("mud_online", json!({"n": 2}), EventScope::Broadcast).priority(9),
        );

        let (restored, queued) = store.resume(&entry.id, Transport::Tcp).unwrap();
        assert!(restored.channels.contains("intermud"));
        assert_eq!(restored.transport, Transport::Tcp);
        // Priority order: the priority-9 event first.
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].name, "mud_online");
        // Queue is drained.
        assert_eq!(store.offline_len(&entry.id), 0);
    }

    #[test]
    fn resume_unknown_session_is_expired() {
        let store = make_store();
        assert!(matches!(
            store.resume("nope", Transport::Ws),
            Err(Error::SessionExpired)
        ));
    }

    #[test]
    fn subscribe_is_idempotent() {
        let store = make_store();
        let entry = store.create("M", "k1", perms(&["*"]), Transport::Ws);
        assert!(store.subscribe_channel(&entry.id, "chat"));
        assert!(!store.subscribe_channel(&entry.id, "chat"));
        assert!(store.unsubscribe_channel(&entry.id, "chat"));
        assert!(!store.unsubscribe_channel(&entry.id, "chat"));
    }

    #[test]
    fn ids_for_mud_is_case_insensitive() {
        let store = make_store();
        let a = store.create("LuminariMUD", "k1", perms(&["*"]), Transport::Ws);
        let _b = store.create("OtherMUD", "k2", perms(&["*"]), Transport::Ws);
        let ids = store.ids_for_mud("luminarimud");
        assert_eq!(ids, vec![a.id]);
    }

    #[test]
    fn detach_keeps_entry_resumable() {
        let store = make_store();
        let entry = store.create("M", "k1", perms(&["*"]), Transport::Ws);
        let (tx, _rx) = mpsc::channel(1);
        store.attach_sink(&entry.id, tx);
        assert!(store.is_connected(&entry.id));
        store.detach_sink(&entry.id);
        assert!(!store.is_connected(&entry.id));
        assert!(store.resume(&entry.id, Transport::Ws).is_ok());
    }

    #[test]
    fn flush_and_reload() {
        let dir = std::env::temp_dir().join(format!("i3-sessions-{}", uuid::Uuid::new_v4()));
        let store = SessionStore::new(&dir, 3_600, 10, 300).unwrap();
        let entry = store.create("M", "k1", perms(&["tell"]), Transport::Ws);
        store.subscribe_channel(&entry.id, "chat");
        store.flush().unwrap();

        let reloaded = SessionStore::new(&dir, 3_600, 10, 300).unwrap();
        let restored = reloaded.get(&entry.id).unwrap();
        assert_eq!(restored.mud_name, "M");
        assert!(restored.channels.contains("chat"));
    }
}
