//! Correlation of outbound I3 requests with their replies.
//!
//! who/finger/chan-who get one reply per request, so they are keyed and
//! completed through oneshot channels with a hard deadline. locate is a
//! broadcast that collects replies for a window, so it gets a stream
//! collector instead. Every entry carries a deadline; a once-a-second
//! sweep fails anything the router never answered.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use i3_domain::Error;
use i3_protocol::packet::LocateReplyPacket;

/// Correlation key for single-reply requests. Mud and user parts are
/// lowercased by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingKey {
    Who(String),
    Finger(String, String),
    ChanWho(String, String),
}

struct PendingEntry {
    waiters: Vec<oneshot::Sender<Result<Value, Error>>>,
    deadline: Instant,
}

pub struct PendingTable {
    entries: Mutex<HashMap<PendingKey, PendingEntry>>,
    locates: Mutex<HashMap<String, mpsc::UnboundedSender<LocateReplyPacket>>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            locates: Mutex::new(HashMap::new()),
        }
    }

    /// Register a waiter for a reply. Duplicate requests for the same
    /// key share one upstream round-trip: each caller gets its own
    /// receiver, completed together.
    pub fn register(
        &self,
        key: PendingKey,
        timeout: Duration,
    ) -> (oneshot::Receiver<Result<Value, Error>>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.waiters.push(tx);
                (rx, false)
            }
            None => {
                entries.insert(
                    key,
                    PendingEntry {
                        waiters: vec![tx],
                        deadline: Instant::now() + timeout,
                    },
                );
                (rx, true)
            }
        }
    }

    /// Complete every waiter for a key. Unsolicited replies (no entry)
    /// return false. A second reply for the same key finds no entry and
    /// is thereby ignored.
    pub fn complete(&self, key: &PendingKey, value: Value) -> bool {
        let Some(entry) = self.entries.lock().remove(key) else {
            return false;
        };
        for waiter in entry.waiters {
            let _ = waiter.send(Ok(value.clone()));
        }
        true
    }

    /// Fail every waiter for a key with an error built per waiter.
    pub fn fail<F: Fn() -> Error>(&self, key: &PendingKey, err: F) -> bool {
        let Some(entry) = self.entries.lock().remove(key) else {
            return false;
        };
        for waiter in entry.waiters {
            let _ = waiter.send(Err(err()));
        }
        true
    }

    /// Fail every entry whose deadline has passed. Runs once a second
    /// from the background sweeper, bounding timeout skew.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(PendingKey, PendingEntry)> = {
            let mut entries = self.entries.lock();
            let keys: Vec<PendingKey> = entries
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| entries.remove(&k).map(|e| (k, e)))
                .collect()
        };
        let count = expired.len();
        for (key, entry) in expired {
            tracing::debug!(?key, "pending request timed out");
            for waiter in entry.waiters {
                let _ = waiter.send(Err(Error::Timeout("no reply from target mud".into())));
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    // ── Locate collectors ────────────────────────────────────────────

    /// Open a collector for locate replies about `username`. Only one
    /// collector per username; a second locate for the same name reuses
    /// the window of the first (the caller sees `false`).
    pub fn open_locate(
        &self,
        username: &str,
    ) -> Option<mpsc::UnboundedReceiver<LocateReplyPacket>> {
        let mut locates = self.locates.lock();
        if locates.contains_key(username) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        locates.insert(username.to_string(), tx);
        Some(rx)
    }

    pub fn close_locate(&self, username: &str) {
        self.locates.lock().remove(username);
    }

    /// Route one inbound locate-reply to its collector. Replies arriving
    /// after the window closed are dropped here.
    pub fn push_locate(&self, reply: LocateReplyPacket) -> bool {
        let locates = self.locates.lock();
        match locates.get(&reply.user_name.to_ascii_lowercase()) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }
}
