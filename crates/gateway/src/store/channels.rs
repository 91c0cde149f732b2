//! Channel registry: router-gossiped channel metadata, local membership
//! bookkeeping, and the per-channel history ring behind
//! `channel_history`.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use i3_protocol::packet::ChanlistReplyPacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Private,
}

impl ChannelKind {
    pub fn from_wire(kind: i32) -> ChannelKind {
        if kind == 0 {
            ChannelKind::Public
        } else {
            ChannelKind::Private
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelEntry {
    pub name: String,
    pub kind: ChannelKind,
    pub owner_mud: String,
}

/// A member as reported through `channel-listen`: `(mud, user)` with a
/// listen-only flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub mud_name: String,
    pub user_name: String,
    pub listen_only: bool,
}

/// One message kept for `channel_history`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub from_mud: String,
    pub from_user: String,
    pub visname: String,
    pub message: String,
    /// "message" or "emote".
    pub kind: &'static str,
}

pub struct ChannelStore {
    history_limit: usize,
    channels: RwLock<HashMap<String, ChannelEntry>>,
    members: RwLock<HashMap<String, Vec<Member>>>,
    history: Mutex<HashMap<String, VecDeque<HistoryEntry>>>,
    chanlist_id: RwLock<i32>,
}

impl ChannelStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit,
            channels: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            chanlist_id: RwLock::new(0),
        }
    }

    pub fn chanlist_id(&self) -> i32 {
        *self.chanlist_id.read()
    }

    pub fn set_chanlist_id(&self, id: i32) {
        *self.chanlist_id.write() = id;
    }

    // ── Router gossip ────────────────────────────────────────────────

    /// Apply a chanlist delta: `name → 0` removes, otherwise upserts.
    pub fn apply_chanlist(&self, packet: &ChanlistReplyPacket) {
        let mut channels = self.channels.write();
        for (name, info) in &packet.channels {
            match info {
                None => {
                    channels.remove(name);
                    self.members.write().remove(name);
                }
                Some(info) => {
                    channels.insert(
                        name.clone(),
                        ChannelEntry {
                            name: name.clone(),
                            kind: ChannelKind::from_wire(info.kind),
                            owner_mud: info.owner_mud.clone(),
                        },
                    );
                }
            }
        }
        *self.chanlist_id.write() = packet.chanlist_id;
        tracing::debug!(
            chanlist_id = packet.chanlist_id,
            delta = packet.channels.len(),
            "chanlist applied"
        );
    }

    pub fn upsert(&self, name: &str, kind: i32, owner_mud: &str) {
        self.channels.write().insert(
            name.to_string(),
            ChannelEntry {
                name: name.to_string(),
                kind: ChannelKind::from_wire(kind),
                owner_mud: owner_mud.to_string(),
            },
        );
    }

    pub fn remove(&self, name: &str) {
        self.channels.write().remove(name);
        self.members.write().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<ChannelEntry> {
        self.channels.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    pub fn list(&self) -> Vec<ChannelEntry> {
        let mut entries: Vec<ChannelEntry> = self.channels.read().values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Record a member. Re-joining updates the listen-only flag instead
    /// of duplicating the member. Returns true when something changed.
    pub fn record_member(
        &self,
        channel: &str,
        mud_name: &str,
        user_name: &str,
        listen_only: bool,
    ) -> bool {
        let mut members = self.members.write();
        let list = members.entry(channel.to_string()).or_default();
        match list
            .iter_mut()
            .find(|m| m.mud_name == mud_name && m.user_name == user_name)
        {
            Some(member) => {
                if member.listen_only == listen_only {
                    false
                } else {
                    member.listen_only = listen_only;
                    true
                }
            }
            None => {
                list.push(Member {
                    mud_name: mud_name.to_string(),
                    user_name: user_name.to_string(),
                    listen_only,
                });
                true
            }
        }
    }

    pub fn remove_member(&self, channel: &str, mud_name: &str, user_name: &str) -> bool {
        let mut members = self.members.write();
        match members.get_mut(channel) {
            Some(list) => {
                let before = list.len();
                list.retain(|m| !(m.mud_name == mud_name && m.user_name == user_name));
                before != list.len()
            }
            None => false,
        }
    }

    pub fn members(&self, channel: &str) -> Vec<Member> {
        self.members.read().get(channel).cloned().unwrap_or_default()
    }

    /// Users of a given mud across all channel memberships. Used to
    /// synthesize who-replies from locally known state.
    pub fn users_of_mud(&self, mud_name: &str) -> Vec<String> {
        let needle = mud_name.to_ascii_lowercase();
        let mut users: Vec<String> = self
            .members
            .read()
            .values()
            .flatten()
            .filter(|m| m.mud_name.to_ascii_lowercase() == needle)
            .map(|m| m.user_name.clone())
            .collect();
        users.sort();
        users.dedup();
        users
    }

    // ── History ──────────────────────────────────────────────────────

    pub fn push_history(&self, channel: &str, entry: HistoryEntry) {
        let mut history = self.history.lock();
        let ring = history.entry(channel.to_string()).or_default();
        if ring.len() >= self.history_limit {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    /// Most recent `limit` entries, oldest first.
    pub fn history(&self, channel: &str, limit: usize) -> Vec<HistoryEntry> {
        let history = self.history.lock();
        match history.get(channel) {
            Some(ring) => {
                let skip = ring.len().saturating_sub(limit);
                ring.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }
}
