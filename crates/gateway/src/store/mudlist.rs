//! The mudlist: every mud the router knows about, updated atomically
//! from `mudlist` gossip packets.
//!
//! Keys are lowercased mud names; the original capitalization is kept in
//! `display_name`. Only the packet dispatcher mutates this store.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;

use i3_protocol::packet::{MudInfo, MudlistPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MudState {
    Up,
    Down,
    /// Back in roughly the contained number of seconds.
    Rebooting(i32),
}

impl MudState {
    /// Wire encoding: -1 up, 0 down, n > 0 rebooting.
    pub fn from_wire(state: i32) -> MudState {
        match state {
            -1 => MudState::Up,
            0 => MudState::Down,
            n => MudState::Rebooting(n),
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, MudState::Up)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MudEntry {
    pub display_name: String,
    pub state: MudState,
    pub address: String,
    pub player_port: i32,
    pub tcp_port: i32,
    pub udp_port: i32,
    pub mudlib: String,
    pub base_mudlib: String,
    pub driver: String,
    pub mud_type: String,
    pub open_status: String,
    pub admin_email: String,
    pub services: HashSet<String>,
}

impl MudEntry {
    fn from_info(display_name: String, info: &MudInfo) -> Self {
        Self {
            display_name,
            state: MudState::from_wire(info.state),
            address: info.address.clone(),
            player_port: info.player_port,
            tcp_port: info.tcp_port,
            udp_port: info.udp_port,
            mudlib: info.mudlib.clone(),
            base_mudlib: info.base_mudlib.clone(),
            driver: info.driver.clone(),
            mud_type: info.mud_type.clone(),
            open_status: info.open_status.clone(),
            admin_email: info.admin_email.clone(),
            services: info
                .services
                .iter()
                .filter(|(_, flag)| *flag != 0)
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }
}

/// A state transition observed while applying a mudlist delta, for
/// `mud_online` / `mud_offline` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MudTransition {
    pub mud_name: String,
    pub online: bool,
}

pub struct MudlistStore {
    muds: RwLock<HashMap<String, MudEntry>>,
    mudlist_id: RwLock<i32>,
}

impl Default for MudlistStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MudlistStore {
    pub fn new() -> Self {
        Self {
            muds: RwLock::new(HashMap::new()),
            mudlist_id: RwLock::new(0),
        }
    }

    pub fn mudlist_id(&self) -> i32 {
        *self.mudlist_id.read()
    }

    pub fn set_mudlist_id(&self, id: i32) {
        *self.mudlist_id.write() = id;
    }

    /// Apply one mudlist delta atomically. Returns the up/down
    /// transitions it caused, for event fan-out.
    pub fn apply(&self, packet: &MudlistPacket) -> Vec<MudTransition> {
        let mut transitions = Vec::new();
        {
            let mut muds = self.muds.write();
            for (name, info) in &packet.muds {
                let key = name.to_ascii_lowercase();
                match info {
                    None => {
                        if muds.remove(&key).is_some_and(|old| old.state.is_up()) {
                            transitions.push(MudTransition {
                                mud_name: name.clone(),
                                online: false,
                            });
                        }
                    }
                    Some(info) => {
                        let entry = MudEntry::from_info(name.clone(), info);
                        let was_up = muds.get(&key).map(|old| old.state.is_up());
                        let is_up = entry.state.is_up();
                        muds.insert(key, entry);
                        match was_up {
                            Some(up) if up == is_up => {}
                            _ => transitions.push(MudTransition {
                                mud_name: name.clone(),
                                online: is_up,
                            }),
                        }
                    }
                }
            }
            *self.mudlist_id.write() = packet.mudlist_id;
        }
        tracing::debug!(
            mudlist_id = packet.mudlist_id,
            delta = packet.muds.len(),
            transitions = transitions.len(),
            "mudlist applied"
        );
        transitions
    }

    /// Look up a mud by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<MudEntry> {
        self.muds.read().get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.muds.read().contains_key(&name.to_ascii_lowercase())
    }

    /// All entries, optionally filtered by a case-insensitive substring
    /// of the display name.
    pub fn list(&self, filter: Option<&str>) -> Vec<MudEntry> {
        let needle = filter.map(|f| f.to_ascii_lowercase());
        let mut entries: Vec<MudEntry> = self
            .muds
            .read()
            .values()
            .filter(|e| match &needle {
                Some(n) => e.display_name.to_ascii_lowercase().contains(n),
                None => true,
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        entries
    }

    pub fn len(&self) -> usize {
        self.muds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.muds.read().is_empty()
    }
}
