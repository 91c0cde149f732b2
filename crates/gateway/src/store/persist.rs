//! The small durable state file: the router-assigned password and the
//! last seen mudlist/chanlist ids. Written atomically (tmp + rename) so
//! a crash mid-write never loses the previous state.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use i3_domain::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedState {
    #[serde(default)]
    pub router_password: String,
    #[serde(default)]
    pub mudlist_id: i32,
    #[serde(default)]
    pub chanlist_id: i32,
}

pub struct StateFile {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl StateFile {
    /// Load `state.json` from the state directory, or start fresh.
    pub fn load(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("state.json");
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            PersistedState::default()
        };
        tracing::info!(path = %path.display(), "durable state loaded");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }

    pub fn router_password(&self) -> String {
        self.state.lock().router_password.clone()
    }

    /// Store a router-assigned password. Empty (wire 0) passwords never
    /// overwrite a saved one.
    pub fn set_router_password(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.state.lock();
            if state.router_password == password {
                return Ok(());
            }
            state.router_password = password.to_string();
        }
        self.save()
    }

    pub fn set_mudlist_id(&self, id: i32) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.mudlist_id == id {
                return Ok(());
            }
            state.mudlist_id = id;
        }
        self.save()
    }

    pub fn set_chanlist_id(&self, id: i32) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.chanlist_id == id {
                return Ok(());
            }
            state.chanlist_id = id;
        }
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.state.lock())?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::Io)?;
        Ok(())
    }
}
