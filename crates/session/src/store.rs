// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store over two mutually exclusive backends.
//!
//! The durable backend survives restarts ("remember me"); the ephemeral one
//! lives as long as the process. A mode marker in the durable backend says
//! which one holds the session. Backend failures are logged and otherwise
//! ignored: the in-memory snapshot stays authoritative.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{Credential, UserProfile};
use crate::error::StorageError;

pub const KEY_ACCESS_TOKEN: &str = "access_token";
pub const KEY_EXPIRES_AT: &str = "expires_at";
pub const KEY_USER_PROFILE: &str = "user_profile";
pub const KEY_MODE: &str = "persistence_mode";

const SESSION_KEYS: [&str; 3] = [KEY_ACCESS_TOKEN, KEY_EXPIRES_AT, KEY_USER_PROFILE];

/// Which backend holds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    Durable,
    Ephemeral,
}

impl PersistenceMode {
    pub fn from_remember(remember: bool) -> Self {
        if remember {
            Self::Durable
        } else {
            Self::Ephemeral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Durable => "durable",
            Self::Ephemeral => "ephemeral",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "durable" => Some(Self::Durable),
            "ephemeral" => Some(Self::Ephemeral),
            _ => None,
        }
    }
}

/// A key/value store that may fail (quota, disabled, io).
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-lifetime backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Backend persisted as one JSON object on disk, written atomically.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write tmp file then rename, so readers never see a partial document.
    fn save(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension(format!("{}.tmp", std::process::id()));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        // A corrupt document is replaced rather than blocking every write.
        let mut entries = self.load().unwrap_or_default();
        entries.insert(key.to_owned(), value.to_owned());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut entries = match self.load() {
            Ok(e) => e,
            Err(StorageError::Encoding(_)) => HashMap::new(),
            Err(e) => return Err(e),
        };
        if entries.remove(key).is_none() && self.path.exists() {
            return Ok(());
        }
        if entries.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }
        self.save(&entries)
    }
}

/// Session snapshot held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub credential: Credential,
    pub profile: UserProfile,
    pub mode: PersistenceMode,
}

#[derive(Debug, Clone)]
enum Snapshot {
    /// Backends not read yet.
    Unloaded,
    Empty,
    Held(StoredSession),
}

/// Credential store over a durable and an ephemeral backend.
pub struct CredentialStore {
    durable: Arc<dyn StorageBackend>,
    ephemeral: Arc<dyn StorageBackend>,
    snapshot: Mutex<Snapshot>,
}

impl CredentialStore {
    pub fn new(durable: Arc<dyn StorageBackend>, ephemeral: Arc<dyn StorageBackend>) -> Self {
        Self { durable, ephemeral, snapshot: Mutex::new(Snapshot::Unloaded) }
    }

    fn backend(&self, mode: PersistenceMode) -> &Arc<dyn StorageBackend> {
        match mode {
            PersistenceMode::Durable => &self.durable,
            PersistenceMode::Ephemeral => &self.ephemeral,
        }
    }

    fn other(&self, mode: PersistenceMode) -> &Arc<dyn StorageBackend> {
        match mode {
            PersistenceMode::Durable => &self.ephemeral,
            PersistenceMode::Ephemeral => &self.durable,
        }
    }

    /// Write the session to the backend for `mode`, then purge the other.
    pub fn set(&self, credential: &Credential, profile: &UserProfile, mode: PersistenceMode) {
        *self.snapshot.lock() = Snapshot::Held(StoredSession {
            credential: credential.clone(),
            profile: profile.clone(),
            mode,
        });

        let profile_json = match serde_json::to_string(profile) {
            Ok(j) => j,
            Err(e) => {
                warn!(err = %e, "failed to encode user profile, session kept in memory only");
                return;
            }
        };
        let expires_at = credential.expires_at_ms.to_string();
        let target = self.backend(mode);
        let writes = [
            (KEY_ACCESS_TOKEN, credential.access_token.as_str()),
            (KEY_EXPIRES_AT, expires_at.as_str()),
            (KEY_USER_PROFILE, profile_json.as_str()),
        ];
        for (key, value) in writes {
            if let Err(e) = target.set(key, value) {
                warn!(mode = mode.as_str(), key, err = %e, "credential write failed");
            }
        }

        let other = self.other(mode);
        for key in SESSION_KEYS {
            if let Err(e) = other.remove(key) {
                warn!(key, err = %e, "failed to purge stale credential copy");
            }
        }

        if let Err(e) = self.durable.set(KEY_MODE, mode.as_str()) {
            warn!(err = %e, "failed to write persistence mode marker");
        }
        debug!(mode = mode.as_str(), "credential stored");
    }

    /// Current session, reading the backends on first use.
    pub fn get(&self) -> Option<StoredSession> {
        let mut snapshot = self.snapshot.lock();
        if let Snapshot::Unloaded = *snapshot {
            *snapshot = match self.load() {
                Some(session) => Snapshot::Held(session),
                None => Snapshot::Empty,
            };
        }
        match &*snapshot {
            Snapshot::Held(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn credential(&self) -> Option<Credential> {
        self.get().map(|s| s.credential)
    }

    pub fn persistence_mode(&self) -> Option<PersistenceMode> {
        self.get().map(|s| s.mode)
    }

    /// Empty both backends and the marker unconditionally.
    pub fn clear(&self) {
        *self.snapshot.lock() = Snapshot::Empty;
        for backend in [&self.durable, &self.ephemeral] {
            for key in SESSION_KEYS {
                if let Err(e) = backend.remove(key) {
                    warn!(key, err = %e, "failed to clear credential key");
                }
            }
        }
        if let Err(e) = self.durable.remove(KEY_MODE) {
            warn!(err = %e, "failed to clear persistence mode marker");
        }
        debug!("credential store cleared");
    }

    /// Read the marker, then only the backend it names.
    fn load(&self) -> Option<StoredSession> {
        let marker = match self.durable.get(KEY_MODE) {
            Ok(m) => m?,
            Err(e) => {
                warn!(err = %e, "failed to read persistence mode marker");
                return None;
            }
        };
        let Some(mode) = PersistenceMode::parse(&marker) else {
            warn!(marker = %marker, "unknown persistence mode marker");
            return None;
        };

        let backend = self.backend(mode);
        let read = |key: &str| match backend.get(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(mode = mode.as_str(), key, err = %e, "credential read failed");
                None
            }
        };
        let access_token = read(KEY_ACCESS_TOKEN).filter(|t| !t.is_empty())?;
        let expires_at_ms = read(KEY_EXPIRES_AT)?.parse().ok()?;
        let profile = match serde_json::from_str(&read(KEY_USER_PROFILE)?) {
            Ok(p) => p,
            Err(e) => {
                warn!(err = %e, "stored user profile unreadable");
                return None;
            }
        };
        Some(StoredSession { credential: Credential { access_token, expires_at_ms }, profile, mode })
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
