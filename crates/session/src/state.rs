// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{Credential, RoleRequirement, UserProfile};
use crate::config::SessionConfig;
use crate::identity::IdentityService;
use crate::store::{CredentialStore, PersistenceMode};

/// Lifecycle state of the client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
    /// Idle timeout fired; local state is being torn down.
    Expired,
}

impl SessionState {
    /// `Authenticated` and `Refreshing` imply a profile is held.
    pub fn has_profile(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Refreshing)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// The user asked to log out.
    UserRequested,
    /// The identity service rejected the refresh credential.
    RefreshInvalid,
    /// No activity for the configured idle timeout.
    IdleTimeout,
}

/// Events broadcast to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    LoggedIn { profile: UserProfile },
    Refreshed { expires_at_ms: u64 },
    /// Background refresh failed without ending the session.
    RefreshDegraded { error: String },
    IdleWarning { remaining_ms: u64 },
    LoggedOut { reason: LogoutReason },
}

/// Shared coordinator state.
///
/// Locks here are never held across an `.await`.
pub struct AuthState {
    pub config: SessionConfig,
    pub role: RoleRequirement,
    pub identity: Arc<dyn IdentityService>,
    pub store: CredentialStore,
    lifecycle: RwLock<SessionState>,
    /// Bumped whenever a session ends or a new one begins. In-flight
    /// refreshes captured under an older generation are discarded.
    generation: AtomicU64,
    /// Cancelled when the current authenticated session ends; timers
    /// belonging to that session run as children of it.
    session_cancel: Mutex<CancellationToken>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl AuthState {
    pub fn new(
        config: SessionConfig,
        identity: Arc<dyn IdentityService>,
        store: CredentialStore,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            role: config.surface.role_requirement(),
            config,
            identity,
            store,
            lifecycle: RwLock::new(SessionState::Anonymous),
            generation: AtomicU64::new(0),
            session_cancel: Mutex::new(CancellationToken::new()),
            event_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.lifecycle.read()
    }

    pub fn set_state(&self, next: SessionState) {
        let mut state = self.lifecycle.write();
        if *state != next {
            debug!(from = ?*state, to = ?next, "session state");
            *state = next;
        }
    }

    /// Move `from -> to` only if currently in `from`.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.lifecycle.write();
        if *state == from {
            debug!(from = ?from, to = ?to, "session state");
            *state = to;
            true
        } else {
            false
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a new generation, invalidating in-flight refresh tickets.
    pub fn bump_generation(&self) -> u64 {
        // Serialized with `commit_credential` through the lifecycle lock.
        let _state = self.lifecycle.write();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Token scoping timers to the current authenticated session.
    pub fn session_token(&self) -> CancellationToken {
        self.session_cancel.lock().clone()
    }

    /// Cancel timers of the ending session and arm a fresh token.
    pub fn end_session_timers(&self) {
        let mut token = self.session_cancel.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Store a credential and mark the session authenticated, unless the
    /// generation moved on since `generation` was captured.
    pub fn commit_credential(
        &self,
        generation: u64,
        credential: &Credential,
        profile: &UserProfile,
    ) -> bool {
        let mode = self.store.persistence_mode().unwrap_or(self.default_mode());
        self.commit_session(generation, credential, profile, mode)
    }

    /// Like [`commit_credential`](Self::commit_credential) with an explicit mode.
    pub fn commit_session(
        &self,
        generation: u64,
        credential: &Credential,
        profile: &UserProfile,
        mode: PersistenceMode,
    ) -> bool {
        let mut state = self.lifecycle.write();
        if self.generation() != generation {
            return false;
        }
        self.store.set(credential, profile, mode);
        *state = SessionState::Authenticated;
        true
    }

    /// Clear local state and settle in `Anonymous`. Idempotent.
    pub fn clear_local(&self) {
        self.bump_generation();
        self.end_session_timers();
        self.store.clear();
        self.set_state(SessionState::Anonymous);
    }

    pub fn default_mode(&self) -> PersistenceMode {
        PersistenceMode::from_remember(self.config.remember_default)
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
