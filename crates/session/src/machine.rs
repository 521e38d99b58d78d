// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state machine: the one entry point the UI talks to.
//!
//! Owns the refresh coordinator, the proactive scheduler and the idle
//! monitor, and decides when each runs. Construct one per process and hand
//! clones to whatever needs it.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::codec::{self, Credential, UserProfile};
use crate::config::SessionConfig;
use crate::error::{LoginError, RefreshError};
use crate::identity::{HttpIdentityService, IdentityService};
use crate::idle::{ActivitySignal, IdleMonitor, TimeoutCallback, WarningCallback};
use crate::refresh::RefreshCoordinator;
use crate::scheduler::ProactiveScheduler;
use crate::state::{epoch_ms, AuthState, LogoutReason, SessionEvent, SessionState};
use crate::store::{CredentialStore, FileBackend, MemoryBackend, PersistenceMode, StorageBackend};

#[derive(Clone)]
pub struct SessionMachine {
    auth: Arc<AuthState>,
    coordinator: RefreshCoordinator,
    scheduler: Arc<ProactiveScheduler>,
    idle: IdleMonitor,
}

impl SessionMachine {
    pub fn new(
        config: SessionConfig,
        identity: Arc<dyn IdentityService>,
        durable: Arc<dyn StorageBackend>,
        ephemeral: Arc<dyn StorageBackend>,
    ) -> Self {
        let store = CredentialStore::new(durable, ephemeral);
        let auth = Arc::new(AuthState::new(config, identity, store));
        let coordinator = RefreshCoordinator::new(Arc::clone(&auth));
        let scheduler = Arc::new(ProactiveScheduler::new(Arc::clone(&auth), coordinator.clone()));
        Self { auth, coordinator, scheduler, idle: IdleMonitor::new() }
    }

    /// Build a machine talking HTTP to `config.identity_url`, with the
    /// durable store at `config.state_file()`.
    pub fn open(config: SessionConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let identity = HttpIdentityService::new(config.identity_url.clone(), config.request_timeout())
            .context("building identity client")?;
        let state_file = config.state_file();
        debug!(path = %state_file.display(), surface = ?config.surface, "opening session");
        Ok(Self::new(
            config,
            Arc::new(identity),
            Arc::new(FileBackend::new(state_file)),
            Arc::new(MemoryBackend::new()),
        ))
    }

    pub fn state(&self) -> SessionState {
        self.auth.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.state().has_profile()
    }

    /// Profile of the signed-in user, if any.
    pub fn current_user(&self) -> Option<UserProfile> {
        if !self.auth.state().has_profile() {
            return None;
        }
        self.auth.store.get().map(|s| s.profile)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.auth.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.auth.subscribe()
    }

    /// Sign in and fix the persistence mode for the session.
    ///
    /// A failed login leaves any session that was already in place untouched.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        remember: bool,
    ) -> Result<UserProfile, LoginError> {
        let previous = self.auth.state();
        let generation = self.auth.bump_generation();
        self.stop_timers();
        self.auth.set_state(SessionState::Authenticating);

        let token = match self.auth.identity.login(identifier, secret).await {
            Ok(token) => token,
            Err(e) => {
                let err = LoginError::from_identity(e);
                info!(err = %err, "login rejected");
                self.abandon_login(generation, previous);
                return Err(err);
            }
        };

        let Some(profile) = codec::profile(&token, &self.auth.role) else {
            warn!(surface = ?self.auth.config.surface, "issued token not permitted on this surface");
            self.abandon_login(generation, previous);
            if let Err(e) = self.auth.identity.logout(&token).await {
                debug!(err = %e, "remote logout of rejected login failed");
            }
            return Err(LoginError::RoleNotPermitted);
        };

        let now = epoch_ms();
        let credential = Credential::from_token(token, now);
        let mode = PersistenceMode::from_remember(remember);
        if !self.auth.commit_session(generation, &credential, &profile, mode) {
            debug!(generation, "login overtaken by another session change");
            return Err(LoginError::Failed("login superseded".to_owned()));
        }

        info!(
            user_id = profile.id,
            mode = mode.as_str(),
            expires_in_secs = credential.remaining_ms(now) / 1000,
            "logged in"
        );
        self.auth.emit(SessionEvent::LoggedIn { profile: profile.clone() });
        self.start_timers();
        Ok(profile)
    }

    /// Sign out: best-effort remote invalidation, then an unconditional
    /// local clear. Safe to call when already signed out.
    pub async fn logout(&self) {
        let held = self.auth.store.credential();
        let was_signed_in = held.is_some() || self.auth.state().has_profile();

        // Fence off in-flight refreshes before suspending on the network.
        self.auth.bump_generation();
        self.stop_timers();

        if let Some(credential) = &held {
            if let Err(e) = self.auth.identity.logout(&credential.access_token).await {
                debug!(err = %e, "remote logout failed, clearing locally");
            }
        }

        self.auth.clear_local();
        if was_signed_in {
            info!("logged out");
            self.auth.emit(SessionEvent::LoggedOut { reason: LogoutReason::UserRequested });
        }
    }

    /// Reconcile with whatever survived from a previous run.
    ///
    /// A held session is restored and refreshed when stale. With nothing
    /// held, one refresh is attempted in case the identity service still
    /// recognizes this client.
    pub async fn check_auth_status(&self) -> SessionState {
        let restored = self.auth.store.get().filter(|session| {
            let permitted = codec::profile(&session.credential.access_token, &self.auth.role)
                .is_some_and(|profile| profile.id == session.profile.id);
            if !permitted {
                warn!(user_id = session.profile.id, "stored session not permitted here, clearing");
                self.auth.clear_local();
            }
            permitted
        });
        match restored {
            Some(session) => {
                self.auth.transition(SessionState::Anonymous, SessionState::Authenticated);
                if session.credential.is_stale(self.auth.config.skew_ms, epoch_ms()) {
                    if let Err(e) = self.coordinator.ensure_fresh().await {
                        debug!(err = %e, "startup refresh did not complete");
                    }
                }
            }
            None => {
                if let Err(e) = self.coordinator.ensure_fresh().await {
                    debug!(err = %e, "no session to resume");
                }
            }
        }

        if self.auth.state().has_profile() && !self.scheduler.is_running() {
            self.start_timers();
        }
        self.auth.state()
    }

    /// A credential outside the skew window, refreshing if needed.
    pub async fn ensure_fresh(&self) -> Result<Credential, RefreshError> {
        self.coordinator.ensure_fresh().await
    }

    /// Access token for an outgoing request, or `None` when signed out or
    /// when no usable token can be obtained.
    pub async fn access_token(&self) -> Option<String> {
        if !self.auth.state().has_profile() {
            return None;
        }
        self.coordinator.ensure_fresh().await.ok().map(|c| c.access_token)
    }

    /// Forward a UI activity signal to the idle monitor.
    pub fn record_activity(&self, signal: ActivitySignal) {
        if self.auth.state().has_profile() {
            self.idle.record(signal);
        }
    }

    /// Whether the proactive refresh timer is running.
    pub fn refresh_timer_active(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Whether the idle monitor is watching.
    pub fn idle_monitor_active(&self) -> bool {
        self.idle.is_active()
    }

    fn start_timers(&self) {
        let config = &self.auth.config;
        self.scheduler.start(config.refresh_interval(), config.refresh_threshold());

        let Some(timeout) = config.idle_timeout() else {
            return;
        };
        let on_timeout: TimeoutCallback = {
            let auth = Arc::clone(&self.auth);
            Arc::new(move || expire_idle(&auth))
        };
        let on_warning: WarningCallback = {
            let auth = Arc::clone(&self.auth);
            Arc::new(move |remaining| {
                auth.emit(SessionEvent::IdleWarning { remaining_ms: remaining.as_millis() as u64 })
            })
        };
        self.idle.start_scoped(
            self.auth.session_token().child_token(),
            timeout,
            config.idle_warning(),
            on_timeout,
            Some(on_warning),
        );
    }

    fn stop_timers(&self) {
        self.scheduler.stop();
        self.idle.stop();
        self.auth.end_session_timers();
    }

    /// Undo the `Authenticating` state of a failed login, unless something
    /// else changed the session meanwhile.
    fn abandon_login(&self, generation: u64, previous: SessionState) {
        if self.auth.generation() != generation {
            return;
        }
        if previous.has_profile() && self.auth.store.get().is_some() {
            self.auth.set_state(SessionState::Authenticated);
            self.start_timers();
        } else {
            self.auth.transition(SessionState::Authenticating, SessionState::Anonymous);
        }
    }
}

/// Idle timeout: clear locally without contacting the identity service.
fn expire_idle(auth: &AuthState) {
    if !auth.state().has_profile() {
        return;
    }
    info!(idle_timeout_ms = auth.config.idle_timeout_ms, "idle timeout, ending session");
    auth.set_state(SessionState::Expired);
    auth.clear_local();
    auth.emit(SessionEvent::LoggedOut { reason: LogoutReason::IdleTimeout });
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
