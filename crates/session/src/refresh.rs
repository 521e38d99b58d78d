// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight access-token refresh.
//!
//! At most one refresh request is in flight. Callers arriving while one is
//! pending join its ticket and observe the same outcome. Network noise never
//! ends a session; only an explicit 401/403 from the identity service does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{self, Credential};
use crate::error::{IdentityError, InvalidReason, RefreshError};
use crate::state::{epoch_ms, AuthState, LogoutReason, SessionEvent, SessionState};

type RefreshOutcome = Result<Credential, RefreshError>;
type SharedOutcome = Shared<BoxFuture<'static, RefreshOutcome>>;

/// One in-flight refresh attempt, shared by every waiter.
struct RefreshTicket {
    id: u64,
    generation: u64,
    outcome: SharedOutcome,
}

/// How an identity-service answer is classified.
enum Classified {
    Issued(String),
    Definitive(InvalidReason),
    Transient(String),
}

fn classify(result: Result<String, IdentityError>) -> Classified {
    match result {
        Ok(token) => Classified::Issued(token),
        Err(IdentityError::Status { status: 401, .. }) => {
            Classified::Definitive(InvalidReason::NotFound)
        }
        Err(IdentityError::Status { status: 403, .. }) => {
            Classified::Definitive(InvalidReason::Expired)
        }
        Err(e) => Classified::Transient(e.to_string()),
    }
}

/// Coordinates refreshes against the identity service.
#[derive(Clone)]
pub struct RefreshCoordinator {
    auth: Arc<AuthState>,
    inflight: Arc<Mutex<Option<RefreshTicket>>>,
    next_ticket: Arc<AtomicU64>,
}

impl RefreshCoordinator {
    pub fn new(auth: Arc<AuthState>) -> Self {
        Self { auth, inflight: Arc::new(Mutex::new(None)), next_ticket: Arc::new(AtomicU64::new(1)) }
    }

    /// Return a credential that is not stale, refreshing if needed.
    ///
    /// A held credential outside the skew window is returned without any
    /// network call, unless a refresh is already in flight, in which case
    /// the caller joins it.
    pub async fn ensure_fresh(&self) -> RefreshOutcome {
        let outcome = {
            let mut slot = self.inflight.lock();
            match self.current(&slot) {
                Some(ticket) => {
                    debug!(ticket = ticket.id, "joining in-flight refresh");
                    ticket.outcome.clone()
                }
                None => {
                    if let Some(credential) = self.auth.store.credential() {
                        if !credential.is_stale(self.auth.config.skew_ms, epoch_ms()) {
                            return Ok(credential);
                        }
                    }
                    self.issue(&mut slot)
                }
            }
        };
        outcome.await
    }

    /// Refresh regardless of remaining validity, joining any in-flight ticket.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        let outcome = {
            let mut slot = self.inflight.lock();
            match self.current(&slot) {
                Some(ticket) => ticket.outcome.clone(),
                None => self.issue(&mut slot),
            }
        };
        outcome.await
    }

    /// Whether a refresh is currently pending for the current session.
    pub fn in_flight(&self) -> bool {
        self.current(&self.inflight.lock()).is_some()
    }

    /// The parked ticket, unless it belongs to a session that has ended.
    fn current<'a>(&self, slot: &'a Option<RefreshTicket>) -> Option<&'a RefreshTicket> {
        slot.as_ref().filter(|t| t.generation == self.auth.generation())
    }

    /// Spawn a refresh task and park its ticket in `slot`.
    ///
    /// The task runs to completion even if every waiter goes away; the slot
    /// is emptied by the task itself once the outcome is settled.
    fn issue(&self, slot: &mut Option<RefreshTicket>) -> SharedOutcome {
        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let generation = self.auth.generation();
        let auth = Arc::clone(&self.auth);
        let inflight = Arc::clone(&self.inflight);

        let handle = tokio::spawn(async move {
            let outcome = run_refresh(&auth, generation).await;
            let mut slot = inflight.lock();
            if slot.as_ref().map(|t| t.id) == Some(id) {
                *slot = None;
            }
            outcome
        });

        let outcome = async move {
            handle.await.unwrap_or_else(|e| {
                Err(RefreshError::Unavailable(format!("refresh task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        debug!(ticket = id, generation, "refresh issued");
        *slot = Some(RefreshTicket { id, generation, outcome: outcome.clone() });
        outcome
    }
}

/// Perform one refresh and apply its outcome to shared state.
async fn run_refresh(auth: &AuthState, generation: u64) -> RefreshOutcome {
    let prior = auth.store.credential();
    if !auth.transition(SessionState::Authenticated, SessionState::Refreshing) {
        auth.transition(SessionState::Anonymous, SessionState::Authenticating);
    }

    let classified = classify(auth.identity.refresh_token().await);

    if auth.generation() != generation {
        debug!(generation, "discarding refresh outcome from an ended session");
        return Err(RefreshError::Superseded);
    }

    match classified {
        Classified::Issued(token) => {
            let now = epoch_ms();
            let Some(profile) = codec::profile(&token, &auth.role) else {
                warn!("refreshed token does not decode to a permitted profile");
                return end_session(auth, prior, InvalidReason::Unusable).await;
            };
            let credential = Credential::from_token(token, now);
            if !auth.commit_credential(generation, &credential, &profile) {
                debug!(generation, "discarding refresh outcome from an ended session");
                return Err(RefreshError::Superseded);
            }
            info!(
                user_id = profile.id,
                expires_in_secs = credential.remaining_ms(now) / 1000,
                "access token refreshed"
            );
            auth.emit(SessionEvent::Refreshed { expires_at_ms: credential.expires_at_ms });
            Ok(credential)
        }
        Classified::Definitive(reason) => end_session(auth, prior, reason).await,
        Classified::Transient(error) => {
            if !auth.transition(SessionState::Refreshing, SessionState::Authenticated) {
                auth.transition(SessionState::Authenticating, SessionState::Anonymous);
            }
            auth.emit(SessionEvent::RefreshDegraded { error: error.clone() });
            match prior {
                Some(credential) if credential.remaining_ms(epoch_ms()) > 0 => {
                    warn!(err = %error, "refresh failed transiently, keeping current token");
                    Ok(credential)
                }
                _ => {
                    warn!(err = %error, "refresh failed transiently with no usable token");
                    Err(RefreshError::Unavailable(error))
                }
            }
        }
    }
}

/// Definitive invalidity: clear everything, then tell the service.
async fn end_session(
    auth: &AuthState,
    held: Option<Credential>,
    reason: InvalidReason,
) -> RefreshOutcome {
    auth.clear_local();
    let Some(credential) = held else {
        debug!(reason = %reason, "no refresh credential to resume from");
        return Err(RefreshError::Invalid(reason));
    };

    info!(reason = %reason, "refresh rejected, ending session");
    auth.emit(SessionEvent::LoggedOut { reason: LogoutReason::RefreshInvalid });
    if let Err(e) = auth.identity.logout(&credential.access_token).await {
        debug!(err = %e, "remote logout after rejected refresh failed");
    }
    Err(RefreshError::Invalid(reason))
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
