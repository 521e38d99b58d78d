// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive refresh: poll remaining validity and refresh before expiry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::MAX_TIMER_MS;
use crate::refresh::RefreshCoordinator;
use crate::state::{epoch_ms, AuthState, SessionState};

/// Recurring timer that refreshes the access token ahead of expiry.
pub struct ProactiveScheduler {
    auth: Arc<AuthState>,
    coordinator: RefreshCoordinator,
    running: Mutex<Option<CancellationToken>>,
}

impl ProactiveScheduler {
    pub fn new(auth: Arc<AuthState>, coordinator: RefreshCoordinator) -> Self {
        Self { auth, coordinator, running: Mutex::new(None) }
    }

    /// Start polling every `interval`, replacing any running timer.
    ///
    /// The timer also stops when the current authenticated session ends.
    /// Intervals longer than [`MAX_TIMER_MS`] are clamped.
    pub fn start(&self, interval: Duration, threshold: Duration) {
        let interval = interval.min(Duration::from_millis(MAX_TIMER_MS));
        let cancel = self.auth.session_token().child_token();
        if let Some(previous) = self.running.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let auth = Arc::clone(&self.auth);
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut timer = tokio::time::interval_at(start, interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                tick(&auth, &coordinator, threshold).await;
            }
            debug!("proactive refresh stopped");
        });
    }

    /// Cancel the timer. Safe to call when not started.
    pub fn stop(&self) {
        if let Some(cancel) = self.running.lock().take() {
            cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(|c| !c.is_cancelled())
    }
}

impl Drop for ProactiveScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick(auth: &AuthState, coordinator: &RefreshCoordinator, threshold: Duration) {
    if auth.state() != SessionState::Authenticated {
        return;
    }
    let Some(credential) = auth.store.credential() else {
        return;
    };

    let remaining = credential.remaining_ms(epoch_ms());
    if remaining >= threshold.as_millis() as u64 {
        debug!(remaining_secs = remaining / 1000, "token fresh, no proactive refresh");
        return;
    }

    debug!(remaining_secs = remaining / 1000, "refreshing ahead of expiry");
    // Failures surface through session events.
    let _ = coordinator.refresh_now().await;
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
