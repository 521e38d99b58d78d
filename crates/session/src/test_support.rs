// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test helpers shared by unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;

use crate::config::SessionConfig;
use crate::error::IdentityError;
use crate::identity::IdentityService;
use crate::machine::SessionMachine;
use crate::store::MemoryBackend;

/// Encode `claims` as an unsigned three-segment token.
pub fn mint_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// Token for `id` with `role`, expiring at `exp_ms` (epoch millis).
pub fn token_for(id: i64, role: &str, exp_ms: u64) -> String {
    mint_token(&serde_json::json!({
        "id": id,
        "email": format!("user{id}@example.test"),
        "role": role,
        "exp": exp_ms / 1000,
    }))
}

/// Scripted identity service.
///
/// Each call pops the next scripted response for its endpoint; when the
/// script runs dry the last response repeats.
#[derive(Default)]
pub struct FakeIdentity {
    login_script: Mutex<VecDeque<Result<String, IdentityError>>>,
    refresh_script: Mutex<VecDeque<Result<String, IdentityError>>>,
    last_login: Mutex<Option<Result<String, IdentityError>>>,
    last_refresh: Mutex<Option<Result<String, IdentityError>>>,
    refresh_delay: Mutex<Duration>,
    pub login_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub logout_calls: AtomicU32,
    pub logged_out_tokens: Mutex<Vec<String>>,
}

impl FakeIdentity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_login(&self, response: Result<String, IdentityError>) {
        self.login_script.lock().push_back(response);
    }

    pub fn push_refresh(&self, response: Result<String, IdentityError>) {
        self.refresh_script.lock().push_back(response);
    }

    /// Hold each refresh call open for `delay` before answering.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> u32 {
        self.logout_calls.load(Ordering::SeqCst)
    }

    fn next(
        script: &Mutex<VecDeque<Result<String, IdentityError>>>,
        last: &Mutex<Option<Result<String, IdentityError>>>,
    ) -> Result<String, IdentityError> {
        if let Some(resp) = script.lock().pop_front() {
            *last.lock() = Some(resp.clone());
            return resp;
        }
        last.lock()
            .clone()
            .unwrap_or_else(|| Err(IdentityError::Transport("no scripted response".to_owned())))
    }
}

#[async_trait]
impl IdentityService for FakeIdentity {
    async fn login(&self, _identifier: &str, _secret: &str) -> Result<String, IdentityError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.login_script, &self.last_login)
    }

    async fn refresh_token(&self) -> Result<String, IdentityError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Self::next(&self.refresh_script, &self.last_refresh)
    }

    async fn logout(&self, access_token: &str) -> Result<(), IdentityError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logged_out_tokens.lock().push(access_token.to_owned());
        Ok(())
    }
}

/// Identity-service failure with `status`.
pub fn status_error(status: u16) -> IdentityError {
    IdentityError::Status { status, message: String::new() }
}

/// Network-level identity failure.
pub fn network_error() -> IdentityError {
    IdentityError::Transport("connection refused".to_owned())
}

/// Machine over in-memory backends and a fake identity service.
pub fn machine_with(
    config: SessionConfig,
    identity: Arc<FakeIdentity>,
) -> (SessionMachine, Arc<MemoryBackend>, Arc<MemoryBackend>) {
    let durable = Arc::new(MemoryBackend::new());
    let ephemeral = Arc::new(MemoryBackend::new());
    let machine = SessionMachine::new(config, identity, durable.clone(), ephemeral.clone());
    (machine, durable, ephemeral)
}

/// Install a test-writer tracing subscriber once per process.
#[cfg(test)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
