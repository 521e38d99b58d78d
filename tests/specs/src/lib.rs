// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end session tests.
//!
//! Runs an in-process identity service over real HTTP: login issues a
//! refresh cookie, refresh honours it, logout records the bearer token.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use regdesk_session::state::epoch_ms;
use regdesk_session::test_support::token_for;
use regdesk_session::SessionConfig;

const REFRESH_COOKIE: &str = "refresh_token";

/// A registered account on the mock service.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub password: String,
    pub role: String,
    pub verified: bool,
}

impl Account {
    pub fn new(id: i64, role: &str, password: &str) -> Self {
        Self {
            id,
            email: format!("user{id}@example.test"),
            password: password.to_owned(),
            role: role.to_owned(),
            verified: true,
        }
    }

    pub fn unverified(mut self) -> Self {
        self.verified = false;
        self
    }
}

#[derive(Default)]
struct Inner {
    accounts: Vec<Account>,
    /// Live refresh cookies, mapped to the account they belong to.
    sessions: HashMap<String, i64>,
    next_session: u64,
    token_ttl: Duration,
    refresh_status: Option<u16>,
    refresh_delay: Duration,
    login_calls: u32,
    refresh_calls: u32,
    logged_out: Vec<String>,
}

impl Inner {
    fn issue(&mut self, account_id: i64, role: &str) -> String {
        token_for(account_id, role, epoch_ms() + self.token_ttl.as_millis() as u64)
    }
}

type Shared = Arc<Mutex<Inner>>;

/// In-process identity service, shut down on drop.
pub struct MockIdentity {
    addr: SocketAddr,
    inner: Shared,
    server: JoinHandle<()>,
}

impl MockIdentity {
    /// Start serving `accounts` on an ephemeral port. Issued tokens are
    /// valid for 30 minutes unless changed with [`set_token_ttl`](Self::set_token_ttl).
    pub async fn start(accounts: Vec<Account>) -> anyhow::Result<Self> {
        let inner = Arc::new(Mutex::new(Inner {
            accounts,
            token_ttl: Duration::from_secs(30 * 60),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh-token", post(refresh))
            .route("/auth/logout", post(logout))
            .with_state(Arc::clone(&inner));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, inner, server })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Public-site config pointed at this service with a durable file at `state_file`.
    pub fn public_config(&self, state_file: impl Into<PathBuf>) -> SessionConfig {
        let mut config = SessionConfig::public(self.base_url());
        config.state_file = Some(state_file.into());
        config
    }

    /// Admin-console config pointed at this service with a durable file at `state_file`.
    pub fn admin_config(&self, state_file: impl Into<PathBuf>) -> SessionConfig {
        let mut config = SessionConfig::admin(self.base_url());
        config.state_file = Some(state_file.into());
        config
    }

    pub fn set_token_ttl(&self, ttl: Duration) {
        self.inner.lock().token_ttl = ttl;
    }

    /// Answer every refresh with `status` (or restore normal behaviour with `None`).
    pub fn set_refresh_status(&self, status: Option<u16>) {
        self.inner.lock().refresh_status = status;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.inner.lock().refresh_delay = delay;
    }

    /// Forget every refresh cookie, as if all sessions expired server-side.
    pub fn revoke_sessions(&self) {
        self.inner.lock().sessions.clear();
    }

    pub fn login_calls(&self) -> u32 {
        self.inner.lock().login_calls
    }

    pub fn refresh_calls(&self) -> u32 {
        self.inner.lock().refresh_calls
    }

    /// Bearer tokens received by the logout endpoint, in order.
    pub fn logged_out(&self) -> Vec<String> {
        self.inner.lock().logged_out.clone()
    }
}

impl Drop for MockIdentity {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

async fn login(State(inner): State<Shared>, Json(body): Json<LoginBody>) -> Response {
    let mut inner = inner.lock();
    inner.login_calls += 1;

    let Some(account) = inner.accounts.iter().find(|a| a.email == body.email).cloned() else {
        return error(StatusCode::NOT_FOUND, "Account not found");
    };
    if account.password != body.password {
        return error(StatusCode::BAD_REQUEST, "Invalid credentials");
    }
    if !account.verified {
        return error(StatusCode::FORBIDDEN, "Email not verified");
    }

    inner.next_session += 1;
    let session = format!("rt-{}", inner.next_session);
    inner.sessions.insert(session.clone(), account.id);
    let token = inner.issue(account.id, &account.role);

    let set_cookie = format!("{REFRESH_COOKIE}={session}; Path=/; HttpOnly");
    ([(header::SET_COOKIE, set_cookie)], Json(json!({ "accessToken": token }))).into_response()
}

async fn refresh(State(inner): State<Shared>, headers: HeaderMap) -> Response {
    let delay = {
        let mut inner = inner.lock();
        inner.refresh_calls += 1;
        inner.refresh_delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut inner = inner.lock();
    if let Some(status) = inner.refresh_status {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return error(status, "refresh failed");
    }
    let Some(session) = cookie(&headers, REFRESH_COOKIE) else {
        return error(StatusCode::UNAUTHORIZED, "Refresh token not found");
    };
    let Some(account_id) = inner.sessions.get(&session).copied() else {
        return error(StatusCode::FORBIDDEN, "Invalid or expired refresh token");
    };
    let Some(role) = inner.accounts.iter().find(|a| a.id == account_id).map(|a| a.role.clone())
    else {
        return error(StatusCode::FORBIDDEN, "Account removed");
    };
    let token = inner.issue(account_id, &role);
    Json(json!({ "accessToken": token })).into_response()
}

async fn logout(State(inner): State<Shared>, headers: HeaderMap) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned);
    let mut inner = inner.lock();
    if let Some(token) = bearer {
        inner.logged_out.push(token);
    }
    if let Some(session) = cookie(&headers, REFRESH_COOKIE) {
        inner.sessions.remove(&session);
    }
    StatusCode::NO_CONTENT.into_response()
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_owned())
}
