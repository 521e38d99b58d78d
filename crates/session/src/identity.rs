// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity service client: login, refresh and logout.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Remote identity service issuing access tokens.
///
/// The refresh credential is held by the service side (a cookie in the HTTP
/// implementation), so `refresh_token` takes no argument.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Exchange identifier and secret for an access token.
    async fn login(&self, identifier: &str, secret: &str) -> Result<String, IdentityError>;

    /// Mint a new access token from the held refresh credential.
    async fn refresh_token(&self) -> Result<String, IdentityError>;

    /// Invalidate the session remotely. Best effort.
    async fn logout(&self, access_token: &str) -> Result<(), IdentityError>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(alias = "access_token")]
    access_token: String,
}

/// Error body returned by the identity service.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// [`IdentityService`] over HTTP.
///
/// Timeout and connection handling live in the underlying `reqwest` client;
/// no retries are performed here.
pub struct HttpIdentityService {
    base_url: String,
    http: reqwest::Client,
}

impl HttpIdentityService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IdentityError> {
        // reqwest is built without a default TLS provider.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| IdentityError::Transport(format!("build http client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { base_url, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn token_from(resp: reqwest::Response) -> Result<String, IdentityError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| IdentityError::Transport(format!("read body: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.message.or(e.error))
                .unwrap_or(body);
            return Err(IdentityError::Status { status: status.as_u16(), message });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| IdentityError::Malformed(format!("parse token response: {e}")))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn login(&self, identifier: &str, secret: &str) -> Result<String, IdentityError> {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&LoginRequest { email: identifier, password: secret })
            .send()
            .await
            .map_err(|e| IdentityError::Transport(format!("HTTP error: {e}")))?;
        Self::token_from(resp).await
    }

    async fn refresh_token(&self) -> Result<String, IdentityError> {
        let resp = self
            .http
            .post(self.url("/auth/refresh-token"))
            .send()
            .await
            .map_err(|e| IdentityError::Transport(format!("HTTP error: {e}")))?;
        Self::token_from(resp).await
    }

    async fn logout(&self, access_token: &str) -> Result<(), IdentityError> {
        let resp = self
            .http
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(format!("HTTP error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(IdentityError::Status { status: status.as_u16(), message });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
