// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential codec: compact signed token → claims → user profile.
//!
//! The signature is never verified here; the identity service and resource
//! servers do that. This side only needs identity, role and expiry.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DecodeError;
use crate::state::epoch_ms;

/// Fallback validity when a token carries no `exp` claim (15 minutes).
pub const FALLBACK_VALIDITY_MS: u64 = 15 * 60 * 1000;

/// An access token together with its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    /// Expiry as milliseconds since Unix epoch.
    pub expires_at_ms: u64,
}

impl Credential {
    /// Build a credential, deriving expiry from the token itself.
    pub fn from_token(access_token: String, now_ms: u64) -> Self {
        let expires_at_ms = compute_expiry(&access_token, now_ms);
        Self { access_token, expires_at_ms }
    }

    /// Milliseconds of validity left (0 once past expiry).
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms)
    }

    /// Whether the credential is past expiry once `skew_ms` is subtracted.
    pub fn is_stale(&self, skew_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_add(skew_ms) >= self.expires_at_ms
    }
}

/// Profile derived from token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub derived_name: String,
}

/// Which roles a surface accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRequirement {
    Exactly(String),
    AnyAuthenticated,
}

impl RoleRequirement {
    fn permits(&self, role: &str) -> bool {
        match self {
            Self::Exactly(expected) => role == expected,
            Self::AnyAuthenticated => !role.is_empty(),
        }
    }
}

/// Tagged decode outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    Profile(UserProfile),
    Malformed(DecodeError),
}

impl DecodeResult {
    pub fn into_profile(self) -> Option<UserProfile> {
        match self {
            Self::Profile(p) => Some(p),
            Self::Malformed(_) => None,
        }
    }
}

/// Claims payload. Every field is optional; presence is checked explicitly.
#[derive(Debug, Default, Deserialize)]
struct Claims {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    sub: Option<serde_json::Value>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    exp: Option<f64>,
}

impl Claims {
    /// Numeric identity from `id`, falling back to `sub`.
    fn identity(&self) -> Option<i64> {
        [&self.id, &self.sub].into_iter().flatten().find_map(|v| match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

/// Split a token and parse its middle segment.
fn parse_claims(token: &str) -> Result<Claims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::SegmentCount(segments.len()));
    }
    let payload = segments[1];
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .map_err(|_| DecodeError::Base64)?;
    let text = String::from_utf8(bytes).map_err(|_| DecodeError::Utf8)?;
    serde_json::from_str::<Claims>(&text).map_err(|e| DecodeError::Json(e.to_string()))
}

/// Decode a token into a profile permitted by `required`.
pub fn decode(token: &str, required: &RoleRequirement) -> DecodeResult {
    let claims = match parse_claims(token) {
        Ok(c) => c,
        Err(e) => return DecodeResult::Malformed(e),
    };

    let (Some(id), Some(email)) = (claims.identity(), claims.email.as_deref()) else {
        return DecodeResult::Malformed(DecodeError::MissingIdentity);
    };
    if email.is_empty() {
        return DecodeResult::Malformed(DecodeError::MissingIdentity);
    }

    let role = claims.role.clone().unwrap_or_default();
    if !required.permits(&role) {
        return DecodeResult::Malformed(DecodeError::RoleMismatch { found: role });
    }

    let derived_name = match claims.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => email.split('@').next().unwrap_or(email).to_owned(),
    };

    DecodeResult::Profile(UserProfile { id, email: email.to_owned(), role, derived_name })
}

/// Shorthand for `decode(..).into_profile()`.
pub fn profile(token: &str, required: &RoleRequirement) -> Option<UserProfile> {
    decode(token, required).into_profile()
}

/// Expiry in epoch millis from the `exp` claim.
///
/// Falls back to `now + 15 min` when the claim is absent or the token is
/// unreadable; that path is logged because it means a non-conforming token.
pub fn compute_expiry(token: &str, now_ms: u64) -> u64 {
    match parse_claims(token) {
        Ok(Claims { exp: Some(exp), .. }) if exp.is_finite() && exp > 0.0 => (exp * 1000.0) as u64,
        Ok(_) => {
            warn!("token carries no exp claim, assuming 15 minute validity");
            now_ms + FALLBACK_VALIDITY_MS
        }
        Err(e) => {
            warn!(err = %e, "token unreadable, assuming 15 minute validity");
            now_ms + FALLBACK_VALIDITY_MS
        }
    }
}

/// Whether `claims.exp * 1000 <= now + skew`.
///
/// A token without a readable `exp` is treated as expired: nothing vouches
/// for its validity.
pub fn is_expired(token: &str, skew_ms: u64, now_ms: u64) -> bool {
    match parse_claims(token) {
        Ok(Claims { exp: Some(exp), .. }) => (exp * 1000.0) <= (now_ms + skew_ms) as f64,
        _ => true,
    }
}

/// [`is_expired`] against the wall clock.
pub fn is_expired_now(token: &str, skew_ms: u64) -> bool {
    is_expired(token, skew_ms, epoch_ms())
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
