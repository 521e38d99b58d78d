// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the session coordinator.
//!
//! Only [`RefreshError::Invalid`] (and an idle timeout, which is not an
//! error) may force a session back to anonymous. Everything else is absorbed
//! while the held access token is still technically valid.

use thiserror::Error;

/// A token could not be turned into a user profile.
///
/// Always recovered locally: callers treat it as "no profile".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected 3 dot-separated segments, found {0}")]
    SegmentCount(usize),
    #[error("claims segment is not valid base64url")]
    Base64,
    #[error("claims segment is not valid UTF-8")]
    Utf8,
    #[error("claims segment is not a JSON object: {0}")]
    Json(String),
    #[error("claims carry no identity")]
    MissingIdentity,
    #[error("role {found:?} is not permitted on this surface")]
    RoleMismatch { found: String },
}

/// Why a refresh credential was rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Identity service answered 401: no refresh credential is held.
    NotFound,
    /// Identity service answered 403: the refresh credential is invalid or expired.
    Expired,
    /// The service issued a token that does not decode to a usable profile.
    Unusable,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "refresh credential not found",
            Self::Expired => "refresh credential invalid or expired",
            Self::Unusable => "refreshed token is unusable",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a failed `ensure_fresh`. Cloned to every waiter of a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// Definitive: the session is over and local state has been cleared.
    #[error("refresh rejected: {0}")]
    Invalid(InvalidReason),
    /// Transient: the attempt did not complete; says nothing about validity.
    #[error("refresh unavailable: {0}")]
    Unavailable(String),
    /// The session this refresh belonged to ended while it was in flight.
    #[error("refresh superseded by a newer session")]
    Superseded,
}

impl RefreshError {
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// A storage backend write or read failed. Recovered locally.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Raw failure reported by the identity service transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The service answered with a non-success status.
    #[error("identity service returned {status}: {message}")]
    Status { status: u16, message: String },
    /// The request never produced a response (connect, timeout, body read).
    #[error("identity service unreachable: {0}")]
    Transport(String),
    /// The response arrived but could not be understood.
    #[error("malformed identity response: {0}")]
    Malformed(String),
}

impl IdentityError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Login failure, surfaced verbatim to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    /// 400: wrong identifier/secret combination.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// 404: no account for this identifier.
    #[error("account not found")]
    AccountNotFound,
    /// 403: account exists but may not sign in (unverified or disabled).
    #[error("account not permitted to sign in")]
    NotPermitted,
    /// The issued token lacks the role this surface requires.
    #[error("role not permitted on this surface")]
    RoleNotPermitted,
    /// Any other failure, including transport errors.
    #[error("login failed: {0}")]
    Failed(String),
}

impl LoginError {
    /// Map an identity-service failure onto the login taxonomy.
    pub fn from_identity(err: IdentityError) -> Self {
        match err {
            IdentityError::Status { status: 400, .. } => Self::InvalidCredentials,
            IdentityError::Status { status: 404, .. } => Self::AccountNotFound,
            IdentityError::Status { status: 403, .. } => Self::NotPermitted,
            IdentityError::Status { message, .. } if !message.is_empty() => Self::Failed(message),
            other => Self::Failed(other.to_string()),
        }
    }

    /// Message suitable for inline display next to the login form.
    pub fn user_message(&self) -> &str {
        match self {
            Self::InvalidCredentials => "Incorrect email or password.",
            Self::AccountNotFound => "No account exists for this email.",
            Self::NotPermitted => "This account is not allowed to sign in.",
            Self::RoleNotPermitted => "This account does not have access to this area.",
            Self::Failed(_) => "Sign-in failed. Please try again.",
        }
    }

    /// Whether the message belongs next to a specific form field rather than
    /// in the general error banner.
    pub fn is_field_error(&self) -> bool {
        matches!(self, Self::InvalidCredentials | Self::AccountNotFound)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
