// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::RoleRequirement;

/// Upper bound for configured timer periods.
pub const MAX_TIMER_MS: u64 = 24 * 60 * 60 * 1000;

/// Which front-end surface the coordinator runs behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    /// Admin console: only `admin` tokens yield a profile.
    Admin,
    /// Public site: any authenticated role is accepted.
    Public,
}

impl Surface {
    pub fn role_requirement(&self) -> RoleRequirement {
        match self {
            Self::Admin => RoleRequirement::Exactly("admin".to_owned()),
            Self::Public => RoleRequirement::AnyAuthenticated,
        }
    }
}

/// Configuration for the session coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, clap::Args)]
pub struct SessionConfig {
    /// Surface this session serves; decides the accepted roles.
    #[arg(long, value_enum, default_value = "public", env = "REGDESK_SURFACE")]
    pub surface: Surface,

    /// Base URL of the identity service.
    #[arg(long, default_value = "http://127.0.0.1:3000", env = "REGDESK_IDENTITY_URL")]
    pub identity_url: String,

    /// Per-request timeout for identity calls in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "REGDESK_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Margin subtracted from token expiry when deciding staleness.
    #[arg(long, default_value_t = 60_000, env = "REGDESK_SKEW_MS")]
    pub skew_ms: u64,

    /// Proactive refresh poll interval in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "REGDESK_REFRESH_INTERVAL_MS")]
    pub refresh_interval_ms: u64,

    /// Refresh when less than this much validity remains.
    #[arg(long, default_value_t = 300_000, env = "REGDESK_REFRESH_THRESHOLD_MS")]
    pub refresh_threshold_ms: u64,

    /// Idle timeout in milliseconds. Zero disables idle enforcement.
    #[arg(long, default_value_t = 0, env = "REGDESK_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// How long before the idle timeout the warning fires.
    #[arg(long, default_value_t = 60_000, env = "REGDESK_IDLE_WARNING_MS")]
    pub idle_warning_ms: u64,

    /// Persistence mode used when a refresh happens without a stored mode.
    #[arg(long, env = "REGDESK_REMEMBER_DEFAULT")]
    #[serde(default)]
    pub remember_default: bool,

    /// Durable credential file. Defaults to the per-user state directory.
    #[arg(long, env = "REGDESK_STATE_FILE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

impl SessionConfig {
    /// Admin console preset: tight polling and a five minute idle timeout.
    pub fn admin(identity_url: impl Into<String>) -> Self {
        Self {
            surface: Surface::Admin,
            identity_url: identity_url.into(),
            request_timeout_ms: 10_000,
            skew_ms: 60_000,
            refresh_interval_ms: 120_000,
            refresh_threshold_ms: 600_000,
            idle_timeout_ms: 300_000,
            idle_warning_ms: 60_000,
            remember_default: false,
            state_file: None,
        }
    }

    /// Public site preset: relaxed polling and no idle enforcement.
    pub fn public(identity_url: impl Into<String>) -> Self {
        Self {
            surface: Surface::Public,
            identity_url: identity_url.into(),
            request_timeout_ms: 10_000,
            skew_ms: 60_000,
            refresh_interval_ms: 300_000,
            refresh_threshold_ms: 300_000,
            idle_timeout_ms: 0,
            idle_warning_ms: 60_000,
            remember_default: false,
            state_file: None,
        }
    }

    /// Reject combinations the coordinator cannot honour.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identity_url.trim().is_empty() {
            anyhow::bail!("identity_url must not be empty");
        }
        if self.refresh_interval_ms == 0 {
            anyhow::bail!("refresh_interval_ms must be positive");
        }
        for (name, value) in [
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
        ] {
            if value > MAX_TIMER_MS {
                anyhow::bail!("{name} ({value}) must not exceed {MAX_TIMER_MS}");
            }
        }
        if self.idle_timeout_ms > 0 && self.idle_warning_ms >= self.idle_timeout_ms {
            anyhow::bail!(
                "idle_warning_ms ({}) must be shorter than idle_timeout_ms ({})",
                self.idle_warning_ms,
                self.idle_timeout_ms
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_millis(self.refresh_threshold_ms)
    }

    /// `None` when idle enforcement is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn idle_warning(&self) -> Duration {
        Duration::from_millis(self.idle_warning_ms)
    }

    /// Resolve the durable credential file.
    ///
    /// Checks the explicit setting, then `$XDG_STATE_HOME/regdesk`,
    /// then `$HOME/.local/state/regdesk`.
    pub fn state_file(&self) -> PathBuf {
        if let Some(ref path) = self.state_file {
            return path.clone();
        }
        let file = match self.surface {
            Surface::Admin => "admin-session.json",
            Surface::Public => "session.json",
        };
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("regdesk").join(file);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/regdesk").join(file);
        }
        PathBuf::from(".regdesk").join(file)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
