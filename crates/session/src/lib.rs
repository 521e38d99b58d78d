// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Regdesk session coordinator: keeps a client signed in against a
//! short-lived access token and a server-held refresh credential.
//!
//! [`SessionMachine`] is the only type UI code needs. It never installs a
//! tracing subscriber; that is left to the embedding application.

pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod idle;
pub mod machine;
pub mod refresh;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod test_support;

pub use crate::codec::{Credential, DecodeResult, RoleRequirement, UserProfile};
pub use crate::config::{SessionConfig, Surface};
pub use crate::error::{DecodeError, IdentityError, InvalidReason, LoginError, RefreshError};
pub use crate::identity::{HttpIdentityService, IdentityService};
pub use crate::idle::ActivitySignal;
pub use crate::machine::SessionMachine;
pub use crate::state::{LogoutReason, SessionEvent, SessionState};
pub use crate::store::{FileBackend, MemoryBackend, PersistenceMode, StorageBackend};
