// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session tests against the mock identity service over HTTP,
//! with the durable store on disk.

use std::time::Duration;

use futures_util::future::join_all;

use regdesk_session::{
    InvalidReason, LoginError, LogoutReason, RefreshError, SessionEvent, SessionMachine,
    SessionState,
};
use regdesk_specs::{Account, MockIdentity};

const PASSWORD: &str = "correct horse";

fn attendee() -> Account {
    Account::new(1, "attendee", PASSWORD)
}

fn admin() -> Account {
    Account::new(2, "admin", PASSWORD)
}

#[tokio::test]
async fn remembered_session_survives_restart() -> anyhow::Result<()> {
    let service = MockIdentity::start(vec![attendee()]).await?;
    let dir = tempfile::tempdir()?;
    let config = service.public_config(dir.path().join("session.json"));

    let first = SessionMachine::open(config.clone())?;
    let profile = first.login("user1@example.test", PASSWORD, true).await?;
    assert_eq!(profile.id, 1);
    drop(first);

    let restarted = SessionMachine::open(config)?;
    assert_eq!(restarted.check_auth_status().await, SessionState::Authenticated);
    assert_eq!(restarted.current_user(), Some(profile));
    assert_eq!(service.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn unremembered_session_is_not_written_to_disk() -> anyhow::Result<()> {
    let service = MockIdentity::start(vec![attendee()]).await?;
    let dir = tempfile::tempdir()?;
    let state_file = dir.path().join("session.json");
    let config = service.public_config(&state_file);

    let first = SessionMachine::open(config.clone())?;
    first.login("user1@example.test", PASSWORD, false).await?;
    let token = first.access_token().await;
    assert!(token.is_some());

    let on_disk = std::fs::read_to_string(&state_file)?;
    assert!(!on_disk.contains("access_token"));
    assert!(on_disk.contains("ephemeral"));

    // A fresh process has neither the token nor the refresh cookie.
    let restarted = SessionMachine::open(config)?;
    assert_eq!(restarted.check_auth_status().await, SessionState::Anonymous);
    assert_eq!(service.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn login_failures_map_to_user_errors() -> anyhow::Result<()> {
    let unverified = Account::new(3, "attendee", PASSWORD).unverified();
    let service = MockIdentity::start(vec![attendee(), unverified]).await?;
    let dir = tempfile::tempdir()?;
    let machine = SessionMachine::open(service.public_config(dir.path().join("s.json")))?;

    let wrong_password = machine.login("user1@example.test", "nope", true).await;
    assert_eq!(wrong_password, Err(LoginError::InvalidCredentials));

    let unknown = machine.login("nobody@example.test", PASSWORD, true).await;
    assert_eq!(unknown, Err(LoginError::AccountNotFound));

    let not_verified = machine.login("user3@example.test", PASSWORD, true).await;
    assert_eq!(not_verified, Err(LoginError::NotPermitted));

    assert_eq!(machine.state(), SessionState::Anonymous);
    assert_eq!(service.login_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn admin_console_only_admits_admins() -> anyhow::Result<()> {
    let service = MockIdentity::start(vec![attendee(), admin()]).await?;
    let dir = tempfile::tempdir()?;
    let machine = SessionMachine::open(service.admin_config(dir.path().join("admin.json")))?;

    let attendee_login = machine.login("user1@example.test", PASSWORD, false).await;
    assert_eq!(attendee_login, Err(LoginError::RoleNotPermitted));
    assert_eq!(machine.state(), SessionState::Anonymous);

    let profile = machine.login("user2@example.test", PASSWORD, false).await?;
    assert_eq!(profile.role, "admin");
    assert!(machine.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn stale_token_is_refreshed_with_cookie() -> anyhow::Result<()> {
    let service = MockIdentity::start(vec![attendee()]).await?;
    service.set_token_ttl(Duration::from_secs(30));
    let dir = tempfile::tempdir()?;
    let machine = SessionMachine::open(service.public_config(dir.path().join("s.json")))?;
    machine.login("user1@example.test", PASSWORD, true).await?;
    let mut events = machine.subscribe();

    service.set_token_ttl(Duration::from_secs(30 * 60));
    let credential = machine.ensure_fresh().await?;

    assert_eq!(service.refresh_calls(), 1);
    assert!(credential.remaining_ms(regdesk_session::state::epoch_ms()) > 25 * 60 * 1000);
    assert_eq!(
        events.try_recv().ok(),
        Some(SessionEvent::Refreshed { expires_at_ms: credential.expires_at_ms })
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_share_one_refresh() -> anyhow::Result<()> {
    let service = MockIdentity::start(vec![attendee()]).await?;
    service.set_token_ttl(Duration::from_secs(30));
    let dir = tempfile::tempdir()?;
    let machine = SessionMachine::open(service.public_config(dir.path().join("s.json")))?;
    machine.login("user1@example.test", PASSWORD, true).await?;

    service.set_token_ttl(Duration::from_secs(30 * 60));
    service.set_refresh_delay(Duration::from_millis(100));
    let tokens = join_all((0..8).map(|_| machine.access_token())).await;

    assert_eq!(service.refresh_calls(), 1);
    let first = tokens.first().cloned().flatten();
    assert!(first.is_some());
    assert!(tokens.iter().all(|t| *t == first));
    Ok(())
}

#[tokio::test]
async fn revoked_refresh_forces_logout() -> anyhow::Result<()> {
    let service = MockIdentity::start(vec![attendee()]).await?;
    service.set_token_ttl(Duration::from_secs(30));
    let dir = tempfile::tempdir()?;
    let state_file = dir.path().join("s.json");
    let machine = SessionMachine::open(service.public_config(&state_file))?;
    machine.login("user1@example.test", PASSWORD, true).await?;
    let held = machine.access_token().await;
    let mut events = machine.subscribe();

    service.revoke_sessions();
    let result = machine.ensure_fresh().await;

    assert_eq!(result, Err(RefreshError::Invalid(InvalidReason::Expired)));
    assert_eq!(machine.state(), SessionState::Anonymous);
    assert!(!state_file.exists());
    assert_eq!(service.logged_out().last().cloned(), held);
    assert_eq!(
        events.try_recv().ok(),
        Some(SessionEvent::LoggedOut { reason: LogoutReason::RefreshInvalid })
    );
    Ok(())
}

#[tokio::test]
async fn outage_keeps_valid_session() -> anyhow::Result<()> {
    let service = MockIdentity::start(vec![attendee()]).await?;
    service.set_token_ttl(Duration::from_secs(45));
    let dir = tempfile::tempdir()?;
    let machine = SessionMachine::open(service.public_config(dir.path().join("s.json")))?;
    machine.login("user1@example.test", PASSWORD, true).await?;
    let held = machine.current_user();

    service.set_refresh_status(Some(503));
    let credential = machine.ensure_fresh().await?;

    // Inside the skew window but not yet expired: the old token is kept.
    assert!(credential.remaining_ms(regdesk_session::state::epoch_ms()) > 0);
    assert_eq!(machine.state(), SessionState::Authenticated);
    assert_eq!(machine.current_user(), held);
    Ok(())
}

#[tokio::test]
async fn logout_clears_disk_and_notifies_service() -> anyhow::Result<()> {
    let service = MockIdentity::start(vec![attendee()]).await?;
    let dir = tempfile::tempdir()?;
    let state_file = dir.path().join("s.json");
    let machine = SessionMachine::open(service.public_config(&state_file))?;
    machine.login("user1@example.test", PASSWORD, true).await?;
    let held = machine.access_token().await;
    assert!(state_file.exists());

    machine.logout().await;

    assert_eq!(machine.state(), SessionState::Anonymous);
    assert!(!state_file.exists());
    assert_eq!(service.logged_out().first().cloned(), held);

    // The server dropped the refresh cookie too: nothing to resume.
    assert_eq!(machine.check_auth_status().await, SessionState::Anonymous);
    Ok(())
}

#[tokio::test]
async fn logout_succeeds_when_service_is_gone() -> anyhow::Result<()> {
    let service = MockIdentity::start(vec![attendee()]).await?;
    let dir = tempfile::tempdir()?;
    let state_file = dir.path().join("s.json");
    let machine = SessionMachine::open(service.public_config(&state_file))?;
    machine.login("user1@example.test", PASSWORD, true).await?;

    drop(service);
    machine.logout().await;

    assert_eq!(machine.state(), SessionState::Anonymous);
    assert!(!state_file.exists());
    Ok(())
}
