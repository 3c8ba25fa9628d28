#![allow(clippy::unwrap_used)]

mod common;

use anyhow::Result;
use authkeeper::{
    backend::{ApiRequest, ApiResponse, TokenGrant, TokenVerification, AUTHORIZATION},
    clock::TokioClock,
    error::{BackendError, SessionError},
    session::{
        AuthenticatedClient, SessionEvent, SessionManager, CREDENTIALS_KEY, LEGACY_TOKEN_KEY,
    },
    storage::{MemoryStorage, Storage},
};
use common::{rejected, run_pending, MockBackend, MockTransport};
use secrecy::ExposeSecret;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

fn session_with(backend: &Arc<MockBackend>, storage: &MemoryStorage) -> SessionManager {
    SessionManager::new(
        backend.clone(),
        Arc::new(storage.clone()),
        TokioClock::shared(),
    )
}

fn logged_in(backend: &Arc<MockBackend>, storage: &MemoryStorage) -> SessionManager {
    let session = session_with(backend, storage);
    session.adopt_credentials(TokenGrant::new("access-0", Some("refresh-0"), 3600));
    session
}

#[tokio::test(start_paused = true)]
async fn concurrent_renewals_share_one_exchange() -> Result<()> {
    let backend = Arc::new(MockBackend::with_refresh_delay(Duration::from_secs(1)));
    let session = logged_in(&backend, &MemoryStorage::new());

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.renew().await })
        })
        .collect();

    let mut tokens = Vec::new();
    for handle in handles {
        let access = handle.await??;
        tokens.push(access.token.expose_secret().to_string());
    }

    assert_eq!(MockBackend::count(&backend.refreshes), 1);
    assert!(tokens.iter().all(|token| token == "access-1"));
    assert_eq!(
        backend.last_refresh_token.lock().unwrap().as_deref(),
        Some("refresh-0")
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_renewals_share_one_failure() -> Result<()> {
    let backend = Arc::new(MockBackend::with_refresh_delay(Duration::from_secs(1)));
    backend.fail_refresh(rejected(401, "Refresh token revoked"));
    let storage = MemoryStorage::new();
    let session = logged_in(&backend, &storage);
    let mut events = session.subscribe();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.renew().await })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.await?.unwrap_err(),
            SessionError::RenewalRejected("Refresh token revoked".to_string())
        );
    }

    assert_eq!(MockBackend::count(&backend.refreshes), 1);
    assert!(!session.status().has_tokens);
    assert_eq!(storage.get(CREDENTIALS_KEY)?, None);
    assert_eq!(
        events.recv().await?,
        SessionEvent::ReauthRequired {
            reason: "Renewal rejected: Refresh token revoked".to_string()
        }
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn network_failure_during_renewal_is_terminal() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    backend.fail_refresh(BackendError::Network("connection refused".to_string()));
    let session = logged_in(&backend, &MemoryStorage::new());

    let err = session.renew().await.unwrap_err();

    assert!(matches!(err, SessionError::RenewalUnreachable(_)));
    assert!(err.requires_reauth());
    assert!(session.current_access_token().is_none());
    assert_eq!(
        session.renew().await.unwrap_err(),
        SessionError::NoRenewalCredential
    );
    assert_eq!(MockBackend::count(&backend.refreshes), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn a_new_renewal_starts_after_the_previous_settles() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    let session = logged_in(&backend, &MemoryStorage::new());

    let first = session.renew().await?;
    let second = session.renew().await?;

    assert_eq!(first.token.expose_secret(), "access-1");
    assert_eq!(second.token.expose_secret(), "access-2");
    assert_eq!(
        backend.last_refresh_token.lock().unwrap().as_deref(),
        Some("refresh-1")
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn proactive_renewal_fires_at_lifetime_minus_margin() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    let session = session_with(&backend, &MemoryStorage::new());
    let mut events = session.subscribe();
    let start = Instant::now();

    session.adopt_credentials(TokenGrant::new("access-0", Some("refresh-0"), 3600));

    tokio::time::advance(Duration::from_secs(3299)).await;
    run_pending().await;
    assert_eq!(MockBackend::count(&backend.refreshes), 0);

    let event = events.recv().await?;

    assert!(matches!(event, SessionEvent::Renewed { .. }));
    assert_eq!(start.elapsed(), Duration::from_secs(3300));
    assert_eq!(MockBackend::count(&backend.refreshes), 1);
    assert_eq!(
        session.current_access_token().unwrap().expose_secret(),
        "access-1"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn adoption_rearms_the_timer() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    let session = session_with(&backend, &MemoryStorage::new());

    session.adopt_credentials(TokenGrant::new("a", Some("r"), 3600));
    tokio::time::advance(Duration::from_secs(3000)).await;
    session.adopt_credentials(TokenGrant::new("b", Some("r"), 3600));

    tokio::time::advance(Duration::from_secs(301)).await;
    run_pending().await;

    // the first timer would have fired at 3300s
    assert_eq!(MockBackend::count(&backend.refreshes), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn restored_expired_credentials_renew_immediately() -> Result<()> {
    let storage = MemoryStorage::new();
    storage.set(
        CREDENTIALS_KEY,
        r#"{"access_token":"old","refresh_token":"r","expire_time":"2000-01-01T00:00:00Z"}"#,
    )?;
    let backend = Arc::new(MockBackend::default());

    let session = session_with(&backend, &storage);
    run_pending().await;

    assert_eq!(MockBackend::count(&backend.refreshes), 1);
    assert_eq!(
        session.current_access_token().unwrap().expose_secret(),
        "access-1"
    );
    assert!(!session.status().is_expired);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn legacy_token_is_adopted() -> Result<()> {
    let storage = MemoryStorage::new();
    storage.set(LEGACY_TOKEN_KEY, "legacy-token")?;
    let backend = Arc::new(MockBackend::default());

    let session = session_with(&backend, &storage);
    run_pending().await;

    let status = session.status();
    assert!(status.has_tokens);
    assert!(status.is_expired);
    assert_eq!(status.expires_at, None);
    assert_eq!(status.time_until_expiry, Duration::ZERO);
    assert_eq!(
        session.current_access_token().unwrap().expose_secret(),
        "legacy-token"
    );
    assert!(!session.has_renewal_credential());
    assert_eq!(MockBackend::count(&backend.refreshes), 0);
    assert_eq!(storage.get(LEGACY_TOKEN_KEY)?, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_expiry_failure_is_returned_verbatim() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    let session = logged_in(&backend, &MemoryStorage::new());
    let transport = Arc::new(MockTransport::replying(&[
        ApiResponse::new(401, r#"{"detail":"Token expired"}"#),
        ApiResponse::new(401, r#"{"detail":"Still expired"}"#),
    ]));
    let client = AuthenticatedClient::new(session.clone(), transport.clone());

    let response = client.send(ApiRequest::get("/users/me")).await?;

    assert_eq!(
        response,
        ApiResponse::new(401, r#"{"detail":"Still expired"}"#)
    );
    assert_eq!(MockBackend::count(&backend.refreshes), 1);

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].header(AUTHORIZATION), Some("Bearer access-0"));
    assert!(!sent[0].is_retry());
    assert_eq!(sent[1].header(AUTHORIZATION), Some("Bearer access-1"));
    assert!(sent[1].is_retry());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn expired_request_is_replayed_after_renewal() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    let session = logged_in(&backend, &MemoryStorage::new());
    let transport = Arc::new(MockTransport::replying(&[
        ApiResponse::new(401, ""),
        ApiResponse::new(200, r#"{"uid":"user1"}"#),
    ]));
    let client = AuthenticatedClient::new(session, transport.clone());

    let response = client
        .send(ApiRequest::post("/users", serde_json::json!({"uid": "user1"})))
        .await?;

    assert!(response.is_success());
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].body, sent[0].body);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn explicit_credentials_are_left_alone_until_replay() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    let session = logged_in(&backend, &MemoryStorage::new());
    let transport = Arc::new(MockTransport::replying(&[ApiResponse::new(401, "")]));
    let client = AuthenticatedClient::new(session, transport.clone());

    client
        .send(ApiRequest::get("/users/me").with_header("Authorization", "Bearer explicit"))
        .await?;

    let sent = transport.sent();
    assert_eq!(sent[0].header(AUTHORIZATION), Some("Bearer explicit"));
    assert_eq!(sent[1].header(AUTHORIZATION), Some("Bearer access-1"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn expiry_without_renewal_credential_is_not_retried() -> Result<()> {
    let storage = MemoryStorage::new();
    storage.set(LEGACY_TOKEN_KEY, "legacy-token")?;
    let backend = Arc::new(MockBackend::default());
    let session = session_with(&backend, &storage);
    let transport = Arc::new(MockTransport::replying(&[ApiResponse::new(401, "")]));
    let client = AuthenticatedClient::new(session, transport.clone());

    let response = client.send(ApiRequest::get("/users/me")).await?;

    assert!(response.is_auth_expired());
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(MockBackend::count(&backend.refreshes), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_keeps_the_session() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    let session = logged_in(&backend, &MemoryStorage::new());
    let transport = Arc::new(MockTransport::unreachable());
    let client = AuthenticatedClient::new(session.clone(), transport.clone());

    let err = client.send(ApiRequest::get("/users/me")).await.unwrap_err();

    assert!(matches!(err, SessionError::NetworkFailure(_)));
    assert!(!err.requires_reauth());
    assert!(session.status().has_tokens);
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(MockBackend::count(&backend.refreshes), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_renewal_propagates_to_the_request() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    backend.fail_refresh(rejected(401, "Invalid refresh token"));
    let session = logged_in(&backend, &MemoryStorage::new());
    let transport = Arc::new(MockTransport::replying(&[ApiResponse::new(401, "")]));
    let client = AuthenticatedClient::new(session.clone(), transport.clone());

    let err = client.send(ApiRequest::get("/users/me")).await.unwrap_err();

    assert!(err.requires_reauth());
    assert_eq!(transport.sent().len(), 1);
    assert!(!session.status().has_tokens);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn logout_clears_local_state_when_backend_fails() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    backend.fail_logout(BackendError::Network("connection refused".to_string()));
    let storage = MemoryStorage::new();
    let session = logged_in(&backend, &storage);
    let mut events = session.subscribe();

    session.logout().await;

    assert!(!session.status().has_tokens);
    assert_eq!(storage.get(CREDENTIALS_KEY)?, None);
    assert_eq!(MockBackend::count(&backend.logouts), 1);
    assert_eq!(events.recv().await?, SessionEvent::LoggedOut);

    // no timer left behind
    tokio::time::advance(Duration::from_secs(4000)).await;
    run_pending().await;
    assert_eq!(MockBackend::count(&backend.refreshes), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn logout_all_uses_the_access_credential() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    backend.fail_logout(rejected(500, "Internal Server Error"));
    let session = logged_in(&backend, &MemoryStorage::new());

    session.logout_all().await;

    assert!(!session.status().has_tokens);
    assert_eq!(
        backend.last_logout_all_token.lock().unwrap().as_deref(),
        Some("access-0")
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn logout_during_renewal_discards_the_outcome() -> Result<()> {
    let backend = Arc::new(MockBackend::with_refresh_delay(Duration::from_secs(5)));
    let storage = MemoryStorage::new();
    let session = logged_in(&backend, &storage);

    let renewal = {
        let session = session.clone();
        tokio::spawn(async move { session.renew().await })
    };
    run_pending().await;

    session.logout().await;

    assert_eq!(renewal.await?.unwrap_err(), SessionError::NotAuthenticated);
    assert!(!session.status().has_tokens);
    assert_eq!(storage.get(CREDENTIALS_KEY)?, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn expired_verification_renews_once() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    backend.push_verification(TokenVerification {
        valid: false,
        expired: true,
        data: None,
    });
    let session = logged_in(&backend, &MemoryStorage::new());

    let verification = session.verify_token().await?;

    assert!(verification.valid);
    assert_eq!(MockBackend::count(&backend.verifications), 2);
    assert_eq!(MockBackend::count(&backend.refreshes), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn verification_requires_credentials() {
    let backend = Arc::new(MockBackend::default());
    let session = session_with(&backend, &MemoryStorage::new());

    assert_eq!(
        session.verify_token().await.unwrap_err(),
        SessionError::NotAuthenticated
    );
}

#[tokio::test(start_paused = true)]
async fn status_counts_down_from_the_wall_clock() -> Result<()> {
    let backend = Arc::new(MockBackend::default());
    let session = session_with(&backend, &MemoryStorage::new());

    session.adopt_credentials(TokenGrant::new("a", None, 900));
    tokio::time::advance(Duration::from_secs(100)).await;

    let status = session.status();
    assert!(status.has_tokens);
    assert!(!status.is_expired);
    assert_eq!(status.time_until_expiry, Duration::from_secs(500));
    Ok(())
}
