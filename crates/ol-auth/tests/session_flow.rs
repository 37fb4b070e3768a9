use std::sync::Arc;
use std::time::Duration;

use ol_auth::{
    AuthClient, AuthConfig, AuthError, AuthErrorKind, MemorySecretStore, Outcome, SecretName,
    SecretStore, SessionManager, SessionPhase, SessionState, StoreError,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_for(issuer: &str) -> (SessionManager, MemorySecretStore) {
    let config = AuthConfig::new(
        "overlook.eu.auth0.com",
        "client-123",
        Url::parse("overlookme://callback").unwrap(),
    )
    .unwrap()
    .with_issuer(Url::parse(issuer).unwrap());
    let store = MemorySecretStore::new();
    let manager = SessionManager::new(AuthClient::new(config).unwrap(), Arc::new(store.clone()));
    (manager, store)
}

fn stored(store: &MemorySecretStore, name: SecretName) -> Option<String> {
    store
        .retrieve(name)
        .ok()
        .map(|bytes| String::from_utf8(bytes).unwrap())
}

fn userinfo(sub: &str) -> serde_json::Value {
    json!({
        "sub": sub,
        "email": "ada@example.com",
        "name": "Ada",
        "email_verified": true
    })
}

async fn mount_userinfo(server: &MockServer, bearer: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", format!("Bearer {}", bearer).as_str()))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_with_code_yields_authenticated_profile() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=the-code"))
        .and(body_string_contains("code_verifier=the-verifier"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "id_token": "id-1",
            "refresh_token": "rt-1",
            "expires_in": 86400,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_userinfo(
        &server,
        "at-1",
        ResponseTemplate::new(200).set_body_json(userinfo("auth0|ada")),
    )
    .await;

    let (manager, store) = session_for(&server.uri());
    let profile = manager
        .complete_login_with_code("the-code", "the-verifier", &CancellationToken::new())
        .await
        .unwrap()
        .done()
        .unwrap();

    assert_eq!(profile.subject_id, "auth0|ada");
    let state = manager.state();
    assert!(state.is_authenticated());
    assert_eq!(state.profile().unwrap().subject_id, "auth0|ada");
    assert!(!state.is_loading);
    assert!(state.last_error.is_none());

    assert_eq!(stored(&store, SecretName::AccessToken).as_deref(), Some("at-1"));
    assert_eq!(stored(&store, SecretName::IdToken).as_deref(), Some("id-1"));
    assert_eq!(stored(&store, SecretName::RefreshToken).as_deref(), Some("rt-1"));
    assert_eq!(manager.cached_profile().unwrap(), Some(profile));
}

#[tokio::test]
async fn redirect_flow_sends_pkce_verifier() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("code=abc"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "id_token": "id-1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_userinfo(
        &server,
        "at-1",
        ResponseTemplate::new(200).set_body_json(userinfo("auth0|ada")),
    )
    .await;

    let (manager, store) = session_for(&server.uri());
    store.save(SecretName::RefreshToken, b"stale").unwrap();

    let url = manager.begin_login().await.unwrap();
    let state = url
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .unwrap();

    let outcome = manager
        .handle_redirect(
            &format!("overlookme://callback?code=abc&state={}", state),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Done(_)));
    assert!(manager.state().is_authenticated());
    // no refresh token issued, so the stale one is gone
    assert_eq!(stored(&store, SecretName::RefreshToken), None);
}

#[tokio::test]
async fn redirect_with_wrong_state_is_rejected() {
    let server = MockServer::start().await;
    let (manager, store) = session_for(&server.uri());

    manager.begin_login().await.unwrap();
    let result = manager
        .handle_redirect(
            "overlookme://callback?code=abc&state=forged",
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(AuthError::CallbackStateMismatch)));
    assert_eq!(manager.state(), SessionState::default());
    assert!(store.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unsolicited_redirect_keeps_signed_in_session() {
    let server = MockServer::start().await;
    mount_userinfo(
        &server,
        "at-1",
        ResponseTemplate::new(200).set_body_json(userinfo("auth0|ada")),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let (manager, store) = session_for(&server.uri());
    manager
        .complete_login("at-1", "id-1", Some("rt-1"), &CancellationToken::new())
        .await
        .unwrap();
    let signed_in = manager.state();
    let stored_before = store.len();

    let no_login = manager
        .handle_redirect(
            "overlookme://callback?code=evil&state=x",
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(no_login, Err(AuthError::InvalidRedirect)));

    manager.begin_login().await.unwrap();
    let forged = manager
        .handle_redirect(
            "overlookme://callback?code=evil&state=forged",
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(forged, Err(AuthError::CallbackStateMismatch)));

    assert_eq!(manager.state(), signed_in);
    assert_eq!(store.len(), stored_before);
    assert_eq!(stored(&store, SecretName::RefreshToken).as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn genuine_redirect_still_completes_after_forged_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("code=real"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "id_token": "id-1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_userinfo(
        &server,
        "at-1",
        ResponseTemplate::new(200).set_body_json(userinfo("auth0|ada")),
    )
    .await;

    let (manager, _store) = session_for(&server.uri());
    let url = manager.begin_login().await.unwrap();
    let state = url
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .unwrap();

    let forged = manager
        .handle_redirect(
            "overlookme://callback?code=evil&state=forged",
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(forged, Err(AuthError::CallbackStateMismatch)));

    let outcome = manager
        .handle_redirect(
            &format!("overlookme://callback?code=real&state={}", state),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Done(_)));
    assert!(manager.state().is_authenticated());
}

/// Store that refuses every write
struct ReadOnlyStore {
    inner: MemorySecretStore,
}

impl SecretStore for ReadOnlyStore {
    fn save(&self, _name: SecretName, _bytes: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Write("read-only keychain".to_string()))
    }

    fn retrieve(&self, name: SecretName) -> Result<Vec<u8>, StoreError> {
        self.inner.retrieve(name)
    }

    fn delete(&self, name: SecretName) -> Result<(), StoreError> {
        self.inner.delete(name)
    }
}

#[tokio::test]
async fn login_fails_when_secrets_cannot_be_written() {
    let server = MockServer::start().await;
    mount_userinfo(
        &server,
        "at-1",
        ResponseTemplate::new(200).set_body_json(userinfo("auth0|ada")),
    )
    .await;

    let config = AuthConfig::new(
        "overlook.eu.auth0.com",
        "client-123",
        Url::parse("overlookme://callback").unwrap(),
    )
    .unwrap()
    .with_issuer(Url::parse(&server.uri()).unwrap());
    let manager = SessionManager::new(
        AuthClient::new(config).unwrap(),
        Arc::new(ReadOnlyStore {
            inner: MemorySecretStore::new(),
        }),
    );

    let result = manager
        .complete_login("at-1", "id-1", Some("rt-1"), &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(AuthError::Store(StoreError::Write(_)))
    ));
    let state = manager.state();
    assert_eq!(state.phase, SessionPhase::Unauthenticated);
    assert!(!state.is_loading);
    assert_eq!(state.last_error, Some(AuthErrorKind::StorageWriteFailed));
}

#[tokio::test]
async fn failed_code_exchange_discards_everything() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid authorization code"
        })))
        .mount(&server)
        .await;

    let (manager, store) = session_for(&server.uri());
    let result = manager
        .complete_login_with_code("bad", "verifier", &CancellationToken::new())
        .await;

    match result {
        Err(AuthError::TokenExchangeFailed(reason)) => assert!(reason.contains("invalid_grant")),
        other => panic!("Expected TokenExchangeFailed, got {:?}", other),
    }
    let state = manager.state();
    assert_eq!(state.phase, SessionPhase::Unauthenticated);
    assert_eq!(state.last_error, Some(AuthErrorKind::TokenExchangeFailed));
    assert!(store.is_empty());
}

#[tokio::test]
async fn complete_login_with_rejected_token_reports_profile_failure() {
    let server = MockServer::start().await;
    mount_userinfo(&server, "at-bad", ResponseTemplate::new(401)).await;

    let (manager, store) = session_for(&server.uri());
    let result = manager
        .complete_login("at-bad", "id", Some("rt"), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(AuthError::ProfileFetchFailed(_))));
    assert_eq!(
        manager.state().last_error,
        Some(AuthErrorKind::ProfileFetchFailed)
    );
    assert!(store.is_empty());
}

#[tokio::test]
async fn valid_stored_token_is_authenticated_on_launch() {
    let server = MockServer::start().await;
    mount_userinfo(
        &server,
        "at-1",
        ResponseTemplate::new(200).set_body_json(userinfo("auth0|ada")),
    )
    .await;

    let (manager, store) = session_for(&server.uri());
    store.save(SecretName::AccessToken, b"at-1").unwrap();

    let outcome = manager
        .check_authentication(&CancellationToken::new())
        .await;

    assert_eq!(outcome, Outcome::Done(true));
    assert_eq!(
        manager.state().profile().map(|p| p.subject_id.as_str()),
        Some("auth0|ada")
    );
    assert!(manager.cached_profile().unwrap().is_some());
}

#[tokio::test]
async fn expired_token_is_renewed_with_refresh_token() {
    let server = MockServer::start().await;
    mount_userinfo(&server, "at-old", ResponseTemplate::new(401)).await;
    mount_userinfo(
        &server,
        "at-new",
        ResponseTemplate::new(200).set_body_json(userinfo("auth0|ada")),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-new",
            "expires_in": 86400
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (manager, store) = session_for(&server.uri());
    store.save(SecretName::AccessToken, b"at-old").unwrap();
    store.save(SecretName::IdToken, b"id-1").unwrap();
    store.save(SecretName::RefreshToken, b"rt-1").unwrap();

    let outcome = manager
        .check_authentication(&CancellationToken::new())
        .await;

    assert_eq!(outcome, Outcome::Done(true));
    assert!(manager.state().is_authenticated());
    assert_eq!(stored(&store, SecretName::AccessToken).as_deref(), Some("at-new"));
    // not rotated, not reissued: both kept
    assert_eq!(stored(&store, SecretName::RefreshToken).as_deref(), Some("rt-1"));
    assert_eq!(stored(&store, SecretName::IdToken).as_deref(), Some("id-1"));
}

#[tokio::test]
async fn rotated_refresh_token_replaces_stored_one() {
    let server = MockServer::start().await;
    mount_userinfo(
        &server,
        "at-new",
        ResponseTemplate::new(200).set_body_json(userinfo("auth0|ada")),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-new",
            "refresh_token": "rt-2",
            "expires_in": 86400
        })))
        .mount(&server)
        .await;

    let (manager, store) = session_for(&server.uri());
    store.save(SecretName::RefreshToken, b"rt-1").unwrap();

    let profile = manager
        .renew_credentials(&CancellationToken::new())
        .await
        .unwrap()
        .done()
        .unwrap();

    assert_eq!(profile.subject_id, "auth0|ada");
    assert_eq!(stored(&store, SecretName::RefreshToken).as_deref(), Some("rt-2"));
}

#[tokio::test]
async fn rejected_token_without_refresh_token_logs_out_silently() {
    let server = MockServer::start().await;
    mount_userinfo(&server, "at-old", ResponseTemplate::new(401)).await;

    let (manager, store) = session_for(&server.uri());
    store.save(SecretName::AccessToken, b"at-old").unwrap();

    let outcome = manager
        .check_authentication(&CancellationToken::new())
        .await;

    assert_eq!(outcome, Outcome::Done(false));
    let state = manager.state();
    assert_eq!(state.phase, SessionPhase::Unauthenticated);
    assert!(state.last_error.is_none());
    assert!(!state.is_loading);
    assert!(store.is_empty());
}

#[tokio::test]
async fn rejected_refresh_clears_secrets_without_error() {
    let server = MockServer::start().await;
    mount_userinfo(&server, "at-old", ResponseTemplate::new(401)).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let (manager, store) = session_for(&server.uri());
    store.save(SecretName::AccessToken, b"at-old").unwrap();
    store.save(SecretName::RefreshToken, b"rt-revoked").unwrap();

    let outcome = manager
        .check_authentication(&CancellationToken::new())
        .await;

    assert_eq!(outcome, Outcome::Done(false));
    assert!(manager.state().last_error.is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn unreachable_provider_keeps_secrets_and_reports_network() {
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };

    let (manager, store) = session_for(&uri);
    store.save(SecretName::AccessToken, b"at-1").unwrap();
    store.save(SecretName::RefreshToken, b"rt-1").unwrap();

    let outcome = manager
        .check_authentication(&CancellationToken::new())
        .await;

    assert_eq!(outcome, Outcome::Done(false));
    let state = manager.state();
    assert_eq!(state.phase, SessionPhase::Unauthenticated);
    assert_eq!(state.last_error, Some(AuthErrorKind::Network));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn cancelled_check_restores_prior_state() {
    let server = MockServer::start().await;
    mount_userinfo(
        &server,
        "at-1",
        ResponseTemplate::new(200)
            .set_body_json(userinfo("auth0|ada"))
            .set_delay(Duration::from_secs(10)),
    )
    .await;

    let (manager, store) = session_for(&server.uri());
    store.save(SecretName::AccessToken, b"at-1").unwrap();
    let mut handle = manager.handle();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let observer = tokio::spawn(async move {
        // cancel once the check is visibly in flight
        while let Some(state) = handle.changed().await {
            if state.is_loading {
                trigger.cancel();
                break;
            }
        }
    });

    let outcome = manager.check_authentication(&cancel).await;
    observer.await.unwrap();

    assert_eq!(outcome, Outcome::Cancelled);
    assert_eq!(manager.state(), SessionState::default());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn logout_is_idempotent() {
    let server = MockServer::start().await;
    mount_userinfo(
        &server,
        "at-1",
        ResponseTemplate::new(200).set_body_json(userinfo("auth0|ada")),
    )
    .await;

    let (manager, store) = session_for(&server.uri());
    manager
        .complete_login("at-1", "id-1", Some("rt-1"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(manager.state().is_authenticated());

    manager.logout().await;
    manager.logout().await;

    let state = manager.state();
    assert_eq!(state.phase, SessionPhase::Unauthenticated);
    assert!(state.last_error.is_none());
    assert!(store.is_empty());
    assert!(matches!(
        manager.bearer_token(),
        Err(AuthError::NoStoredCredentials)
    ));
}
