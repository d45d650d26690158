// Integration tests for the session lifecycle
//
// These tests run the session manager against a mock API: sign-in,
// registration, refresh, expiry checks and restoring a persisted token.

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;

use projecthub_client::auth::token::{decode_expiry_millis, unsigned_expiring_in};
use projecthub_client::auth::{
    FileTokenStore, MemoryTokenStore, Registration, SessionManager, SessionSnapshot, TokenStore,
};
use projecthub_client::error::SessionError;

// ==================================================================================================
// Test Helpers
// ==================================================================================================

fn api_url(server: &ServerGuard) -> String {
    format!("{}/api", server.url())
}

fn manager_for(server: &ServerGuard, store: Arc<dyn TokenStore>) -> SessionManager {
    SessionManager::new(api_url(server), store, 300, 5, 10).expect("Failed to create session manager")
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

fn token_body(token: &str) -> String {
    json!({ "access_token": token, "token_type": "bearer" }).to_string()
}

fn profile_body() -> String {
    json!({
        "id": 42,
        "email": "ada@example.com",
        "first_name": "Ada",
        "last_name": "Lovelace"
    })
    .to_string()
}

// ==================================================================================================
// Sign-in Tests
// ==================================================================================================

#[tokio::test]
async fn test_sign_in_success() {
    let mut server = Server::new_async().await;
    let token = unsigned_expiring_in(3600, "ada@example.com");

    let token_mock = server
        .mock("POST", "/api/auth/token")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("username".into(), "ada@example.com".into()),
            Matcher::UrlEncoded("password".into(), "correct horse".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body(&token))
        .expect(1)
        .create_async()
        .await;

    let profile_mock = server
        .mock("GET", "/api/auth/me")
        .match_header("authorization", format!("Bearer {}", token).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(profile_body())
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let manager = manager_for(&server, store.clone());

    manager
        .sign_in("ada@example.com", "correct horse")
        .await
        .expect("sign-in should succeed");

    assert!(manager.is_authenticated().await);
    assert_eq!(manager.token().await, Some(token.clone()));
    assert_eq!(
        manager.expires_at_millis().await,
        Some(decode_expiry_millis(&token).unwrap())
    );
    assert_eq!(store.peek(), Some(token));

    let user = manager.user().await.expect("profile should be loaded");
    assert_eq!(user.id, "42");
    assert_eq!(user.display_name(), "Ada Lovelace");

    token_mock.assert_async().await;
    profile_mock.assert_async().await;
}

#[tokio::test]
async fn test_sign_in_profile_failure_is_not_fatal() {
    let mut server = Server::new_async().await;
    let token = unsigned_expiring_in(3600, "ada@example.com");

    server
        .mock("POST", "/api/auth/token")
        .with_status(200)
        .with_body(token_body(&token))
        .create_async()
        .await;
    server
        .mock("GET", "/api/auth/me")
        .with_status(500)
        .with_body(r#"{"detail": "database unavailable"}"#)
        .create_async()
        .await;

    let manager = manager_for(&server, Arc::new(MemoryTokenStore::new()));
    manager.sign_in("ada@example.com", "pw").await.unwrap();

    assert!(manager.is_authenticated().await);
    assert_eq!(manager.user().await, None);

    let err = manager.fetch_profile().await.unwrap_err();
    assert!(matches!(err, SessionError::ProfileFetchFailed(_)));
}

#[tokio::test]
async fn test_sign_in_rejected_leaves_state_untouched() {
    let mut server = Server::new_async().await;
    let existing = unsigned_expiring_in(3600, "grace@example.com");

    server
        .mock("POST", "/api/auth/token")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail": "Incorrect email or password"}"#)
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::with_token(existing.clone()));
    let manager = manager_for(&server, store.clone());
    assert!(manager.initialize().await);
    let before = manager.snapshot().await;

    let err = manager.sign_in("ada@example.com", "wrong").await.unwrap_err();

    match err {
        SessionError::InvalidCredential(message) => {
            assert_eq!(message, "Incorrect email or password")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(manager.snapshot().await, before);
    assert_eq!(store.peek(), Some(existing));
}

#[tokio::test]
async fn test_sign_in_rejected_without_detail() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/auth/token")
        .with_status(400)
        .with_body("not json")
        .create_async()
        .await;

    let manager = manager_for(&server, Arc::new(MemoryTokenStore::new()));
    let err = manager.sign_in("ada@example.com", "pw").await.unwrap_err();

    assert!(matches!(err, SessionError::InvalidCredential(ref m) if m == "Failed to sign in"));
    assert_eq!(manager.snapshot().await, SessionSnapshot::default());
}

#[tokio::test]
async fn test_sign_in_server_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/auth/token")
        .with_status(503)
        .with_body(r#"{"detail": "maintenance"}"#)
        .create_async()
        .await;

    let manager = manager_for(&server, Arc::new(MemoryTokenStore::new()));
    let err = manager.sign_in("ada@example.com", "pw").await.unwrap_err();

    assert!(matches!(err, SessionError::Api { status: 503, ref message } if message == "maintenance"));
    assert!(!manager.is_authenticated().await);
}

#[tokio::test]
async fn test_sign_in_with_undecodable_token() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/auth/token")
        .with_status(200)
        .with_body(token_body("opaque-session-id"))
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let manager = manager_for(&server, store.clone());
    let err = manager.sign_in("ada@example.com", "pw").await.unwrap_err();

    assert!(matches!(err, SessionError::MalformedToken(_)));
    assert!(!manager.is_authenticated().await);
    assert_eq!(store.peek(), None);
}

// ==================================================================================================
// Registration Tests
// ==================================================================================================

fn registration() -> Registration {
    Registration {
        email: "ada@example.com".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        password: "correct horse".to_string(),
    }
}

#[tokio::test]
async fn test_register_success() {
    let mut server = Server::new_async().await;
    let token = unsigned_expiring_in(3600, "ada@example.com");

    let register_mock = server
        .mock("POST", "/api/auth/register")
        .match_body(Matcher::Json(json!({
            "email": "ada@example.com",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "password": "correct horse"
        })))
        .with_status(201)
        .with_body(token_body(&token))
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/api/auth/me")
        .with_status(200)
        .with_body(profile_body())
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let manager = manager_for(&server, store.clone());
    manager.register(&registration()).await.unwrap();

    assert!(manager.is_authenticated().await);
    assert_eq!(store.peek(), Some(token));
    assert_eq!(manager.user().await.unwrap().email, "ada@example.com");
    register_mock.assert_async().await;
}

#[tokio::test]
async fn test_register_validation_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/auth/register")
        .with_status(422)
        .with_body(
            r#"{"detail": [{"loc": ["body", "email"], "msg": "value is not a valid email address"},
                           {"loc": ["body", "password"], "msg": "password too short"}]}"#,
        )
        .create_async()
        .await;

    let manager = manager_for(&server, Arc::new(MemoryTokenStore::new()));
    let err = manager.register(&registration()).await.unwrap_err();

    match err {
        SessionError::ValidationError(message) => assert_eq!(
            message,
            "value is not a valid email address; password too short"
        ),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(manager.snapshot().await, SessionSnapshot::default());
}

#[tokio::test]
async fn test_register_email_taken() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/auth/register")
        .with_status(400)
        .with_body(r#"{"detail": "Email already registered"}"#)
        .create_async()
        .await;

    let manager = manager_for(&server, Arc::new(MemoryTokenStore::new()));
    let err = manager.register(&registration()).await.unwrap_err();

    assert_eq!(err.user_message(), "Email already registered");
}

// ==================================================================================================
// Refresh Tests
// ==================================================================================================

#[tokio::test]
async fn test_refresh_replaces_token() {
    let mut server = Server::new_async().await;
    let old_token = unsigned_expiring_in(900, "ada@example.com");
    let new_token = unsigned_expiring_in(3600, "ada@example.com");

    let refresh_mock = server
        .mock("POST", "/api/auth/token")
        .match_header("authorization", format!("Bearer {}", old_token).as_str())
        .with_status(200)
        .with_body(token_body(&new_token))
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::with_token(old_token));
    let manager = manager_for(&server, store.clone());
    manager.initialize().await;

    manager.refresh_token().await.unwrap();

    assert_eq!(manager.token().await, Some(new_token.clone()));
    assert_eq!(
        manager.expires_at_millis().await,
        Some(decode_expiry_millis(&new_token).unwrap())
    );
    assert_eq!(store.peek(), Some(new_token));
    refresh_mock.assert_async().await;
}

#[tokio::test]
async fn test_refresh_denied_signs_out() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/auth/token")
        .with_status(401)
        .with_body(r#"{"detail": "Token has been revoked"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::with_token(unsigned_expiring_in(900, "ada")));
    let manager = manager_for(&server, store.clone());
    manager.initialize().await;
    let authenticated = manager.subscribe();

    let err = manager.refresh_token().await.unwrap_err();

    assert!(matches!(err, SessionError::RefreshDenied(ref m) if m == "Token has been revoked"));
    assert!(err.requires_sign_in());
    assert_eq!(manager.snapshot().await, SessionSnapshot::default());
    assert_eq!(store.peek(), None);
    assert!(!*authenticated.borrow());
}

#[tokio::test]
async fn test_refresh_with_malformed_token_signs_out() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/auth/token")
        .with_status(200)
        .with_body(r#"{"token_type": "bearer"}"#)
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::with_token(unsigned_expiring_in(900, "ada")));
    let manager = manager_for(&server, store.clone());
    manager.initialize().await;

    let err = manager.refresh_token().await.unwrap_err();

    assert!(matches!(err, SessionError::MalformedToken(_)));
    assert!(!manager.is_authenticated().await);
    assert_eq!(store.peek(), None);
}

// ==================================================================================================
// Expiry Check Tests
// ==================================================================================================

#[tokio::test]
async fn test_check_expiration_refreshes_near_expiry() {
    let mut server = Server::new_async().await;
    let near_expiry = unsigned_expiring_in(60, "ada");
    let new_token = unsigned_expiring_in(3600, "ada");

    server
        .mock("POST", "/api/auth/token")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(token_body(&near_expiry))
        .create_async()
        .await;
    let refresh_mock = server
        .mock("POST", "/api/auth/token")
        .match_header("authorization", bearer(&near_expiry).as_str())
        .with_status(200)
        .with_body(token_body(&new_token))
        .expect(1)
        .create_async()
        .await;

    let manager = manager_for(&server, Arc::new(MemoryTokenStore::new()));
    manager.sign_in("ada@example.com", "pw").await.unwrap();
    assert_eq!(manager.token().await, Some(near_expiry));

    assert!(manager.check_expiration().await.unwrap());
    assert_eq!(manager.token().await, Some(new_token));

    // The fresh token is far from expiry, so a second check does nothing
    assert!(!manager.check_expiration().await.unwrap());
    refresh_mock.assert_async().await;
}

#[tokio::test]
async fn test_initialize_refreshes_token_near_expiry() {
    let mut server = Server::new_async().await;
    let stored = unsigned_expiring_in(60, "ada");
    let new_token = unsigned_expiring_in(3600, "ada");

    let refresh_mock = server
        .mock("POST", "/api/auth/token")
        .match_header("authorization", bearer(&stored).as_str())
        .with_status(200)
        .with_body(token_body(&new_token))
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::with_token(stored));
    let manager = manager_for(&server, store.clone());

    assert!(manager.initialize().await);
    assert_eq!(manager.token().await, Some(new_token.clone()));
    assert_eq!(store.peek(), Some(new_token));
    refresh_mock.assert_async().await;
}

#[tokio::test]
async fn test_initialize_signs_out_when_restore_refresh_fails() {
    let mut server = Server::new_async().await;
    let refresh_mock = server
        .mock("POST", "/api/auth/token")
        .with_status(401)
        .with_body(r#"{"detail": "Token has been revoked"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::with_token(unsigned_expiring_in(60, "ada")));
    let manager = manager_for(&server, store.clone());

    assert!(!manager.initialize().await);
    assert_eq!(manager.snapshot().await, SessionSnapshot::default());
    assert_eq!(store.peek(), None);
    assert!(!*manager.subscribe().borrow());
    refresh_mock.assert_async().await;
}

#[tokio::test]
async fn test_check_expiration_leaves_fresh_token_alone() {
    let mut server = Server::new_async().await;
    let refresh_mock = server
        .mock("POST", "/api/auth/token")
        .expect(0)
        .create_async()
        .await;

    let token = unsigned_expiring_in(3600, "ada");
    let manager = manager_for(&server, Arc::new(MemoryTokenStore::with_token(token.clone())));
    manager.initialize().await;

    assert!(!manager.check_expiration().await.unwrap());
    assert_eq!(manager.token().await, Some(token));
    refresh_mock.assert_async().await;
}

// ==================================================================================================
// Persistence Tests
// ==================================================================================================

#[tokio::test]
async fn test_session_survives_restart_with_file_store() {
    let mut server = Server::new_async().await;
    let token = unsigned_expiring_in(3600, "ada@example.com");

    server
        .mock("POST", "/api/auth/token")
        .with_status(200)
        .with_body(token_body(&token))
        .create_async()
        .await;
    server
        .mock("GET", "/api/auth/me")
        .with_status(200)
        .with_body(profile_body())
        .expect(2)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("projecthub").join("session.json");

    {
        let manager = manager_for(&server, Arc::new(FileTokenStore::new(&path)));
        manager.sign_in("ada@example.com", "pw").await.unwrap();
    }

    let restored = manager_for(&server, Arc::new(FileTokenStore::new(&path)));
    assert!(restored.initialize().await);
    assert_eq!(restored.token().await, Some(token));
    assert_eq!(restored.user().await.unwrap().email, "ada@example.com");

    restored.sign_out().await;
    assert!(!path.exists());

    let after_sign_out = manager_for(&server, Arc::new(FileTokenStore::new(&path)));
    assert!(!after_sign_out.initialize().await);
}
