//! End-to-end authentication tests
//!
//! Tests the full auth flow including:
//! - Session token issue and verification
//! - Credential directory resolution
//! - Route classification and role enforcement
//! - API-key resolution for the protocol surface

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};

use steward_gateway::auth::{
    AuthDecision, CredentialDirectory, Identity, Role, SessionAuthenticator, sign, verify,
};
use steward_gateway::config::{AuthConfig, SessionSecret};

const USERS_DOC: &str = "\
---
users:
  - email: ada@example.com
    name: Ada Admin
    role: admin
    apiKey: agent-key-ada
  - email: vic@example.com
    name: Vic Viewer
    role: viewer
    apiKey: agent-key-vic
---
";

async fn directory() -> (tempfile::TempDir, Arc<CredentialDirectory>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.md");
    std::fs::write(&path, USERS_DOC).unwrap();
    let directory = Arc::new(CredentialDirectory::new(path));
    directory.load().await.unwrap();
    (dir, directory)
}

fn authenticator(directory: Option<Arc<CredentialDirectory>>) -> SessionAuthenticator {
    SessionAuthenticator::new(
        &AuthConfig {
            enabled: true,
            ..AuthConfig::default()
        },
        SessionSecret::Configured("integration-secret".to_string()),
        directory,
    )
}

fn identity(role: Role) -> Identity {
    Identity {
        email: "ada@example.com".to_string(),
        name: "Ada Admin".to_string(),
        role,
        api_key: None,
    }
}

/// Signed tokens round-trip through verification until their TTL elapses.
#[test]
fn session_token_round_trip() {
    let token = sign(
        &identity(Role::Admin),
        b"integration-secret",
        Duration::from_secs(3600),
    );
    let claims = verify(&token, b"integration-secret").unwrap();
    assert_eq!(claims.email, "ada@example.com");
    assert_eq!(claims.role, Role::Admin);
}

/// A token signed under one secret never verifies under another.
#[test]
fn session_token_cross_secret_rejection() {
    let token = sign(&identity(Role::Admin), b"secret-a", Duration::from_secs(3600));
    assert!(verify(&token, b"secret-b").is_err());
}

/// The full browser flow: issue a token, present it on a protected route.
#[test]
fn issued_token_authenticates_requests() {
    let auth = authenticator(None);
    let token = sign(
        &identity(Role::Admin),
        auth.secret().as_bytes(),
        Duration::from_secs(3600),
    );

    let decision = auth.check_http(&Method::PUT, "/api/config", Some(&token));
    match decision {
        AuthDecision::Pass(Some(identity)) => {
            assert_eq!(identity.email, "ada@example.com");
            assert_eq!(identity.role, Role::Admin);
        }
        other => panic!("expected pass with identity, got {other:?}"),
    }
}

/// Viewers read but never write; admins do both.
#[test]
fn role_enforcement_on_protected_routes() {
    let auth = authenticator(None);
    let viewer = sign(
        &identity(Role::Viewer),
        auth.secret().as_bytes(),
        Duration::from_secs(3600),
    );

    assert!(matches!(
        auth.check_http(&Method::GET, "/api/tasks", Some(&viewer)),
        AuthDecision::Pass(Some(_))
    ));
    assert!(matches!(
        auth.check_http(&Method::POST, "/api/tasks", Some(&viewer)),
        AuthDecision::Deny {
            status: StatusCode::FORBIDDEN,
            ..
        }
    ));
    assert!(matches!(
        auth.check_http(&Method::DELETE, "/api/tasks", Some(&viewer)),
        AuthDecision::Deny {
            status: StatusCode::FORBIDDEN,
            ..
        }
    ));
}

/// Missing and invalid credentials produce the same 401 error body.
#[test]
fn unauthorized_responses_do_not_leak_the_reason() {
    let auth = authenticator(None);

    let missing = auth.check_http(&Method::GET, "/api/tasks", None);
    let invalid = auth.check_http(&Method::GET, "/api/tasks", Some("bogus"));

    let (AuthDecision::Deny { error: a, .. }, AuthDecision::Deny { error: b, .. }) =
        (missing, invalid)
    else {
        panic!("expected two denials");
    };
    assert_eq!(a, b);
}

/// API keys resolve identities from the credential directory.
#[tokio::test]
async fn api_key_resolution() {
    let (_guard, directory) = directory().await;
    let auth = authenticator(Some(directory));

    let admin = auth.api_identity(Some("agent-key-ada")).unwrap().unwrap();
    assert_eq!(admin.role, Role::Admin);

    let viewer = auth.api_identity(Some("agent-key-vic")).unwrap().unwrap();
    assert_eq!(viewer.role, Role::Viewer);

    assert!(auth.api_identity(Some("unknown-key")).is_err());
    assert!(auth.api_identity(Some("")).is_err());
    assert!(auth.api_identity(None).is_err());
}

/// Directory lookups are case-insensitive on email, exact on key.
#[tokio::test]
async fn directory_lookup_semantics() {
    let (_guard, directory) = directory().await;

    assert!(directory.find_by_email("ADA@EXAMPLE.COM").is_some());
    assert!(directory.find_by_email("Ada@Example.com").is_some());
    assert!(directory.find_by_api_key("AGENT-KEY-ADA").is_none());
    assert_eq!(directory.list_all().len(), 2);
}
