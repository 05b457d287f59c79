//! Request authentication and route classification.
//!
//! Supports:
//! - Signed session tokens for the browser UI (bearer header)
//! - Static API keys for agent/MCP clients
//! - Public paths that bypass authentication
//! - Read-only enforcement for the viewer role on mutating methods
//!
//! Authentication resolves here, before any business handler runs: a denied
//! request never reaches the route handler, so no side effect or data read
//! can happen ahead of the authorization check.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::{CredentialDirectory, Identity, Role, token};
use crate::config::{AuthConfig, SessionSecret};

/// Namespace of routes that require authentication.
const PROTECTED_PREFIX: &str = "/api/";

/// HTTP methods that mutate state. Note this is the write set, not merely
/// "anything but GET": HEAD and OPTIONS stay readable for viewers.
const WRITE_METHODS: [Method; 4] = [Method::POST, Method::PUT, Method::PATCH, Method::DELETE];

/// Outcome of classifying one request.
#[derive(Debug)]
pub enum AuthDecision {
    /// Let the request through, optionally carrying a resolved identity.
    Pass(Option<Identity>),
    /// Reject before any handler runs.
    Deny {
        /// HTTP status to return (401 or 403)
        status: StatusCode,
        /// Short error string for the JSON body
        error: &'static str,
    },
}

/// Classifies inbound requests and resolves bearer credentials.
pub struct SessionAuthenticator {
    /// Whether auth is enforced at all
    enabled: bool,
    /// Session token signing secret
    secret: SessionSecret,
    /// Paths that bypass authentication
    public_paths: Vec<String>,
    /// API-key lookups; absent when no credential repository is configured
    directory: Option<Arc<CredentialDirectory>>,
}

impl SessionAuthenticator {
    /// Build from config plus the resolved secret and optional directory.
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        secret: SessionSecret,
        directory: Option<Arc<CredentialDirectory>>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            secret,
            public_paths: config.public_paths.clone(),
            directory,
        }
    }

    /// Whether authentication is enforced.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The signing secret, for issuing session tokens at login.
    #[must_use]
    pub fn secret(&self) -> &SessionSecret {
        &self.secret
    }

    /// Check if a path bypasses authentication.
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p))
    }

    /// Classify an HTTP request on the session-token path.
    ///
    /// Pure decision logic: no side effects, all outcomes observable. The
    /// 401 body never distinguishes a missing credential from an invalid
    /// one; the distinction only appears in server logs.
    #[must_use]
    pub fn check_http(&self, method: &Method, path: &str, bearer: Option<&str>) -> AuthDecision {
        if !self.enabled || self.is_public_path(path) || !path.starts_with(PROTECTED_PREFIX) {
            return AuthDecision::Pass(None);
        }

        let Some(bearer) = bearer else {
            warn!(path = %path, "Missing bearer credential");
            return AuthDecision::Deny {
                status: StatusCode::UNAUTHORIZED,
                error: "unauthorized",
            };
        };

        let claims = match token::verify(bearer, self.secret.as_bytes()) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(path = %path, reason = %e, "Session token rejected");
                return AuthDecision::Deny {
                    status: StatusCode::UNAUTHORIZED,
                    error: "unauthorized",
                };
            }
        };

        let identity = Identity {
            email: claims.email,
            name: claims.name,
            role: claims.role,
            api_key: None,
        };

        if identity.role == Role::Viewer && WRITE_METHODS.contains(method) {
            warn!(path = %path, email = %identity.email, "Viewer attempted mutating method");
            return AuthDecision::Deny {
                status: StatusCode::FORBIDDEN,
                error: "forbidden",
            };
        }

        debug!(path = %path, email = %identity.email, "Authenticated request");
        AuthDecision::Pass(Some(identity))
    }

    /// Resolve an identity on the API-key path (MCP surface).
    ///
    /// Returns `Ok(None)` when auth is disabled, `Err` with the uniform 401
    /// body text for a missing or unknown key, and `Ok(Some(identity))` for
    /// a known key. No read/write distinction is enforced here; tool
    /// filtering happens downstream.
    pub fn api_identity(&self, credential: Option<&str>) -> Result<Option<Identity>, &'static str> {
        if !self.enabled {
            return Ok(None);
        }

        let Some(key) = credential else {
            warn!("MCP request without API key");
            return Err("unauthorized");
        };

        let Some(directory) = &self.directory else {
            warn!("MCP request but no credential directory configured");
            return Err("unauthorized");
        };

        match directory.find_by_api_key(key) {
            Some(identity) => {
                debug!(email = %identity.email, "MCP caller authenticated");
                Ok(Some(identity))
            }
            None => {
                warn!("Unknown API key on MCP request");
                Err("unauthorized")
            }
        }
    }
}

/// Extract a bearer credential from an `Authorization` header.
#[must_use]
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
}

/// Build a JSON error response with the given status.
#[must_use]
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Authentication middleware for the REST surface.
pub async fn session_auth_middleware(
    State(auth): State<Arc<SessionAuthenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let bearer = extract_bearer(request.headers()).map(str::to_owned);
    let decision = auth.check_http(
        request.method(),
        request.uri().path(),
        bearer.as_deref(),
    );

    match decision {
        AuthDecision::Pass(identity) => {
            if let Some(identity) = identity {
                request.extensions_mut().insert(identity);
            }
            next.run(request).await
        }
        AuthDecision::Deny { status, error } => error_response(status, error),
    }
}
