//! HTTP router and handlers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use super::broadcast::ChangeBroadcaster;
use super::protocol::{ProtocolGateway, ProtocolReply};
use crate::auth::oidc::GoogleVerifier;
use crate::auth::request::{error_response, extract_bearer, session_auth_middleware};
use crate::auth::{CredentialDirectory, SessionAuthenticator, token};
use crate::store::ContentStore;

/// Shared application state
pub struct AppState {
    /// Live project state collaborator
    pub store: Arc<dyn ContentStore>,
    /// Request authenticator (session + API-key paths)
    pub auth: Arc<SessionAuthenticator>,
    /// Stateless-per-call MCP dispatcher
    pub protocol: Arc<ProtocolGateway>,
    /// Change fan-out to connected clients
    pub broadcaster: Arc<ChangeBroadcaster>,
    /// Browser login verifier; absent disables the login path
    pub login: Option<Arc<GoogleVerifier>>,
    /// Credential directory for resolving verified logins
    pub directory: Option<Arc<CredentialDirectory>>,
    /// Lifetime of issued session tokens
    pub session_ttl: Duration,
    /// Flips true once the orchestrator finished initializing
    pub ready: Arc<AtomicBool>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = Arc::clone(&state.auth);

    Router::new()
        .route("/api/auth/status", get(auth_status_handler))
        .route("/api/auth/google", post(google_login_handler))
        .route("/api/tasks", get(tasks_handler))
        .route("/api/config", get(config_get_handler).put(config_put_handler))
        .route("/mcp", post(mcp_handler))
        .route("/ws", get(ws_handler))
        .fallback(not_found_handler)
        // Authentication middleware (applied before other layers)
        .layer(middleware::from_fn_with_state(auth, session_auth_middleware))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/auth/status (public): tells the browser which login flows exist.
async fn auth_status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "authEnabled": state.auth.enabled(),
        "loginEnabled": state.login.is_some(),
    }))
}

/// Login request body: the Google ID token obtained by the browser.
#[derive(Debug, Deserialize)]
struct GoogleLoginRequest {
    credential: String,
}

/// POST /api/auth/google (public): exchange a Google ID token for a session
/// token. The verified email must still resolve in the credential
/// directory; Google vouching for an address does not make it a user.
async fn google_login_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GoogleLoginRequest>,
) -> Response {
    let Some(verifier) = &state.login else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "login disabled");
    };

    let login = match verifier.verify(&body.credential).await {
        Ok(login) => login,
        Err(e) => {
            warn!(error = %e, "Google ID token rejected");
            return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    };

    let identity = state
        .directory
        .as_ref()
        .and_then(|directory| directory.find_by_email(&login.email));
    let Some(identity) = identity else {
        warn!(email = %login.email, "Verified login for unknown user");
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
    };

    let session = token::sign(&identity, state.auth.secret().as_bytes(), state.session_ttl);
    info!(email = %identity.email, "Session issued");
    Json(json!({
        "token": session,
        "user": {
            "email": identity.email,
            "name": identity.name,
            "role": identity.role,
        }
    }))
    .into_response()
}

/// GET /api/tasks
async fn tasks_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.tasks().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// GET /api/config
async fn config_get_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.config().await {
        Ok(config) => Json(config).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// PUT /api/config
async fn config_put_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    match state.store.write_config(body).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// Query parameters accepted by the MCP endpoint.
#[derive(Debug, Deserialize)]
struct McpQuery {
    /// API-key fallback for clients that cannot set headers
    #[serde(default)]
    token: Option<String>,
}

/// POST /mcp: the protocol endpoint.
async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<McpQuery>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    if !state.ready.load(Ordering::SeqCst) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "initializing");
    }

    // Bearer header first, ?token= fallback second
    let credential = extract_bearer(request.headers())
        .map(str::to_owned)
        .or(query.token);

    let body_bytes = match axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return rpc_parse_error(format!("Failed to read body: {e}"));
        }
    };

    let request_value: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            return rpc_parse_error(format!("Invalid JSON: {e}"));
        }
    };

    match state
        .protocol
        .handle(&state.auth, credential.as_deref(), &request_value)
        .await
    {
        ProtocolReply::Reply(response) => {
            (StatusCode::OK, Json(serde_json::to_value(response).unwrap_or(Value::Null)))
                .into_response()
        }
        ProtocolReply::Accepted => (StatusCode::ACCEPTED, Json(json!({}))).into_response(),
        ProtocolReply::Unauthorized(message) => {
            error_response(StatusCode::UNAUTHORIZED, message)
        }
        ProtocolReply::BadRequest(response) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::to_value(response).unwrap_or(Value::Null)),
        )
            .into_response(),
    }
}

/// GET /ws: WebSocket upgrade for change notifications.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let broadcaster = Arc::clone(&state.broadcaster);
    upgrade.on_upgrade(move |socket| client_connection(socket, broadcaster))
}

/// Pump change signals into one WebSocket until either side closes.
async fn client_connection(mut socket: WebSocket, broadcaster: Arc<ChangeBroadcaster>) {
    let (id, mut signals) = broadcaster.register();
    debug!(connection = %id, "WebSocket client connected");

    loop {
        tokio::select! {
            signal = signals.recv() => {
                match signal {
                    Some(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Sender dropped: broadcaster closed us (shutdown)
                    None => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    // Clients only listen on this channel; ignore chatter
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    broadcaster.unregister(id);
    debug!(connection = %id, "WebSocket client disconnected");
}

/// Fallback for unknown paths.
async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

/// 500 with a generic body; the detail stays in server logs only.
fn internal_error(e: &crate::Error) -> Response {
    error!(error = %e, "Request handling failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

/// 400 carrying a JSON-RPC parse error body.
fn rpc_parse_error(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "jsonrpc": "2.0",
            "error": {"code": -32700, "message": message},
            "id": null
        })),
    )
        .into_response()
}
