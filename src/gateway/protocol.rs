//! Protocol gateway: the MCP dispatch path.
//!
//! Every inbound call gets the full treatment from scratch: resolve the
//! caller's role off its API key, filter the tool registry for that role,
//! build a throwaway [`ScopedServer`] over the filtered set, dispatch, and
//! drop the server. No state crosses calls, so one caller's capability set
//! can never leak into a concurrent caller's dispatch.

use serde_json::Value;
use tracing::debug;

use crate::auth::SessionAuthenticator;
use crate::capability::scoped_tools;
use crate::error::rpc_codes;
use crate::mcp::{JsonRpcResponse, RequestId, ScopedServer};
use crate::registry::{PromptRegistry, ResourceRegistry, ToolRegistry};

/// Outcome of one protocol call.
#[derive(Debug)]
pub enum ProtocolReply {
    /// JSON-RPC response body to return with 200
    Reply(JsonRpcResponse),
    /// Notification accepted, no body (202)
    Accepted,
    /// Caller failed API-key authentication (401), uniform body text
    Unauthorized(&'static str),
    /// Request was not parseable JSON-RPC (400)
    BadRequest(JsonRpcResponse),
}

/// Stateless-per-call MCP dispatcher.
pub struct ProtocolGateway {
    tools: ToolRegistry,
    resources: ResourceRegistry,
    prompts: PromptRegistry,
}

impl ProtocolGateway {
    /// Create a gateway over the master registries.
    #[must_use]
    pub fn new(
        tools: ToolRegistry,
        resources: ResourceRegistry,
        prompts: PromptRegistry,
    ) -> Self {
        Self {
            tools,
            resources,
            prompts,
        }
    }

    /// Handle one raw protocol request.
    ///
    /// `credential` is the bearer API key (or `?token=` fallback) if the
    /// caller sent one.
    pub async fn handle(
        &self,
        auth: &SessionAuthenticator,
        credential: Option<&str>,
        request: &Value,
    ) -> ProtocolReply {
        // Resolve the caller before touching the request body.
        let identity = match auth.api_identity(credential) {
            Ok(identity) => identity,
            Err(message) => return ProtocolReply::Unauthorized(message),
        };
        let role = identity.as_ref().map(|i| i.role);

        let (id, method, params) = match parse_request(request) {
            Ok(parsed) => parsed,
            Err(response) => return ProtocolReply::BadRequest(response),
        };

        // Notifications carry no id and expect no response.
        if method.starts_with("notifications/") {
            debug!(notification = %method, "Protocol notification accepted");
            return ProtocolReply::Accepted;
        }
        let id = id.expect("id checked by parse_request for non-notifications");

        // Fresh scoped server per call: tools filtered by role, resources
        // and prompts served unfiltered.
        let server = ScopedServer::new(
            scoped_tools(&self.tools, role),
            self.resources.clone(),
            self.prompts.clone(),
        );
        let response = server.handle(id, &method, params.as_ref()).await;
        ProtocolReply::Reply(response)
    }
}

/// Parse a JSON-RPC request or notification.
/// Returns `(Option<RequestId>, method, params)`; id is `None` only for
/// notifications.
#[allow(clippy::result_large_err)] // JsonRpcResponse used directly as the error body
fn parse_request(
    value: &Value,
) -> Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    let jsonrpc = value.get("jsonrpc").and_then(Value::as_str);
    if jsonrpc != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    let id = value.get("id").and_then(extract_request_id);

    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method")
        })?;

    let params = value.get("params").cloned();

    if !method.starts_with("notifications/") && id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), params))
}

/// Extract a `RequestId` from a JSON value (string or integer per the
/// JSON-RPC 2.0 spec).
fn extract_request_id(value: &Value) -> Option<RequestId> {
    if let Some(s) = value.as_str() {
        Some(RequestId::String(s.to_string()))
    } else if let Some(n) = value.as_i64() {
        Some(RequestId::Number(n))
    } else {
        None
    }
}
