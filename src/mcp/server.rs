//! Per-call scoped protocol server.
//!
//! [`ScopedServer`] is a throwaway: the gateway constructs one for every
//! inbound protocol call, registered only with the caller's filtered
//! capability set, and drops it after dispatch. A shared long-lived server
//! would let one caller's filtered tool set leak into a concurrent caller's
//! call; building a fresh instance per call buys perfect isolation for the
//! cost of a small allocation, without locks.
//!
//! A tool name that was filtered out never reaches this type, so a caller
//! cannot distinguish "exists but forbidden" from "does not exist"; both
//! surface as the same unknown-tool protocol error.

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::debug;

use super::{JsonRpcResponse, PROTOCOL_VERSION, RequestId};
use crate::error::rpc_codes;
use crate::registry::{PromptRegistry, ResourceRegistry, ToolDescriptor};

/// An ephemeral protocol server bound to one call's capability set.
pub struct ScopedServer {
    tools: Vec<ToolDescriptor>,
    tool_index: HashMap<String, usize>,
    resources: ResourceRegistry,
    prompts: PromptRegistry,
}

impl ScopedServer {
    /// Build a server scoped to the given (already filtered) tool set.
    /// Resources and prompts are served unfiltered.
    #[must_use]
    pub fn new(
        tools: Vec<ToolDescriptor>,
        resources: ResourceRegistry,
        prompts: PromptRegistry,
    ) -> Self {
        let tool_index = tools
            .iter()
            .enumerate()
            .map(|(slot, tool)| (tool.definition.name.clone(), slot))
            .collect();
        Self {
            tools,
            tool_index,
            resources,
            prompts,
        }
    }

    /// Dispatch one parsed JSON-RPC request.
    pub async fn handle(
        &self,
        id: RequestId,
        method: &str,
        params: Option<&Value>,
    ) -> JsonRpcResponse {
        debug!(method = %method, tools = self.tools.len(), "Scoped dispatch");
        match method {
            "initialize" => self.handle_initialize(id),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, params).await,
            "resources/list" => self.handle_resources_list(id),
            "resources/read" => self.handle_resources_read(id, params).await,
            "prompts/list" => self.handle_prompts_list(id),
            "prompts/get" => self.handle_prompts_get(id, params).await,
            _ => JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ),
        }
    }

    fn handle_initialize(&self, id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {},
                    "prompts": {}
                },
                "serverInfo": {
                    "name": "steward-gateway",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| serde_json::to_value(&t.definition).unwrap_or(Value::Null))
            .collect();
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
        let name = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let arguments = params
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        let Some(&slot) = self.tool_index.get(name) else {
            return JsonRpcResponse::error(
                Some(id),
                rpc_codes::INVALID_PARAMS,
                format!("Unknown tool: {name}"),
            );
        };

        match (self.tools[slot].handler)(arguments).await {
            Ok(result) => JsonRpcResponse::success(
                id,
                json!({
                    "content": [{
                        "type": "text",
                        "text": serde_json::to_string(&result).unwrap_or_default()
                    }],
                    "isError": false
                }),
            ),
            Err(e) => JsonRpcResponse::error(Some(id), e.to_rpc_code(), e.to_string()),
        }
    }

    fn handle_resources_list(&self, id: RequestId) -> JsonRpcResponse {
        let resources: Vec<Value> = self
            .resources
            .all()
            .iter()
            .map(|r| serde_json::to_value(&r.definition).unwrap_or(Value::Null))
            .collect();
        JsonRpcResponse::success(id, json!({ "resources": resources }))
    }

    async fn handle_resources_read(
        &self,
        id: RequestId,
        params: Option<&Value>,
    ) -> JsonRpcResponse {
        let uri = params
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
            .unwrap_or("");

        let Some(resource) = self.resources.get(uri).cloned() else {
            return JsonRpcResponse::error(
                Some(id),
                rpc_codes::INVALID_PARAMS,
                format!("Unknown resource: {uri}"),
            );
        };

        match (resource.handler)(json!({ "uri": uri })).await {
            Ok(text) => JsonRpcResponse::success(
                id,
                json!({
                    "contents": [{
                        "uri": uri,
                        "mimeType": resource.definition.mime_type,
                        "text": text_of(&text)
                    }]
                }),
            ),
            Err(e) => JsonRpcResponse::error(Some(id), e.to_rpc_code(), e.to_string()),
        }
    }

    fn handle_prompts_list(&self, id: RequestId) -> JsonRpcResponse {
        let prompts: Vec<Value> = self
            .prompts
            .all()
            .iter()
            .map(|p| serde_json::to_value(&p.definition).unwrap_or(Value::Null))
            .collect();
        JsonRpcResponse::success(id, json!({ "prompts": prompts }))
    }

    async fn handle_prompts_get(&self, id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
        let name = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let arguments = params
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        let Some(prompt) = self.prompts.get(name).cloned() else {
            return JsonRpcResponse::error(
                Some(id),
                rpc_codes::INVALID_PARAMS,
                format!("Unknown prompt: {name}"),
            );
        };

        match (prompt.handler)(arguments).await {
            Ok(messages) => JsonRpcResponse::success(
                id,
                json!({
                    "description": prompt.definition.description,
                    "messages": messages
                }),
            ),
            Err(e) => JsonRpcResponse::error(Some(id), e.to_rpc_code(), e.to_string()),
        }
    }
}

/// Render a handler result as resource text: strings pass through, anything
/// else is serialized.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::capability::scoped_tools;
    use crate::registry::tests::sample_tool_registry;
    use pretty_assertions::assert_eq;

    fn server_for(role: Option<Role>) -> ScopedServer {
        let registry = sample_tool_registry();
        ScopedServer::new(
            scoped_tools(&registry, role),
            ResourceRegistry::new(),
            PromptRegistry::new(),
        )
    }

    #[tokio::test]
    async fn initialize_reports_protocol_version() {
        let server = server_for(Some(Role::Admin));
        let response = server
            .handle(RequestId::Number(1), "initialize", None)
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "steward-gateway");
    }

    #[tokio::test]
    async fn tools_list_reflects_the_scoped_set() {
        let admin = server_for(Some(Role::Admin));
        let viewer = server_for(Some(Role::Viewer));

        let admin_tools = admin
            .handle(RequestId::Number(1), "tools/list", None)
            .await
            .result
            .unwrap()["tools"]
            .as_array()
            .unwrap()
            .len();
        let viewer_tools = viewer
            .handle(RequestId::Number(2), "tools/list", None)
            .await
            .result
            .unwrap()["tools"]
            .as_array()
            .unwrap()
            .len();

        assert!(viewer_tools < admin_tools);
    }

    #[tokio::test]
    async fn filtered_tool_is_indistinguishable_from_missing() {
        let viewer = server_for(Some(Role::Viewer));

        // task_create exists in the full registry but was filtered out; a
        // truly nonexistent name must produce the same error shape.
        let filtered = viewer
            .handle(
                RequestId::Number(1),
                "tools/call",
                Some(&serde_json::json!({"name": "task_create"})),
            )
            .await;
        let missing = viewer
            .handle(
                RequestId::Number(2),
                "tools/call",
                Some(&serde_json::json!({"name": "no_such_tool"})),
            )
            .await;

        let filtered_err = filtered.error.unwrap();
        let missing_err = missing.error.unwrap();
        assert_eq!(filtered_err.code, rpc_codes::INVALID_PARAMS);
        assert_eq!(missing_err.code, rpc_codes::INVALID_PARAMS);
        assert!(filtered_err.message.starts_with("Unknown tool"));
        assert!(missing_err.message.starts_with("Unknown tool"));
    }

    #[tokio::test]
    async fn tools_call_invokes_the_handler() {
        let server = server_for(Some(Role::Admin));
        let response = server
            .handle(
                RequestId::String("call-1".to_string()),
                "tools/call",
                Some(&serde_json::json!({"name": "tasks_list", "arguments": {}})),
            )
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("ok"));
    }

    #[tokio::test]
    async fn unknown_method_is_a_method_not_found() {
        let server = server_for(None);
        let response = server
            .handle(RequestId::Number(9), "tasks/explode", None)
            .await;
        assert_eq!(response.error.unwrap().code, rpc_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_resource_and_prompt_report_invalid_params() {
        let server = server_for(None);
        let resource = server
            .handle(
                RequestId::Number(1),
                "resources/read",
                Some(&serde_json::json!({"uri": "steward://nope"})),
            )
            .await;
        let prompt = server
            .handle(
                RequestId::Number(2),
                "prompts/get",
                Some(&serde_json::json!({"name": "nope"})),
            )
            .await;
        assert_eq!(resource.error.unwrap().code, rpc_codes::INVALID_PARAMS);
        assert_eq!(prompt.error.unwrap().code, rpc_codes::INVALID_PARAMS);
    }
}
