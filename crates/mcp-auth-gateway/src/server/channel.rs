//! Per-session MCP protocol handling.
//!
//! A channel answers one JSON-RPC message at a time on behalf of a session
//! (or of a single stateless request). Tool calls run on their own task so
//! `notifications/cancelled` can abort them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;
use tokio::task::AbortHandle;

use super::jsonrpc::{JsonRpcRequest, JsonRpcResponse, codes};
use crate::client::BearerAuthResult;
use crate::tools::{ToolContext, ToolRegistry};

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

type InFlight = Mutex<HashMap<String, Vec<AbortHandle>>>;

/// MCP message handler bound to at most one session.
pub struct McpChannel {
    session_id: Option<String>,
    tools: Arc<ToolRegistry>,
    initialized: AtomicBool,
    in_flight: InFlight,
}

/// Registration of one running tool call under its request id.
///
/// Dropping it aborts the task and forgets only this call's handle, so an
/// abandoned `tools/call` future does not leave a live task behind.
struct InFlightCall<'a> {
    in_flight: &'a InFlight,
    key: String,
    handle: AbortHandle,
}

impl<'a> InFlightCall<'a> {
    fn register(in_flight: &'a InFlight, key: String, handle: AbortHandle) -> Self {
        lock(in_flight).entry(key.clone()).or_default().push(handle.clone());
        Self { in_flight, key, handle }
    }
}

impl Drop for InFlightCall<'_> {
    fn drop(&mut self) {
        self.handle.abort();
        let mut map = lock(self.in_flight);
        if let Some(handles) = map.get_mut(&self.key) {
            handles.retain(|h| h.id() != self.handle.id());
            if handles.is_empty() {
                map.remove(&self.key);
            }
        }
    }
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<String, Vec<AbortHandle>>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

impl McpChannel {
    #[must_use]
    pub fn new(session_id: Option<String>, tools: Arc<ToolRegistry>) -> Self {
        Self { session_id, tools, initialized: AtomicBool::new(false), in_flight: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Tool calls currently running.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).values().map(Vec::len).sum()
    }

    /// Handle one message. Notifications produce no response.
    pub async fn handle(&self, request: JsonRpcRequest, auth: Option<&BearerAuthResult>) -> Option<JsonRpcResponse> {
        let JsonRpcRequest { method, params, id, .. } = request;

        match (method.as_str(), id) {
            ("initialize", Some(id)) => Some(self.initialize(id, &params)),
            ("ping", Some(id)) => Some(JsonRpcResponse::success(Some(id), json!({}))),
            ("tools/list", Some(id)) => {
                Some(JsonRpcResponse::success(Some(id), json!({ "tools": self.tools.list() })))
            }
            ("tools/call", Some(id)) => Some(self.call_tool(id, &params, auth).await),
            ("notifications/cancelled", None) => {
                self.cancel(&params);
                None
            }
            ("notifications/initialized", None) => {
                tracing::debug!(session_id = ?self.session_id, "Client initialized");
                None
            }
            (_, None) => {
                tracing::debug!(method = %method, "Ignoring notification");
                None
            }
            (other, Some(id)) => Some(JsonRpcResponse::error(
                Some(id),
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }

    fn initialize(&self, id: serde_json::Value, params: &serde_json::Value) -> JsonRpcResponse {
        let Some(requested) = params.get("protocolVersion").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::error(
                Some(id),
                codes::INVALID_PARAMS,
                "Invalid params: protocolVersion is required",
            );
        };

        if self.initialized.swap(true, Ordering::SeqCst) {
            return JsonRpcResponse::error(
                Some(id),
                codes::INVALID_REQUEST,
                "Invalid Request: Server already initialized",
            );
        }

        let protocol_version = SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .find(|v| **v == requested)
            .copied()
            .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0]);

        tracing::info!(
            session_id = ?self.session_id,
            requested = %requested,
            protocol_version = %protocol_version,
            "MCP initialize"
        );

        JsonRpcResponse::success(
            Some(id),
            json!({
                "protocolVersion": protocol_version,
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    }
                },
                "serverInfo": {
                    "name": "mcp-auth-gateway",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    async fn call_tool(
        &self,
        id: serde_json::Value,
        params: &serde_json::Value,
        auth: Option<&BearerAuthResult>,
    ) -> JsonRpcResponse {
        let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::error(Some(id), codes::INVALID_PARAMS, "Missing 'name' parameter");
        };
        let Some(tool) = self.tools.get(tool_name) else {
            return JsonRpcResponse::error(Some(id), codes::INVALID_PARAMS, format!("Tool not found: {tool_name}"));
        };

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let ctx = ToolContext::new(auth.cloned(), self.session_id.clone());

        tracing::info!(tool = %tool_name, session_id = ?self.session_id, "Executing tool");

        let task = tokio::spawn(async move { tool.execute(&ctx, arguments).await });
        let registration = InFlightCall::register(&self.in_flight, id.to_string(), task.abort_handle());
        let joined = task.await;
        drop(registration);

        match joined {
            Ok(Ok(text)) => JsonRpcResponse::success(
                Some(id),
                json!({
                    "content": [{
                        "type": "text",
                        "text": text
                    }]
                }),
            ),
            Ok(Err(e)) => {
                tracing::warn!(tool = %tool_name, error = %e, "Tool execution failed");
                JsonRpcResponse::error(Some(id), codes::SERVER_ERROR, format!("Tool error: {}", e.to_user_message()))
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(tool = %tool_name, "Tool call cancelled");
                JsonRpcResponse::error(Some(id), codes::REQUEST_CANCELLED, "Request cancelled")
            }
            Err(e) => {
                tracing::error!(tool = %tool_name, error = %e, "Tool task failed");
                JsonRpcResponse::error(Some(id), codes::INTERNAL_ERROR, "Internal error")
            }
        }
    }

    fn cancel(&self, params: &serde_json::Value) {
        let Some(request_id) = params.get("requestId") else {
            return;
        };
        let handles = lock(&self.in_flight).remove(&request_id.to_string()).unwrap_or_default();
        for handle in &handles {
            handle.abort();
        }
        if !handles.is_empty() {
            tracing::debug!(request_id = %request_id, calls = handles.len(), "Cancelled in-flight request");
        }
    }
}

impl std::fmt::Debug for McpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpChannel")
            .field("session_id", &self.session_id)
            .field("initialized", &self.is_initialized())
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}
