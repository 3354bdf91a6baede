//! Session registry routing and tool cancellation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mcp_auth_gateway::client::BearerAuthResult;
use mcp_auth_gateway::error::{SessionError, ToolResult};
use mcp_auth_gateway::server::jsonrpc::{JsonRpcRequest, codes};
use mcp_auth_gateway::server::session::SessionRegistry;
use mcp_auth_gateway::tools::{DoubleTool, McpTool, ToolContext, ToolRegistry, WhoamiTool};

/// Sleeps far longer than any test waits.
struct SlowTool;

#[async_trait::async_trait]
impl McpTool for SlowTool {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn description(&self) -> &'static str {
        "Never finishes in time."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _ctx: &ToolContext, _input: serde_json::Value) -> ToolResult<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("done".into())
    }
}

fn registry() -> Arc<SessionRegistry> {
    let tools = ToolRegistry::new(vec![Arc::new(DoubleTool), Arc::new(WhoamiTool), Arc::new(SlowTool)]);
    Arc::new(SessionRegistry::new(Arc::new(tools), 16, Duration::from_secs(60)))
}

fn auth(user: &str) -> BearerAuthResult {
    BearerAuthResult {
        token: format!("token-{user}"),
        user_id: Some(user.to_string()),
        client_id: Some("client1".into()),
        scopes: vec!["mcp".into()],
        expires_at: None,
        audience: Vec::new(),
    }
}

fn request(method: &str, id: Option<i64>, params: serde_json::Value) -> JsonRpcRequest {
    JsonRpcRequest { jsonrpc: "2.0".into(), method: method.into(), params, id: id.map(|i| json!(i)) }
}

fn initialize() -> JsonRpcRequest {
    request("initialize", Some(1), json!({"protocolVersion": "2025-06-18"}))
}

async fn open(registry: &SessionRegistry, caller: &BearerAuthResult) -> String {
    let dispatched = registry.dispatch(None, Some(caller), initialize()).await.unwrap();
    assert!(dispatched.response.unwrap().result.is_some());
    dispatched.session_id.unwrap()
}

#[tokio::test]
async fn test_initialize_creates_session() {
    let registry = registry();
    let alice = auth("user_alice");

    let id = open(&registry, &alice).await;
    assert_eq!(registry.session_count(), 1);

    let dispatched = registry
        .dispatch(Some(&id), Some(&alice), request("tools/call", Some(2), json!({"name": "double", "arguments": {"value": 2.5}})))
        .await
        .unwrap();
    assert_eq!(dispatched.session_id.as_deref(), Some(id.as_str()));
    assert_eq!(dispatched.response.unwrap().result.unwrap()["content"][0]["text"], "5");
}

#[tokio::test]
async fn test_each_initialize_gets_its_own_session() {
    let registry = registry();
    let alice = auth("user_alice");

    let first = open(&registry, &alice).await;
    let second = open(&registry, &alice).await;
    assert_ne!(first, second);
    assert_eq!(registry.session_count(), 2);
}

#[tokio::test]
async fn test_unknown_session_id() {
    let registry = registry();
    let err = registry.dispatch(Some("nope"), Some(&auth("user_alice")), request("ping", Some(1), json!(null))).await;
    assert!(matches!(err, Err(SessionError::UnknownSession)));
}

#[tokio::test]
async fn test_non_initialize_without_session() {
    let registry = registry();
    let err = registry.dispatch(None, Some(&auth("user_alice")), request("tools/list", Some(1), json!(null))).await;
    assert!(matches!(err, Err(SessionError::InvalidSessionRequest)));

    // A notification without a session is rejected the same way.
    let err = registry.dispatch(None, None, request("notifications/initialized", None, json!(null))).await;
    assert!(matches!(err, Err(SessionError::InvalidSessionRequest)));
    assert_eq!(registry.session_count(), 0);
}

#[tokio::test]
async fn test_failed_initialize_is_not_registered() {
    let registry = registry();
    let dispatched =
        registry.dispatch(None, Some(&auth("user_alice")), request("initialize", Some(1), json!({}))).await.unwrap();

    assert!(dispatched.session_id.is_none());
    assert_eq!(dispatched.response.unwrap().error.unwrap().code, codes::INVALID_PARAMS);
    assert_eq!(registry.session_count(), 0);
}

#[tokio::test]
async fn test_sessions_are_bound_to_their_owner() {
    let registry = registry();
    let id = open(&registry, &auth("user_alice")).await;

    let err = registry.dispatch(Some(&id), Some(&auth("user_bob")), request("ping", Some(2), json!(null))).await;
    assert!(matches!(err, Err(SessionError::UnknownSession)));
    assert!(registry.get(&id, Some("user_alice")).is_ok());
}

#[tokio::test]
async fn test_responses_are_recorded_as_events() {
    let registry = registry();
    let alice = auth("user_alice");
    let id = open(&registry, &alice).await;

    registry.dispatch(Some(&id), Some(&alice), request("ping", Some(2), json!(null))).await.unwrap();
    registry.dispatch(Some(&id), Some(&alice), request("notifications/initialized", None, json!(null))).await.unwrap();

    let session = registry.get(&id, Some("user_alice")).unwrap();
    let events = session.events.events_after(0);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, 1);
    assert_eq!(events[1].event_type, "message");
    let ping: serde_json::Value = serde_json::from_str(&events[1].data).unwrap();
    assert_eq!(ping["id"], 2);

    assert_eq!(session.events.events_after(1).len(), 1);
}

#[tokio::test]
async fn test_whoami_sees_session_and_caller() {
    let registry = registry();
    let alice = auth("user_alice");
    let id = open(&registry, &alice).await;

    let dispatched = registry
        .dispatch(Some(&id), Some(&alice), request("tools/call", Some(2), json!({"name": "whoami"})))
        .await
        .unwrap();
    let text = dispatched.response.unwrap().result.unwrap()["content"][0]["text"].as_str().unwrap().to_string();
    let body: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["user_id"], "user_alice");
    assert_eq!(body["session_id"], id.as_str());
}

#[tokio::test]
async fn test_tool_error_is_server_error() {
    let registry = registry();
    let alice = auth("user_alice");
    let id = open(&registry, &alice).await;

    let dispatched = registry
        .dispatch(Some(&id), Some(&alice), request("tools/call", Some(2), json!({"name": "double", "arguments": {}})))
        .await
        .unwrap();
    let error = dispatched.response.unwrap().error.unwrap();
    assert_eq!(error.code, codes::SERVER_ERROR);
    assert!(error.message.starts_with("Tool error:"));
}

#[tokio::test]
async fn test_cancelled_notification_aborts_tool_call() {
    let registry = registry();
    let alice = auth("user_alice");
    let id = open(&registry, &alice).await;

    let call = {
        let registry = Arc::clone(&registry);
        let alice = alice.clone();
        let id = id.clone();
        tokio::spawn(async move {
            registry.dispatch(Some(&id), Some(&alice), request("tools/call", Some(7), json!({"name": "slow"}))).await
        })
    };

    // Let the call register itself before cancelling it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancel = registry
        .dispatch(Some(&id), Some(&alice), request("notifications/cancelled", None, json!({"requestId": 7})))
        .await
        .unwrap();
    assert!(cancel.response.is_none());

    let dispatched = tokio::time::timeout(Duration::from_secs(5), call).await.unwrap().unwrap().unwrap();
    assert_eq!(dispatched.response.unwrap().error.unwrap().code, codes::REQUEST_CANCELLED);
}

#[tokio::test]
async fn test_close_ends_session() {
    let registry = registry();
    let alice = auth("user_alice");
    let id = open(&registry, &alice).await;

    assert!(registry.close(&id));
    assert!(!registry.close(&id));
    let err = registry.dispatch(Some(&id), Some(&alice), request("ping", Some(2), json!(null))).await;
    assert!(matches!(err, Err(SessionError::UnknownSession)));
}
