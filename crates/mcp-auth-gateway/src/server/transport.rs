//! Streamable HTTP transport for the MCP resource server.
//!
//! Every `/mcp` verb is authenticated with a bearer token first. Then:
//! - `POST` routes a JSON-RPC message to its session (or a throwaway
//!   channel in stateless mode)
//! - `GET` opens an SSE stream replaying events after `Last-Event-ID`
//! - `DELETE` closes the session

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use super::channel::McpChannel;
use super::jsonrpc::{self, JsonRpcResponse, codes};
use super::session::{BufferedEvent, Dispatched, Session, SessionRegistry};
use crate::client::{BearerAuthResult, TokenVerifier};
use crate::config::ResourceServerConfig;
use crate::error::SessionError;
use crate::tools::ToolRegistry;

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shared state for resource server handlers.
pub struct ResourceState {
    pub config: ResourceServerConfig,
    pub verifier: Arc<dyn TokenVerifier>,
    pub sessions: Arc<SessionRegistry>,
    pub tools: Arc<ToolRegistry>,
}

impl ResourceState {
    #[must_use]
    pub fn new(config: ResourceServerConfig, verifier: Arc<dyn TokenVerifier>, tools: ToolRegistry) -> Self {
        let tools = Arc::new(tools);
        let sessions =
            Arc::new(SessionRegistry::new(Arc::clone(&tools), config.event_history, config.session_idle_timeout));
        Self { config, verifier, sessions, tools }
    }
}

impl std::fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceState")
            .field("resource_url", &self.config.resource_url)
            .field("stateless", &self.config.stateless)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

/// Routes of the resource server, without middleware layers.
pub fn router(state: Arc<ResourceState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/.well-known/oauth-protected-resource", get(handle_protected_resource))
        .route("/mcp", get(handle_mcp_get).post(handle_mcp_post).delete(handle_mcp_delete))
        .with_state(state)
}

fn envelope(status: StatusCode, code: i32, message: &str) -> Response {
    (status, Json(JsonRpcResponse::error(None, code, message))).into_response()
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidSessionRequest => envelope(StatusCode::BAD_REQUEST, codes::SERVER_ERROR, &self.to_string()),
            Self::UnknownSession => envelope(StatusCode::NOT_FOUND, codes::SESSION_NOT_FOUND, &self.to_string()),
        }
    }
}

fn unauthorized(state: &ResourceState) -> Response {
    let mut response = envelope(StatusCode::UNAUTHORIZED, codes::SERVER_ERROR, "Unauthorized");
    let challenge = format!("Bearer resource_metadata=\"{}\"", state.config.metadata_url());
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// Verify the bearer token. Failures all look the same to the client.
async fn authenticate(state: &ResourceState, headers: &HeaderMap) -> Result<BearerAuthResult, Response> {
    let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() else {
        tracing::debug!("Missing bearer token");
        return Err(unauthorized(state));
    };

    state.verifier.verify(bearer.token()).await.map_err(|e| {
        tracing::warn!(error = e.error_code(), reason = %e, "Bearer token rejected");
        unauthorized(state)
    })
}

fn session_id(headers: &HeaderMap) -> Result<Option<&str>, SessionError> {
    match headers.get(SESSION_HEADER) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| SessionError::UnknownSession),
    }
}

fn with_session_header(mut response: Response, session_id: Option<&str>) -> Response {
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn reply(session_id: Option<&str>, response: Option<JsonRpcResponse>) -> Response {
    let response = match response {
        Some(body) => Json(body).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    with_session_header(response, session_id)
}

/// Handle POST requests to /mcp.
async fn handle_mcp_post(
    State(state): State<Arc<ResourceState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let auth = match authenticate(&state, &headers).await {
        Ok(auth) => auth,
        Err(response) => return response,
    };

    let body = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read request body");
            return envelope(StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL_ERROR, "Internal server error");
        }
    };

    let request = match jsonrpc::parse_message(&body) {
        Ok(request) => request,
        Err(error) => return (StatusCode::BAD_REQUEST, Json(error)).into_response(),
    };

    tracing::debug!(method = %request.method, "Handling MCP POST request");

    if state.config.stateless {
        let channel = McpChannel::new(None, Arc::clone(&state.tools));
        return reply(None, channel.handle(request, Some(&auth)).await);
    }

    let session_id = match session_id(&headers) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    match state.sessions.dispatch(session_id, Some(&auth), request).await {
        Ok(Dispatched { session_id, response }) => reply(session_id.as_deref(), response),
        Err(e) => {
            tracing::debug!(error = e.error_code(), "Session dispatch rejected");
            e.into_response()
        }
    }
}

fn method_not_allowed() -> Response {
    envelope(StatusCode::METHOD_NOT_ALLOWED, codes::SERVER_ERROR, "Method not allowed.")
}

fn require_session(
    state: &ResourceState,
    headers: &HeaderMap,
    auth: &BearerAuthResult,
) -> Result<Arc<Session>, SessionError> {
    let id = session_id(headers)?.ok_or(SessionError::InvalidSessionRequest)?;
    state.sessions.get(id, auth.owner())
}

/// Handle GET requests to /mcp (SSE stream for server-to-client messages).
async fn handle_mcp_get(State(state): State<Arc<ResourceState>>, headers: HeaderMap) -> Response {
    let auth = match authenticate(&state, &headers).await {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    if state.config.stateless {
        return method_not_allowed();
    }
    let session = match require_session(&state, &headers, &auth) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    // Parse Last-Event-ID header for replay
    let last_event_id: u64 = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    tracing::info!(session_id = %session.id, last_event_id, "New SSE stream connection");
    session.touch();

    let stream = build_sse_stream(&session, last_event_id);

    with_session_header(
        (
            [("X-Accel-Buffering", "no"), ("Cache-Control", "no-cache, no-store, must-revalidate")],
            Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping")),
        )
            .into_response(),
        Some(&session.id),
    )
}

/// Replay missed events, then follow live ones.
///
/// Subscribing before reading history means nothing published in between is
/// lost; live events already replayed are skipped by id.
fn build_sse_stream(session: &Session, last_event_id: u64) -> impl Stream<Item = Result<Event, Infallible>> + use<> {
    let receiver = session.events.subscribe();
    let missed = session.events.events_after(last_event_id);
    let replayed_up_to = missed.last().map_or(last_event_id, |e| e.id);

    let replay_stream = stream::iter(missed.into_iter().map(|e| {
        tracing::debug!(event_id = e.id, "Replaying missed event");
        Ok::<_, Infallible>(e.to_sse_event())
    }));

    let live_stream = BroadcastStream::new(receiver).filter_map(move |result: Result<BufferedEvent, _>| async move {
        match result {
            Ok(event) if event.id > replayed_up_to => Some(Ok(event.to_sse_event())),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Broadcast lag, client will catch up");
                None
            }
        }
    });

    replay_stream.chain(live_stream)
}

/// Handle DELETE requests to /mcp (explicit session termination).
async fn handle_mcp_delete(State(state): State<Arc<ResourceState>>, headers: HeaderMap) -> Response {
    let auth = match authenticate(&state, &headers).await {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    if state.config.stateless {
        return method_not_allowed();
    }
    match require_session(&state, &headers, &auth) {
        Ok(session) => {
            session.close();
            StatusCode::OK.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `GET /.well-known/oauth-protected-resource` (RFC 9728)
///
/// Tells clients where to find the authorization server for this resource.
async fn handle_protected_resource(State(state): State<Arc<ResourceState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "resource": state.config.resource_url,
        "authorization_servers": [state.config.authorization_server],
        "bearer_methods_supported": ["header"],
        "scopes_supported": ["mcp"]
    }))
}

async fn health_check(State(state): State<Arc<ResourceState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mcp-auth-gateway",
        "role": "mcp",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.session_count(),
        "tools": state.tools.len()
    }))
}
