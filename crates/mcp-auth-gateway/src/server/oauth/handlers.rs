//! OAuth 2.0 endpoint handlers.
//!
//! Implements:
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (plain and S256)
//! - RFC 7662: Token Introspection
//! - RFC 7009: Token Revocation
//! - RFC 6749: OAuth 2.0 Authorization Code Grant

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{FromRequest, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::engine::AuthorizationEngine;
use super::types::{AuthorizeOutcome, AuthorizeRequest, IntrospectionResponse, TokenRecord, TokenRequest, TokenResponse};
use crate::config::defaults::LOGIN_COOKIE;
use crate::error::OAuthError;

/// Shared state of the authorization server.
pub type AuthState = Arc<AuthorizationEngine>;

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": self.error_code(),
                "error_description": self.to_string()
            })),
        )
            .into_response()
    }
}

/// Body extractor accepting `application/json` or
/// `application/x-www-form-urlencoded`.
#[derive(Debug, Clone)]
pub struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| OAuthError::invalid_request(e.body_text()).into_response())?;
            Ok(Self(value))
        } else {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| OAuthError::invalid_request(e.body_text()).into_response())?;
            Ok(Self(value))
        }
    }
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
pub async fn handle_auth_server_metadata(State(engine): State<AuthState>) -> impl IntoResponse {
    let config = engine.config();
    Json(serde_json::json!({
        "issuer": config.issuer_url,
        "authorization_endpoint": config.endpoint("/oauth/authorize"),
        "token_endpoint": config.endpoint("/oauth/token"),
        "introspection_endpoint": config.endpoint("/oauth/introspect"),
        "revocation_endpoint": config.endpoint("/oauth/revoke"),
        "registration_endpoint": config.endpoint("/oauth/register"),
        "scopes_supported": ["mcp"],
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "token_endpoint_auth_methods_supported": ["none"],
        "code_challenge_methods_supported": ["plain", "S256"]
    }))
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
}

/// `POST /oauth/register`
pub async fn handle_register(State(engine): State<AuthState>, Json(req): Json<RegisterRequest>) -> Response {
    match engine.register_client(req.client_name, req.redirect_uris.unwrap_or_default()).await {
        Ok(client) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "client_id": client.client_id,
                "client_name": client.client_name,
                "redirect_uris": client.redirect_uris,
                "client_id_issued_at": client.created_at.timestamp(),
                "grant_types": ["authorization_code", "refresh_token"],
                "response_types": ["code"],
                "token_endpoint_auth_method": "none"
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `GET /oauth/authorize`
///
/// Answers with JSON rather than a redirect so non-browser clients can drive
/// the login step themselves.
pub async fn handle_authorize(
    State(engine): State<AuthState>,
    jar: CookieJar,
    Query(query): Query<AuthorizeRequest>,
) -> Response {
    let login_token = jar.get(LOGIN_COOKIE).map(|c| c.value().to_owned());

    match engine.authorize(&query, login_token.as_deref()).await {
        Ok(AuthorizeOutcome::Authorized { redirect }) => Json(serde_json::json!({
            "status": "authorized",
            "redirect": redirect
        }))
        .into_response(),
        Ok(AuthorizeOutcome::LoginRequired { state }) => Json(serde_json::json!({
            "status": "login_required",
            "login_hint": engine.config().endpoint("/login"),
            "state": state
        }))
        .into_response(),
        Err(e) => {
            tracing::debug!(error = e.error_code(), "Authorization request rejected");
            e.into_response()
        }
    }
}

// ─── Login ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    pub state: Option<String>,
}

/// `POST /login`
///
/// Sets the HttpOnly login cookie; the client repeats its authorize request
/// afterwards to receive the code.
pub async fn handle_login(
    State(engine): State<AuthState>,
    jar: CookieJar,
    JsonOrForm(req): JsonOrForm<LoginRequest>,
) -> Response {
    match engine.complete_login(&req.email, req.state.as_deref()).await {
        Ok(outcome) => {
            let cookie = Cookie::build((LOGIN_COOKIE, outcome.session_token))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .secure(engine.config().secure_cookies);
            (
                jar.add(cookie),
                Json(serde_json::json!({
                    "status": "logged_in",
                    "userId": outcome.user_id
                })),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `POST /logout`
pub async fn handle_logout(State(engine): State<AuthState>, jar: CookieJar) -> Response {
    let login_token = jar.get(LOGIN_COOKIE).map(|c| c.value().to_owned());
    engine.logout(login_token.as_deref()).await;

    (
        jar.remove(Cookie::build(LOGIN_COOKIE).path("/")),
        Json(serde_json::json!({ "status": "logged_out" })),
    )
        .into_response()
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

/// `POST /oauth/token`
///
/// Exchange an authorization code for tokens, or refresh tokens.
pub async fn handle_token(State(engine): State<AuthState>, JsonOrForm(req): JsonOrForm<TokenRequest>) -> Response {
    match engine.token(&req).await {
        Ok(record) => token_success(&record),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

/// `POST /oauth/refresh`
pub async fn handle_refresh(
    State(engine): State<AuthState>,
    JsonOrForm(req): JsonOrForm<RefreshRequest>,
) -> Response {
    match engine.refresh(&req.refresh_token).await {
        Ok(record) => token_success(&record),
        Err(e) => e.into_response(),
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(record: &TokenRecord) -> Response {
    let mut response = Json(TokenResponse::from_record(record)).into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

// ─── RFC 7662 / RFC 7009 ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenParam {
    #[serde(default)]
    pub token: String,
}

/// `POST /oauth/introspect`
///
/// An absent token or unreadable body is answered `400 {"active": false}`.
pub async fn handle_introspect(
    State(engine): State<AuthState>,
    body: Result<JsonOrForm<TokenParam>, Response>,
) -> Response {
    match body {
        Ok(JsonOrForm(TokenParam { token })) if !token.is_empty() => {
            Json(engine.introspect(&token).await).into_response()
        }
        _ => (StatusCode::BAD_REQUEST, Json(IntrospectionResponse::inactive())).into_response(),
    }
}

/// `POST /oauth/revoke`
pub async fn handle_revoke(State(engine): State<AuthState>, JsonOrForm(req): JsonOrForm<TokenParam>) -> Response {
    match engine.revoke(&req.token).await {
        Ok(()) => Json(serde_json::json!({})).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /health`
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mcp-auth-gateway",
        "role": "auth",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
