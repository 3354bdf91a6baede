//! End-to-end tests for the authorization server's HTTP endpoints.
//!
//! Drives the axum router with `oneshot`, carrying the login cookie by hand.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;
use tower::ServiceExt;

use mcp_auth_gateway::config::Config;
use mcp_auth_gateway::server::auth_app;
use mcp_auth_gateway::server::oauth::AuthorizationEngine;
use mcp_auth_gateway::server::oauth::pkce::s256_challenge;

const REDIRECT: &str = "http://localhost:3000/callback";
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

fn build_app() -> axum::Router {
    let config = Config::for_testing("http://localhost:3001");
    let engine = Arc::new(AuthorizationEngine::new(config.auth.clone()));
    auth_app(engine, &config).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::post(uri).header("Content-Type", "application/json").body(Body::from(body.to_string())).unwrap()
}

fn authorize_uri(state: &str, challenge: &str) -> String {
    let query = serde_urlencoded::to_string([
        ("response_type", "code"),
        ("client_id", "client1"),
        ("redirect_uri", REDIRECT),
        ("state", state),
        ("code_challenge", challenge),
        ("code_challenge_method", "S256"),
        ("scope", "mcp"),
    ])
    .unwrap();
    format!("/oauth/authorize?{query}")
}

/// `uid=<token>` from a Set-Cookie header.
fn login_cookie(response: &axum::response::Response) -> String {
    let set_cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn test_full_oauth_http_flow() {
    let app = build_app();
    let challenge = s256_challenge(VERIFIER);

    // 1. Authorize without a session
    let response =
        app.clone().oneshot(Request::get(authorize_uri("s1", &challenge)).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "login_required");
    assert_eq!(body["state"], "s1");
    assert_eq!(body["login_hint"], "http://localhost:3001/login");

    // 2. Login
    let response = app.clone().oneshot(post_json("/login", &json!({"email": "a@b.com", "state": "s1"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = login_cookie(&response);
    let body = json_body(response).await;
    assert_eq!(body["status"], "logged_in");
    assert!(body["userId"].as_str().unwrap().starts_with("user_"));

    // 3. Authorize again with the cookie
    let response = app
        .clone()
        .oneshot(
            Request::get(authorize_uri("s1", &challenge)).header(header::COOKIE, &cookie).body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["status"], "authorized");
    let redirect = url::Url::parse(body["redirect"].as_str().unwrap()).unwrap();
    let pairs: std::collections::HashMap<_, _> = redirect.query_pairs().into_owned().collect();
    assert_eq!(pairs["state"], "s1");
    let code = pairs["code"].clone();

    // 4. Exchange (form encoded)
    let form = serde_urlencoded::to_string([
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", REDIRECT),
        ("code_verifier", VERIFIER),
    ])
    .unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::post("/oauth/token")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    let tokens = json_body(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 3600);
    assert_eq!(tokens["scope"], "mcp");
    let access_token = tokens["access_token"].as_str().unwrap().to_string();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    // 5. Introspect
    let response = app.clone().oneshot(post_json("/oauth/introspect", &json!({"token": access_token}))).await.unwrap();
    let info = json_body(response).await;
    assert_eq!(info["active"], true);
    assert_eq!(info["client_id"], "client1");
    assert!(info["exp"].is_i64());

    // 6. Refresh
    let response =
        app.clone().oneshot(post_json("/oauth/refresh", &json!({"refresh_token": refresh_token}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let refreshed = json_body(response).await;
    assert_eq!(refreshed["refresh_token"], refresh_token.as_str());
    assert_ne!(refreshed["access_token"], access_token.as_str());

    // 7. Code is single use
    let response = app
        .clone()
        .oneshot(post_json(
            "/oauth/token",
            &json!({"grant_type": "authorization_code", "code": code, "redirect_uri": REDIRECT, "code_verifier": VERIFIER}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_code");
}

#[tokio::test]
async fn test_authorize_errors_are_400() {
    let app = build_app();

    let response = app
        .clone()
        .oneshot(
            Request::get("/oauth/authorize?response_type=token&client_id=c&redirect_uri=http%3A%2F%2Fx%2Fcb&state=s")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "unsupported_response_type");

    let response = app
        .oneshot(Request::get("/oauth/authorize?response_type=code&client_id=c&state=s").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid_request");
    assert!(body["error_description"].as_str().unwrap().contains("redirect_uri"));
}

#[tokio::test]
async fn test_login_requires_email() {
    let response = build_app().oneshot(post_json("/login", &json!({"email": ""}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_introspect_missing_token() {
    let app = build_app();

    let response = app.clone().oneshot(post_json("/oauth/introspect", &json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await, json!({"active": false}));

    let response = app.oneshot(Request::post("/oauth/introspect").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_introspect_unknown_token_is_inactive() {
    let response = build_app().oneshot(post_json("/oauth/introspect", &json!({"token": "nope"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"active": false}));
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let response = build_app().oneshot(post_json("/oauth/token", &json!({"grant_type": "password"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_revoke_always_succeeds() {
    let response = build_app().oneshot(post_json("/oauth/revoke", &json!({"token": "nope"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({}));
}

#[tokio::test]
async fn test_register_client() {
    let app = build_app();
    let response = app
        .clone()
        .oneshot(post_json("/oauth/register", &json!({"client_name": "Test", "redirect_uris": [REDIRECT]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert!(!body["client_id"].as_str().unwrap().is_empty());
    assert_eq!(body["token_endpoint_auth_method"], "none");

    let response = app.oneshot(post_json("/oauth/register", &json!({"redirect_uris": []}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_client_metadata");
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let app = build_app();
    let response = app.clone().oneshot(post_json("/login", &json!({"email": "a@b.com"}))).await.unwrap();
    let cookie = login_cookie(&response);

    let response = app
        .clone()
        .oneshot(Request::post("/logout").header(header::COOKIE, &cookie).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(cleared.starts_with("uid="));
    assert_eq!(json_body(response).await["status"], "logged_out");

    // The old cookie no longer authorizes.
    let response = app
        .oneshot(
            Request::get(authorize_uri("s9", &s256_challenge(VERIFIER)))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(json_body(response).await["status"], "login_required");
}

#[tokio::test]
async fn test_metadata_document() {
    let response = build_app()
        .oneshot(Request::get("/.well-known/oauth-authorization-server").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["issuer"], "http://localhost:3001");
    assert_eq!(body["token_endpoint"], "http://localhost:3001/oauth/token");
    assert_eq!(body["code_challenge_methods_supported"], json!(["plain", "S256"]));
    assert_eq!(body["grant_types_supported"], json!(["authorization_code", "refresh_token"]));
}

#[tokio::test]
async fn test_cors_allows_matching_origin_only() {
    let app = build_app();

    let allowed = app
        .clone()
        .oneshot(Request::get("/health").header(header::ORIGIN, "http://localhost:3000").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "http://localhost:3000");

    let denied = app
        .oneshot(Request::get("/health").header(header::ORIGIN, "http://evil.example").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
