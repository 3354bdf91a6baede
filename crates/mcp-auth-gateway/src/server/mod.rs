//! HTTP servers: the OAuth authorization server and the MCP resource server.
//!
//! Both run on one tokio runtime, either in separate processes (`--role auth`
//! and `--role mcp`) or together (`--role all`), in which case the resource
//! server verifies tokens in-process instead of over HTTP.

pub mod channel;
pub mod jsonrpc;
pub mod oauth;
pub mod session;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header, request::Parts};
use regex::Regex;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::client::{IntrospectionClient, LocalVerifier, TokenVerifier};
use crate::config::Config;
use crate::tools;
use oauth::AuthorizationEngine;
use transport::{ResourceState, SESSION_HEADER};

/// CORS policy allowing origins that match `pattern`.
///
/// # Errors
///
/// Returns error if the pattern is not a valid regex.
pub fn cors_layer(pattern: &str) -> Result<CorsLayer, regex::Error> {
    let origin_pattern = Regex::new(pattern)?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
            origin.to_str().is_ok_and(|o| origin_pattern.is_match(o))
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(SESSION_HEADER),
            HeaderName::from_static("last-event-id"),
            HeaderName::from_static("mcp-protocol-version"),
        ])
        .expose_headers([HeaderName::from_static(SESSION_HEADER), header::WWW_AUTHENTICATE])
        .allow_credentials(true))
}

/// Authorization server router with CORS and request tracing.
///
/// # Errors
///
/// Returns error if the CORS pattern is invalid.
pub fn auth_app(engine: Arc<AuthorizationEngine>, config: &Config) -> anyhow::Result<Router> {
    let cors = cors_layer(&config.cors_origin_pattern).context("Invalid CORS origin pattern")?;
    Ok(oauth::router(engine).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors)))
}

/// Resource server router with CORS and request tracing.
///
/// # Errors
///
/// Returns error if the CORS pattern is invalid.
pub fn resource_app(state: Arc<ResourceState>, config: &Config) -> anyhow::Result<Router> {
    let cors = cors_layer(&config.cors_origin_pattern).context("Invalid CORS origin pattern")?;
    Ok(transport::router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors)))
}

/// Run the authorization server until shutdown.
///
/// # Errors
///
/// Returns error if the listener cannot be bound.
pub async fn run_auth_server(config: Config, engine: Arc<AuthorizationEngine>) -> anyhow::Result<()> {
    Arc::clone(&engine).start_cleanup_task();
    let router = auth_app(engine, &config)?;
    serve(router, config.auth.port, "auth").await
}

/// Run the resource server until shutdown.
///
/// # Errors
///
/// Returns error if the listener cannot be bound.
pub async fn run_resource_server(config: Config, verifier: Arc<dyn TokenVerifier>) -> anyhow::Result<()> {
    let registry = tools::register_all_tools();
    tracing::info!("Registered {} tools", registry.len());

    let state = Arc::new(ResourceState::new(config.resource.clone(), verifier, registry));
    if !config.resource.stateless {
        Arc::clone(&state.sessions).start_cleanup_task(config.resource.cleanup_interval);
    }

    let router = resource_app(state, &config)?;
    serve(router, config.resource.port, "mcp").await
}

/// Resource server verifying tokens against a remote authorization server.
///
/// # Errors
///
/// Returns error if the HTTP client cannot be built or the listener cannot be bound.
pub async fn run_remote_resource_server(config: Config) -> anyhow::Result<()> {
    let verifier = IntrospectionClient::new(&config.resource).context("Failed to build introspection client")?;
    run_resource_server(config, Arc::new(verifier)).await
}

/// Both servers in one process sharing one engine.
///
/// # Errors
///
/// Returns error if either listener cannot be bound.
pub async fn run_all(config: Config) -> anyhow::Result<()> {
    let engine = Arc::new(AuthorizationEngine::new(config.auth.clone()));
    let verifier: Arc<dyn TokenVerifier> = Arc::new(LocalVerifier::new(Arc::clone(&engine), &config.resource));

    tokio::try_join!(run_auth_server(config.clone(), engine), run_resource_server(config, verifier))?;
    Ok(())
}

async fn serve(router: Router, port: u16, role: &'static str) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener =
        tokio::net::TcpListener::bind(addr).await.with_context(|| format!("Failed to bind {role} server on {addr}"))?;

    tracing::info!(role, "HTTP server listening on http://{}", addr);

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!(role, "HTTP server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
