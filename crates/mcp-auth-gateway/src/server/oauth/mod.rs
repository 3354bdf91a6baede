//! OAuth 2.0 authorization server.
//!
//! Issues authorization codes bound to PKCE challenges, exchanges them for
//! bearer tokens and answers introspection calls from resource servers.
//!
//! ## Supported Standards
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (plain and S256)
//! - RFC 7662: Token Introspection
//! - RFC 7009: Token Revocation
//! - RFC 6749: Authorization Code Grant

pub mod engine;
pub mod handlers;
pub mod identity;
pub mod pkce;
pub mod store;
pub mod types;

use axum::Router;
use axum::routing::{get, post};

pub use engine::{AuthorizationEngine, LoginOutcome};
pub use handlers::AuthState;
pub use store::{CredentialStore, MemoryStore};

/// Routes of the authorization server, without middleware layers.
pub fn router(engine: AuthState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/.well-known/oauth-authorization-server", get(handlers::handle_auth_server_metadata))
        .route("/oauth/authorize", get(handlers::handle_authorize))
        .route("/login", post(handlers::handle_login))
        .route("/logout", post(handlers::handle_logout))
        .route("/oauth/token", post(handlers::handle_token))
        .route("/oauth/refresh", post(handlers::handle_refresh))
        .route("/oauth/introspect", post(handlers::handle_introspect))
        .route("/oauth/revoke", post(handlers::handle_revoke))
        .route("/oauth/register", post(handlers::handle_register))
        .with_state(engine)
}
