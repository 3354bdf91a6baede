//! mcp-auth-gateway
//!
//! An OAuth 2.0 authorization server (authorization code with PKCE) paired
//! with a Model Context Protocol (MCP) server that accepts only bearer tokens
//! the authorization server vouches for.
//!
//! # Features
//!
//! - **Authorization server**: authorize, login, token, refresh, introspect,
//!   revoke and dynamic client registration endpoints
//! - **Resource server**: Streamable HTTP `/mcp` with sessions, SSE replay
//!   via `Last-Event-ID`, or a stateless mode
//! - **Token verification**: RFC 7662 introspection with retry and a bounded
//!   timeout, optional RFC 8707 audience checks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mcp_auth_gateway::{config::Config, server::oauth::AuthorizationEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let engine = Arc::new(AuthorizationEngine::new(config.auth.clone()));
//!     mcp_auth_gateway::server::run_auth_server(config, engine).await
//! }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod server;
pub mod tools;

pub use client::{BearerAuthResult, IntrospectionClient, LocalVerifier, TokenVerifier};
pub use config::Config;
pub use error::{OAuthError, SessionError, ToolError, VerifyError};
