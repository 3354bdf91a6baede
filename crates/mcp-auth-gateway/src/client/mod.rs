//! Bearer token verification for the resource server.
//!
//! [`IntrospectionClient`] asks the authorization server about every token
//! (RFC 7662) through a pooled HTTP client with:
//! - Retry middleware with exponential backoff for transient failures
//! - A hard upper bound on each verification
//!
//! Results are never cached, so revocation takes effect on the next request.

mod audience;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;

pub use audience::{Audience, normalize_resource};

use crate::config::ResourceServerConfig;
use crate::error::VerifyError;
use crate::server::oauth::AuthorizationEngine;
use crate::server::oauth::types::IntrospectionResponse;

/// Identity attached to an authenticated request.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerAuthResult {
    pub token: String,
    pub user_id: Option<String>,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
    /// Resource indicators the token was issued for.
    pub audience: Vec<String>,
}

impl BearerAuthResult {
    /// Key used to bind sessions to their creator.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.client_id.as_deref())
    }
}

impl std::fmt::Debug for BearerAuthResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuthResult")
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

/// Claims returned by an introspection endpoint.
///
/// `aud` may be a single string or an array depending on the server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntrospectionClaims {
    pub active: bool,
    pub user_id: Option<String>,
    pub sub: Option<String>,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub exp: Option<i64>,
    pub aud: Option<Audience>,
}

impl From<IntrospectionResponse> for IntrospectionClaims {
    fn from(response: IntrospectionResponse) -> Self {
        Self {
            active: response.active,
            user_id: response.user_id,
            sub: None,
            client_id: response.client_id,
            scope: response.scope,
            exp: response.exp,
            aud: response.aud.map(Audience::One),
        }
    }
}

/// Turns a bearer token into an authorization decision.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<BearerAuthResult, VerifyError>;
}

/// Check introspection claims and build the auth result.
///
/// `expected_resource` is set in strict mode; the token audience must then
/// name this server.
pub fn evaluate_claims(
    token: &str,
    claims: IntrospectionClaims,
    expected_resource: Option<&str>,
) -> Result<BearerAuthResult, VerifyError> {
    if !claims.active {
        return Err(VerifyError::failed("token inactive"));
    }
    if let Some(exp) = claims.exp {
        if exp < chrono::Utc::now().timestamp() {
            return Err(VerifyError::failed("token expired"));
        }
    }

    if let Some(expected) = expected_resource {
        let Some(aud) = claims.aud.as_ref().filter(|a| !a.is_empty()) else {
            return Err(VerifyError::MissingResourceIndicator);
        };
        if !aud.contains_resource(expected) {
            return Err(VerifyError::ResourceIndicatorMismatch {
                expected: expected.to_owned(),
                actual: aud.to_string(),
            });
        }
    }

    Ok(BearerAuthResult {
        token: token.to_owned(),
        user_id: claims.user_id.or(claims.sub),
        client_id: claims.client_id,
        scopes: claims.scope.map(|s| s.split_whitespace().map(str::to_owned).collect()).unwrap_or_default(),
        expires_at: claims.exp,
        audience: claims.aud.map(Audience::into_vec).unwrap_or_default(),
    })
}

/// Remote verifier calling the authorization server's introspection endpoint.
#[derive(Clone)]
pub struct IntrospectionClient {
    /// HTTP client with middleware.
    client: ClientWithMiddleware,

    /// Introspection endpoint.
    introspection_url: String,

    /// Upper bound for one verification, retries included.
    timeout: Duration,

    /// Canonical resource URL, set in strict mode.
    expected_resource: Option<String>,
}

impl IntrospectionClient {
    /// Create a new client from resource server settings.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(config: &ResourceServerConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.introspection_timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(100), Duration::from_secs(1))
            .build_with_max_retries(config.introspection_retries);

        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            introspection_url: config.introspection_url.clone(),
            timeout: config.introspection_timeout,
            expected_resource: config.strict_resource.then(|| config.resource_url.clone()),
        })
    }

    async fn introspect(&self, token: &str) -> Result<IntrospectionClaims, VerifyError> {
        let body = serde_json::json!({ "token": token }).to_string();

        let response = self
            .client
            .post(&self.introspection_url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| VerifyError::failed(format!("introspection request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::failed(format!("introspection returned {status}")));
        }

        response
            .json::<IntrospectionClaims>()
            .await
            .map_err(|e| VerifyError::failed(format!("malformed introspection response: {e}")))
    }
}

#[async_trait]
impl TokenVerifier for IntrospectionClient {
    async fn verify(&self, token: &str) -> Result<BearerAuthResult, VerifyError> {
        let claims = tokio::time::timeout(self.timeout, self.introspect(token))
            .await
            .map_err(|_| VerifyError::failed("introspection timed out"))??;

        evaluate_claims(token, claims, self.expected_resource.as_deref())
    }
}

impl std::fmt::Debug for IntrospectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectionClient")
            .field("introspection_url", &self.introspection_url)
            .field("timeout", &self.timeout)
            .field("strict", &self.expected_resource.is_some())
            .finish()
    }
}

/// In-process verifier for when both roles share one process.
#[derive(Clone)]
pub struct LocalVerifier {
    engine: Arc<AuthorizationEngine>,
    expected_resource: Option<String>,
}

impl LocalVerifier {
    #[must_use]
    pub fn new(engine: Arc<AuthorizationEngine>, config: &ResourceServerConfig) -> Self {
        Self { engine, expected_resource: config.strict_resource.then(|| config.resource_url.clone()) }
    }
}

#[async_trait]
impl TokenVerifier for LocalVerifier {
    async fn verify(&self, token: &str) -> Result<BearerAuthResult, VerifyError> {
        let claims = IntrospectionClaims::from(self.engine.introspect(token).await);
        evaluate_claims(token, claims, self.expected_resource.as_deref())
    }
}

impl std::fmt::Debug for LocalVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalVerifier").field("strict", &self.expected_resource.is_some()).finish()
    }
}
