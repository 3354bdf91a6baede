//! Authorization-code-with-PKCE state machine.
//!
//! An attempt moves `REQUESTED → AWAITING_LOGIN → AUTHORIZED → CODE_ISSUED →
//! EXCHANGED`; any validation failure rejects it. Each step mutates exactly
//! one store mapping, and code redemption is a single store operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use url::Url;

use super::identity::{EmailIdentity, IdentityProvider};
use super::pkce;
use super::store::{CredentialStore, Lifetimes, MemoryStore, SweepStats, expired};
use super::types::{
    AuthorizationCode, AuthorizationStage, AuthorizeOutcome, AuthorizeRequest, ChallengeMethod,
    IntrospectionResponse, LoginSession, PendingAuthorization, PkceChallenge, RegisteredClient,
    TokenRecord, TokenRequest, parse_scope,
};
use crate::clock::{Clock, SystemClock};
use crate::config::AuthServerConfig;
use crate::error::{OAuthError, OAuthResult};

/// Outcome of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user_id: String,
    /// Opaque login-session token, stored in the login cookie.
    pub session_token: String,
    /// Whether a pending authorization picked up the user.
    pub attached: bool,
}

/// The authorization server's protocol engine.
pub struct AuthorizationEngine {
    store: Arc<dyn CredentialStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: AuthServerConfig,
}

impl AuthorizationEngine {
    /// Engine backed by a fresh [`MemoryStore`], email identities and the system clock.
    #[must_use]
    pub fn new(config: AuthServerConfig) -> Self {
        Self::with_parts(config, Arc::new(MemoryStore::new()), Arc::new(EmailIdentity), Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_parts(
        config: AuthServerConfig,
        store: Arc<dyn CredentialStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, identity, clock, config }
    }

    #[must_use]
    pub const fn config(&self) -> &AuthServerConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Generate a random token using two UUIDs (256 bits).
    fn generate_token() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    /// Handle an authorization request.
    ///
    /// `login_token` is the caller's login cookie, if any. Without a logged-in
    /// user the request is parked as a pending authorization and
    /// [`AuthorizeOutcome::LoginRequired`] is returned; the caller logs in and
    /// repeats the same request.
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        login_token: Option<&str>,
    ) -> OAuthResult<AuthorizeOutcome> {
        match request.response_type.as_deref().map(str::trim) {
            None | Some("") => return Err(OAuthError::invalid_request("response_type is required")),
            Some("code") => {}
            Some(other) => return Err(OAuthError::UnsupportedResponseType(other.to_owned())),
        }
        let client_id = required(request.client_id.as_deref(), "client_id")?;
        let redirect_uri = required(request.redirect_uri.as_deref(), "redirect_uri")?;
        let state = required(request.state.as_deref(), "state")?;

        let mut redirect = parse_absolute_url(redirect_uri, "redirect_uri")?;
        let pkce = parse_pkce(request.code_challenge.as_deref(), request.code_challenge_method.as_deref())?;
        let resource = match request.resource.as_deref().filter(|r| !r.is_empty()) {
            Some(resource) => Some(parse_absolute_url(resource, "resource")?.to_string()),
            None => None,
        };

        if self.config.require_registered_clients {
            let client = self
                .store
                .get_client(client_id)
                .await
                .ok_or_else(|| OAuthError::invalid_client("unknown client_id"))?;
            if !client.redirect_uris.iter().any(|u| u == redirect_uri) {
                return Err(OAuthError::invalid_client("redirect_uri not registered for this client"));
            }
        }

        let now = self.clock.now();
        let user_id = match login_token {
            Some(token) => self.login_user(token, now).await,
            None => None,
        };
        let user_id = match user_id {
            Some(user_id) => Some(user_id),
            None => self
                .store
                .get_pending(state)
                .await
                .filter(|p| !expired(p.created_at, self.config.pending_ttl, now))
                .filter(|p| p.matches(client_id, redirect_uri, pkce.as_ref()))
                .and_then(|p| p.user_id),
        };

        let scope = parse_scope(request.scope.as_deref());

        let Some(user_id) = user_id else {
            self.store
                .put_pending(PendingAuthorization {
                    state: state.to_owned(),
                    client_id: client_id.to_owned(),
                    redirect_uri: redirect_uri.to_owned(),
                    pkce,
                    scope,
                    resource,
                    created_at: now,
                    user_id: None,
                })
                .await;
            tracing::debug!(client_id = %client_id, "Authorization awaiting login");
            return Ok(AuthorizeOutcome::LoginRequired { state: state.to_owned() });
        };

        self.store.delete_pending(state).await;

        let code = Self::generate_token();
        self.store
            .put_code(AuthorizationCode {
                code: code.clone(),
                user_id: user_id.clone(),
                client_id: client_id.to_owned(),
                redirect_uri: redirect_uri.to_owned(),
                pkce,
                scope,
                resource,
                created_at: now,
            })
            .await;

        redirect.query_pairs_mut().append_pair("code", &code).append_pair("state", state);

        tracing::info!(client_id = %client_id, user_id = %user_id, "Issued authorization code");

        Ok(AuthorizeOutcome::Authorized { redirect: redirect.to_string() })
    }

    /// Resolve an identity assertion and open a login session.
    ///
    /// If `state` names a pending authorization the user is attached to it;
    /// the code itself is only minted by the next [`Self::authorize`] call.
    pub async fn complete_login(&self, assertion: &str, state: Option<&str>) -> OAuthResult<LoginOutcome> {
        let user_id = self.identity.resolve(assertion)?;

        let attached = match state.filter(|s| !s.is_empty()) {
            Some(state) => self.store.attach_user(state, &user_id).await,
            None => false,
        };

        let session_token = Self::generate_token();
        self.store
            .put_login(session_token.clone(), LoginSession { user_id: user_id.clone(), created_at: self.clock.now() })
            .await;

        tracing::info!(user_id = %user_id, attached, "User logged in");

        Ok(LoginOutcome { user_id, session_token, attached })
    }

    /// User behind a login-session token.
    pub async fn session_user(&self, login_token: &str) -> Option<String> {
        self.login_user(login_token, self.clock.now()).await
    }

    /// Login sessions past `login_ttl` no longer identify anyone, swept or not.
    async fn login_user(&self, login_token: &str, now: DateTime<Utc>) -> Option<String> {
        self.store
            .get_login(login_token)
            .await
            .filter(|s| !expired(s.created_at, self.config.login_ttl, now))
            .map(|s| s.user_id)
    }

    /// End a login session. Unknown tokens are ignored.
    pub async fn logout(&self, login_token: Option<&str>) -> bool {
        match login_token {
            Some(token) => self.store.delete_login(token).await,
            None => false,
        }
    }

    /// Stage of the pending authorization for `state`, if one is parked.
    pub async fn pending_stage(&self, state: &str) -> Option<AuthorizationStage> {
        self.store.get_pending(state).await.map(|p| p.stage())
    }

    /// Token endpoint: dispatch on `grant_type`.
    pub async fn token(&self, request: &TokenRequest) -> OAuthResult<TokenRecord> {
        match request.grant_type.as_deref() {
            Some("refresh_token") => {
                let refresh_token = required(request.refresh_token.as_deref(), "refresh_token")?;
                self.refresh(refresh_token).await
            }
            _ => self.exchange_code(request).await,
        }
    }

    /// Redeem an authorization code for a token pair.
    ///
    /// Lookup, redirect and PKCE checks and deletion happen in one store
    /// operation; a failed check leaves the code redeemable.
    pub async fn exchange_code(&self, request: &TokenRequest) -> OAuthResult<TokenRecord> {
        match request.grant_type.as_deref() {
            Some("authorization_code") => {}
            other => return Err(OAuthError::UnsupportedGrantType(other.unwrap_or_default().to_owned())),
        }
        let code = required(request.code.as_deref(), "code")?;
        let redirect_uri = required(request.redirect_uri.as_deref(), "redirect_uri")?;
        let verifier = request.code_verifier.as_deref();
        let client_id = request.client_id.as_deref().filter(|c| !c.is_empty());
        let now = self.clock.now();
        let code_ttl = self.config.code_ttl;

        let redeemed = self
            .store
            .consume_code(code, &|stored: &AuthorizationCode| {
                if expired(stored.created_at, code_ttl, now) {
                    return Err(OAuthError::InvalidCode);
                }
                if client_id.is_some_and(|c| c != stored.client_id) {
                    return Err(OAuthError::InvalidCode);
                }
                if stored.redirect_uri != redirect_uri {
                    return Err(OAuthError::RedirectUriMismatch);
                }
                pkce::check(stored.pkce.as_ref(), verifier)
            })
            .await
            .inspect_err(|e| tracing::warn!(error = e.error_code(), "Authorization code rejected"))?;

        let record = TokenRecord {
            access_token: Self::generate_token(),
            refresh_token: Self::generate_token(),
            user_id: redeemed.user_id,
            client_id: redeemed.client_id,
            scope: redeemed.scope,
            resource: redeemed.resource,
            created_at: now,
            expires_in: self.config.access_token_lifetime.as_secs(),
        };
        self.store.put_token(record.clone()).await;

        tracing::info!(client_id = %record.client_id, user_id = %record.user_id, "Issued token pair");

        Ok(record)
    }

    /// Report whether an access token is active. Never mutates the store.
    pub async fn introspect(&self, token: &str) -> IntrospectionResponse {
        if token.is_empty() {
            return IntrospectionResponse::inactive();
        }
        match self.store.get_token(token).await {
            Some(record) if record.is_active(self.clock.now()) => IntrospectionResponse::from_record(&record),
            _ => IntrospectionResponse::inactive(),
        }
    }

    /// Mint a new access token under an existing refresh token.
    ///
    /// The refresh token is reused and earlier access tokens stay valid until
    /// their own expiry.
    pub async fn refresh(&self, refresh_token: &str) -> OAuthResult<TokenRecord> {
        if refresh_token.is_empty() {
            return Err(OAuthError::invalid_request("refresh_token is required"));
        }
        let grant = self.store.find_refresh(refresh_token).await.ok_or(OAuthError::InvalidRefreshToken)?;

        let record = TokenRecord {
            access_token: Self::generate_token(),
            refresh_token: refresh_token.to_owned(),
            user_id: grant.user_id,
            client_id: grant.client_id,
            scope: grant.scope,
            resource: grant.resource,
            created_at: self.clock.now(),
            expires_in: self.config.access_token_lifetime.as_secs(),
        };
        self.store.put_token(record.clone()).await;

        tracing::info!(client_id = %record.client_id, "Refreshed access token");

        Ok(record)
    }

    /// Revoke an access or refresh token (RFC 7009). Unknown tokens succeed.
    pub async fn revoke(&self, token: &str) -> OAuthResult<()> {
        if token.is_empty() {
            return Err(OAuthError::invalid_request("token is required"));
        }
        if let Some(record) = self.store.delete_token(token).await {
            tracing::info!(client_id = %record.client_id, "Revoked access token");
        } else if let Some(count) = self.store.delete_refresh_family(token).await {
            tracing::info!(access_tokens = count, "Revoked refresh token");
        }
        Ok(())
    }

    /// Dynamic client registration (RFC 7591).
    pub async fn register_client(
        &self,
        client_name: Option<String>,
        redirect_uris: Vec<String>,
    ) -> OAuthResult<RegisteredClient> {
        if redirect_uris.is_empty() {
            return Err(OAuthError::invalid_client_metadata("redirect_uris is required"));
        }
        for uri in &redirect_uris {
            parse_absolute_url(uri, "redirect_uris")
                .map_err(|_| OAuthError::invalid_client_metadata(format!("invalid redirect URI: {uri}")))?;
        }

        let client = RegisteredClient {
            client_id: uuid::Uuid::new_v4().simple().to_string(),
            client_name,
            redirect_uris,
            created_at: self.clock.now(),
        };
        self.store.put_client(client.clone()).await;

        tracing::info!(client_id = %client.client_id, "Registered OAuth client");

        Ok(client)
    }

    /// Evict stale pending authorizations, codes and login sessions.
    pub async fn sweep_expired(&self) -> SweepStats {
        let lifetimes = Lifetimes {
            pending: self.config.pending_ttl,
            code: self.config.code_ttl,
            login: self.config.login_ttl,
        };
        self.store.sweep(self.clock.now(), lifetimes).await
    }

    /// Start background cleanup task for stale authorization state.
    pub fn start_cleanup_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.cleanup_interval);
            loop {
                interval.tick().await;
                self.sweep_expired().await;
            }
        })
    }
}

impl std::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEngine").field("issuer", &self.config.issuer_url).finish()
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> OAuthResult<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(OAuthError::invalid_request(format!("{name} is required"))),
    }
}

fn parse_absolute_url(raw: &str, name: &str) -> OAuthResult<Url> {
    let url = Url::parse(raw).map_err(|_| OAuthError::invalid_request(format!("{name} must be an absolute URL")))?;
    if url.fragment().is_some() {
        return Err(OAuthError::invalid_request(format!("{name} must not contain a fragment")));
    }
    Ok(url)
}

fn parse_pkce(challenge: Option<&str>, method: Option<&str>) -> OAuthResult<Option<PkceChallenge>> {
    let challenge = challenge.filter(|c| !c.is_empty());
    let method = method.filter(|m| !m.is_empty());
    match (challenge, method) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(OAuthError::invalid_request("code_challenge_method without code_challenge")),
        (Some(challenge), method) => Ok(Some(PkceChallenge {
            challenge: challenge.to_owned(),
            method: method.map(str::parse).transpose()?.unwrap_or(ChallengeMethod::Plain),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(state: &str) -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: Some("code".into()),
            client_id: Some("client1".into()),
            redirect_uri: Some("http://localhost:3000/callback".into()),
            state: Some(state.into()),
            ..AuthorizeRequest::default()
        }
    }

    #[test]
    fn test_parse_pkce_defaults_to_plain() {
        let pkce = parse_pkce(Some("abc"), None).unwrap().unwrap();
        assert_eq!(pkce.method, ChallengeMethod::Plain);
        assert!(parse_pkce(None, Some("S256")).is_err());
        assert!(parse_pkce(Some("abc"), Some("S512")).is_err());
        assert!(parse_pkce(None, None).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_response_type() {
        let engine = AuthorizationEngine::new(AuthServerConfig::default());
        let mut req = request("s1");
        req.response_type = Some("token".into());
        let err = engine.authorize(&req, None).await.unwrap_err();
        assert_eq!(err.error_code(), "unsupported_response_type");

        req.response_type = None;
        let err = engine.authorize(&req, None).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_missing_state_is_invalid_request() {
        let engine = AuthorizationEngine::new(AuthServerConfig::default());
        let mut req = request("s1");
        req.state = Some(String::new());
        assert!(matches!(engine.authorize(&req, None).await, Err(OAuthError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_stage_progression() {
        let engine = AuthorizationEngine::new(AuthServerConfig::default());
        engine.authorize(&request("s1"), None).await.unwrap();
        assert_eq!(engine.pending_stage("s1").await, Some(AuthorizationStage::AwaitingLogin));

        engine.complete_login("a@b.com", Some("s1")).await.unwrap();
        assert_eq!(engine.pending_stage("s1").await, Some(AuthorizationStage::Authorized));

        let outcome = engine.authorize(&request("s1"), None).await.unwrap();
        assert!(matches!(outcome, AuthorizeOutcome::Authorized { .. }));
        assert_eq!(engine.pending_stage("s1").await, None);
    }

    #[tokio::test]
    async fn test_changed_parameters_do_not_inherit_login() {
        let engine = AuthorizationEngine::new(AuthServerConfig::default());
        engine.authorize(&request("s1"), None).await.unwrap();
        engine.complete_login("a@b.com", Some("s1")).await.unwrap();

        let mut other = request("s1");
        other.redirect_uri = Some("http://evil.example/cb".into());
        let outcome = engine.authorize(&other, None).await.unwrap();
        assert_eq!(outcome, AuthorizeOutcome::LoginRequired { state: "s1".into() });
    }

    #[tokio::test]
    async fn test_registered_clients_enforced() {
        let config = AuthServerConfig { require_registered_clients: true, ..AuthServerConfig::default() };
        let engine = AuthorizationEngine::new(config);
        let err = engine.authorize(&request("s1"), None).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_client");

        let client = engine
            .register_client(Some("demo".into()), vec!["http://localhost:3000/callback".into()])
            .await
            .unwrap();
        let mut req = request("s1");
        req.client_id = Some(client.client_id);
        assert!(engine.authorize(&req, None).await.is_ok());
    }
}
