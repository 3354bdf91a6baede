//! OAuth 2.0 records and wire types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OAuthError;

/// PKCE challenge method (RFC 7636 §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeMethod {
    #[serde(rename = "plain")]
    Plain,
    S256,
}

impl ChallengeMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl FromStr for ChallengeMethod {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(OAuthError::invalid_request(format!(
                "unsupported code_challenge_method '{other}'"
            ))),
        }
    }
}

/// A code challenge recorded at authorize time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: ChallengeMethod,
}

/// Where a pending authorization sits in the authorize/login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStage {
    /// Recorded, no user attached yet.
    AwaitingLogin,
    /// A user was attached by login; the next authorize call mints a code.
    Authorized,
}

/// An authorization request suspended until the user logs in.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub state: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub pkce: Option<PkceChallenge>,
    pub scope: BTreeSet<String>,
    pub resource: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user_id: Option<String>,
}

impl PendingAuthorization {
    #[must_use]
    pub const fn stage(&self) -> AuthorizationStage {
        if self.user_id.is_some() {
            AuthorizationStage::Authorized
        } else {
            AuthorizationStage::AwaitingLogin
        }
    }

    /// True if a later authorize call asks for exactly the same grant.
    #[must_use]
    pub fn matches(&self, client_id: &str, redirect_uri: &str, pkce: Option<&PkceChallenge>) -> bool {
        self.client_id == client_id && self.redirect_uri == redirect_uri && self.pkce.as_ref() == pkce
    }
}

/// A single-use authorization code.
#[derive(Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub user_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub pkce: Option<PkceChallenge>,
    pub scope: BTreeSet<String>,
    pub resource: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// An issued access token and the refresh token it belongs to.
#[derive(Clone)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub client_id: String,
    pub scope: BTreeSet<String>,
    pub resource: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

impl TokenRecord {
    /// `created_at + expires_in`.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| self.created_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Active until `now` passes the expiry instant.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at()
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

/// Browser login, referenced by the opaque value of the login cookie.
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// A dynamically registered OAuth client.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub client_id: String,
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Query parameters of `GET /oauth/authorize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
    pub resource: Option<String>,
}

/// Result of an authorize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// No user yet; the caller must log in and re-drive the flow.
    LoginRequired { state: String },
    /// A code was minted; `redirect` carries `code` and `state`.
    Authorized { redirect: String },
}

/// Body of `POST /oauth/token` and `POST /oauth/refresh`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub scope: String,
}

impl TokenResponse {
    #[must_use]
    pub fn from_record(record: &TokenRecord) -> Self {
        Self {
            token_type: "Bearer".to_string(),
            access_token: record.access_token.clone(),
            refresh_token: record.refresh_token.clone(),
            expires_in: record.expires_in,
            scope: join_scope(&record.scope),
        }
    }
}

/// Introspection response (RFC 7662 subset).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl IntrospectionResponse {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_record(record: &TokenRecord) -> Self {
        Self {
            active: true,
            user_id: Some(record.user_id.clone()),
            scope: Some(join_scope(&record.scope)),
            exp: Some(record.expires_at().timestamp()),
            client_id: Some(record.client_id.clone()),
            token_type: Some("Bearer".to_string()),
            aud: record.resource.clone(),
        }
    }
}

/// Split a space-delimited scope string.
#[must_use]
pub fn parse_scope(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|s| s.split_whitespace().map(str::to_owned).collect()).unwrap_or_default()
}

/// Join scopes into the space-delimited wire form.
#[must_use]
pub fn join_scope(scope: &BTreeSet<String>) -> String {
    scope.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}
