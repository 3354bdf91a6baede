//! Error types for the authorization server and the MCP resource server.
//!
//! Uses `thiserror` for structured error handling. Every variant carries a
//! stable machine-readable code so HTTP boundaries can render uniform bodies.

/// Errors raised by the authorization engine.
///
/// Each variant maps to an OAuth-style `error` code (see [`OAuthError::error_code`]).
/// The free-form descriptions are safe to show to clients; they never reveal
/// whether a code or token existed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    /// Malformed request or missing required field.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// `response_type` other than `code`.
    #[error("Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// `grant_type` this server does not implement.
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Unknown, expired or already redeemed authorization code.
    #[error("Invalid or expired authorization code")]
    InvalidCode,

    /// Unknown or revoked refresh token.
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// PKCE verifier does not match the recorded challenge.
    #[error("PKCE verification failed")]
    InvalidCodeVerifier,

    /// A challenge was recorded but no verifier was supplied.
    #[error("Missing code_verifier")]
    MissingCodeVerifier,

    /// `redirect_uri` differs from the one recorded at authorize time.
    #[error("redirect_uri does not match the authorization request")]
    RedirectUriMismatch,

    /// Client is not registered or the redirect URI is not registered for it.
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    /// Dynamic client registration payload was rejected.
    #[error("Invalid client metadata: {0}")]
    InvalidClientMetadata(String),
}

impl OAuthError {
    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an invalid client error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient(message.into())
    }

    /// Create an invalid client metadata error.
    #[must_use]
    pub fn invalid_client_metadata(message: impl Into<String>) -> Self {
        Self::InvalidClientMetadata(message.into())
    }

    /// Stable machine-readable code rendered in the `error` field.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidCode => "invalid_code",
            Self::InvalidRefreshToken => "invalid_refresh_token",
            Self::InvalidCodeVerifier => "invalid_code_verifier",
            Self::MissingCodeVerifier => "missing_code_verifier",
            Self::RedirectUriMismatch => "redirect_uri_mismatch",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidClientMetadata(_) => "invalid_client_metadata",
        }
    }
}

/// Errors raised while turning a bearer token into an authorization decision.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Introspection failed, timed out, or reported the token inactive.
    ///
    /// The reason is for logs only and must not reach the client.
    #[error("Token verification failed: {0}")]
    TokenVerificationFailed(String),

    /// Strict resource mode is on and the token carries no audience.
    #[error("Token has no resource indicator")]
    MissingResourceIndicator,

    /// Strict resource mode is on and the audience names another resource.
    #[error("Token resource indicator {actual} does not match {expected}")]
    ResourceIndicatorMismatch {
        /// Canonical URL of this resource server.
        expected: String,
        /// Audience carried by the token.
        actual: String,
    },
}

impl VerifyError {
    /// Create a verification failure with a log-only reason.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::TokenVerificationFailed(reason.into())
    }

    /// Stable machine-readable code (for logs and metrics labels).
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::TokenVerificationFailed(_) => "token_verification_failed",
            Self::MissingResourceIndicator => "missing_resource_indicator",
            Self::ResourceIndicatorMismatch { .. } => "resource_indicator_mismatch",
        }
    }
}

/// Errors from the session transport registry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No session id was supplied and the message is not `initialize`.
    #[error("Bad Request: No valid session ID provided")]
    InvalidSessionRequest,

    /// The session id is unknown, closed, or owned by someone else.
    #[error("Session not found")]
    UnknownSession,
}

impl SessionError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSessionRequest => "invalid_session_request",
            Self::UnknownSession => "unknown_session",
        }
    }
}

/// Errors from MCP tool execution.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Input validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Tool needs an authenticated caller
    #[error("Tool requires an authenticated caller")]
    Unauthenticated,
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Convert to a user-friendly error message for MCP response.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Validation { field, message } => {
                format!("Invalid input for '{field}': {message}")
            }
            _ => self.to_string(),
        }
    }
}

/// Result type alias for authorization engine operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;
