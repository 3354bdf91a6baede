//! Configuration for the authorization server and the MCP resource server.

use std::time::Duration;

use anyhow::Context;

/// Default values used when neither CLI flags nor environment override them.
pub mod defaults {
    use std::time::Duration;

    /// Authorization server port.
    pub const AUTH_PORT: u16 = 3001;

    /// MCP resource server port.
    pub const MCP_PORT: u16 = 3003;

    /// Public base URL of the authorization server (the `issuer`).
    pub const ISSUER_URL: &str = "http://localhost:3001";

    /// Canonical URL of the MCP resource server.
    pub const RESOURCE_URL: &str = "http://localhost:3003";

    /// Access token lifetime (1 hour).
    pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

    /// Pending authorizations older than this are swept (10 minutes).
    pub const PENDING_AUTH_TTL: Duration = Duration::from_secs(600);

    /// Authorization codes older than this are swept (10 minutes).
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(600);

    /// Login sessions older than this are swept (24 hours).
    pub const LOGIN_SESSION_TTL: Duration = Duration::from_secs(86_400);

    /// Longest accepted access token lifetime (1 year).
    pub const MAX_ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(365 * 86_400);

    /// Interval of the background sweeps.
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

    /// Upper bound for a single introspection call, retries included.
    pub const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connection timeout for introspection.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Transient-failure retries for introspection.
    pub const INTROSPECTION_RETRIES: u32 = 1;

    /// Sessions idle for longer than this are closed (1 hour).
    pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

    /// Events kept per session for `Last-Event-ID` replay.
    pub const EVENT_HISTORY: usize = 100;

    /// Allowed CORS origins.
    pub const CORS_ORIGIN_PATTERN: &str = r"localhost:3\d{3}$";

    /// Name of the login cookie.
    pub const LOGIN_COOKIE: &str = "uid";
}

/// Authorization server settings.
#[derive(Debug, Clone)]
pub struct AuthServerConfig {
    /// Public base URL, used as `issuer` and to build endpoint URLs.
    pub issuer_url: String,

    /// Listen port.
    pub port: u16,

    /// Lifetime of minted access tokens.
    pub access_token_lifetime: Duration,

    /// TTL for pending authorizations.
    pub pending_ttl: Duration,

    /// TTL for unredeemed authorization codes.
    pub code_ttl: Duration,

    /// TTL for login sessions behind the login cookie.
    pub login_ttl: Duration,

    /// Interval of the store sweep.
    pub cleanup_interval: Duration,

    /// Reject authorize calls from clients that did not register.
    pub require_registered_clients: bool,

    /// Mark the login cookie `Secure`.
    pub secure_cookies: bool,
}

impl AuthServerConfig {
    /// Absolute URL of an endpoint on this server.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer_url.trim_end_matches('/'), path)
    }
}

impl Default for AuthServerConfig {
    fn default() -> Self {
        Self {
            issuer_url: defaults::ISSUER_URL.to_string(),
            port: defaults::AUTH_PORT,
            access_token_lifetime: defaults::ACCESS_TOKEN_LIFETIME,
            pending_ttl: defaults::PENDING_AUTH_TTL,
            code_ttl: defaults::AUTH_CODE_TTL,
            login_ttl: defaults::LOGIN_SESSION_TTL,
            cleanup_interval: defaults::CLEANUP_INTERVAL,
            require_registered_clients: false,
            secure_cookies: false,
        }
    }
}

/// MCP resource server settings.
#[derive(Debug, Clone)]
pub struct ResourceServerConfig {
    /// Canonical URL of this resource server (expected token audience).
    pub resource_url: String,

    /// Listen port.
    pub port: u16,

    /// Authorization server base URL advertised in resource metadata.
    pub authorization_server: String,

    /// Introspection endpoint the verifier calls.
    pub introspection_url: String,

    /// Overall bound for one verification.
    pub introspection_timeout: Duration,

    /// Connection timeout for introspection.
    pub connect_timeout: Duration,

    /// Retries for transient introspection failures.
    pub introspection_retries: u32,

    /// Require the token audience to match `resource_url`.
    pub strict_resource: bool,

    /// Serve `/mcp` without sessions.
    pub stateless: bool,

    /// Idle timeout before a session is closed.
    pub session_idle_timeout: Duration,

    /// Events retained per session.
    pub event_history: usize,

    /// Interval of the stale-session sweep.
    pub cleanup_interval: Duration,
}

impl ResourceServerConfig {
    /// URL of the protected-resource metadata document.
    #[must_use]
    pub fn metadata_url(&self) -> String {
        format!(
            "{}/.well-known/oauth-protected-resource",
            self.resource_url.trim_end_matches('/')
        )
    }
}

impl Default for ResourceServerConfig {
    fn default() -> Self {
        Self {
            resource_url: defaults::RESOURCE_URL.to_string(),
            port: defaults::MCP_PORT,
            authorization_server: defaults::ISSUER_URL.to_string(),
            introspection_url: format!("{}/oauth/introspect", defaults::ISSUER_URL),
            introspection_timeout: defaults::INTROSPECTION_TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            introspection_retries: defaults::INTROSPECTION_RETRIES,
            strict_resource: false,
            stateless: false,
            session_idle_timeout: defaults::SESSION_IDLE_TIMEOUT,
            event_history: defaults::EVENT_HISTORY,
            cleanup_interval: defaults::CLEANUP_INTERVAL,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Authorization server settings.
    pub auth: AuthServerConfig,

    /// Resource server settings.
    pub resource: ResourceServerConfig,

    /// Regex matched against the `Origin` header for CORS.
    pub cors_origin_pattern: String,
}

impl Config {
    /// Create a test configuration pointing the verifier at `auth_base_url`.
    ///
    /// Timeouts are short and retries disabled so failure tests stay fast.
    #[must_use]
    pub fn for_testing(auth_base_url: &str) -> Self {
        let base = auth_base_url.trim_end_matches('/');
        Self {
            auth: AuthServerConfig {
                issuer_url: base.to_string(),
                ..AuthServerConfig::default()
            },
            resource: ResourceServerConfig {
                authorization_server: base.to_string(),
                introspection_url: format!("{base}/oauth/introspect"),
                introspection_timeout: Duration::from_millis(500),
                connect_timeout: Duration::from_millis(200),
                introspection_retries: 0,
                ..ResourceServerConfig::default()
            },
            cors_origin_pattern: defaults::CORS_ORIGIN_PATTERN.to_string(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(issuer) = std::env::var("AUTH_ISSUER_URL") {
            config.resource.authorization_server.clone_from(&issuer);
            config.resource.introspection_url =
                format!("{}/oauth/introspect", issuer.trim_end_matches('/'));
            config.auth.issuer_url = issuer;
        }
        if let Some(port) = env_parse::<u16>("AUTH_PORT")? {
            config.auth.port = port;
        }
        if let Some(port) = env_parse::<u16>("MCP_PORT")? {
            config.resource.port = port;
        }
        if let Ok(resource) = std::env::var("MCP_RESOURCE_URL") {
            config.resource.resource_url = resource;
        }
        if let Ok(url) = std::env::var("AUTH_INTROSPECTION_URL") {
            config.resource.introspection_url = url;
        }
        if let Some(flag) = env_parse::<bool>("MCP_STRICT_RESOURCE")? {
            config.resource.strict_resource = flag;
        }
        if let Some(flag) = env_parse::<bool>("MCP_STATELESS")? {
            config.resource.stateless = flag;
        }
        if let Some(flag) = env_parse::<bool>("AUTH_REQUIRE_REGISTERED_CLIENTS")? {
            config.auth.require_registered_clients = flag;
        }
        if let Some(secs) = env_parse::<u64>("AUTH_ACCESS_TOKEN_LIFETIME_SECS")? {
            config.auth.access_token_lifetime = token_lifetime(secs)?;
        }
        if let Some(secs) = env_parse::<u64>("AUTH_LOGIN_TTL_SECS")? {
            config.auth.login_ttl = Duration::from_secs(secs);
        }
        if let Ok(pattern) = std::env::var("CORS_ORIGIN_PATTERN") {
            config.cors_origin_pattern = pattern;
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthServerConfig::default(),
            resource: ResourceServerConfig::default(),
            cors_origin_pattern: defaults::CORS_ORIGIN_PATTERN.to_string(),
        }
    }
}

fn token_lifetime(secs: u64) -> anyhow::Result<Duration> {
    let lifetime = Duration::from_secs(secs);
    anyhow::ensure!(secs > 0, "AUTH_ACCESS_TOKEN_LIFETIME_SECS must be positive");
    anyhow::ensure!(
        lifetime <= defaults::MAX_ACCESS_TOKEN_LIFETIME,
        "AUTH_ACCESS_TOKEN_LIFETIME_SECS must not exceed {} seconds",
        defaults::MAX_ACCESS_TOKEN_LIFETIME.as_secs()
    );
    Ok(lifetime)
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        Err(_) => Ok(None),
    }
}
