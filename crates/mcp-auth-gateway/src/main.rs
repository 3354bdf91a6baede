//! mcp-auth-gateway - Entry Point
//!
//! Runs the OAuth authorization server, the MCP resource server, or both.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_auth_gateway::config::Config;
use mcp_auth_gateway::server;

#[derive(Parser, Debug)]
#[command(name = "mcp-auth-gateway")]
#[command(about = "OAuth authorization server and bearer-protected MCP server")]
#[command(version)]
struct Cli {
    /// Which server(s) to run
    #[arg(long, default_value = "all", env = "GATEWAY_ROLE")]
    role: Role,

    /// Authorization server port
    #[arg(long, env = "AUTH_PORT")]
    auth_port: Option<u16>,

    /// MCP resource server port
    #[arg(long, env = "MCP_PORT")]
    mcp_port: Option<u16>,

    /// Public base URL of the authorization server
    #[arg(long, env = "AUTH_ISSUER_URL")]
    issuer_url: Option<String>,

    /// Canonical URL of the MCP resource server
    #[arg(long, env = "MCP_RESOURCE_URL")]
    resource_url: Option<String>,

    /// Introspection endpoint used by the MCP server (`--role mcp`)
    #[arg(long, env = "AUTH_INTROSPECTION_URL")]
    introspection_url: Option<String>,

    /// Require the token audience to name this resource server
    #[arg(long)]
    strict_resource: bool,

    /// Serve /mcp without sessions
    #[arg(long)]
    stateless: bool,

    /// Only accept authorize requests from registered clients
    #[arg(long)]
    require_registered_clients: bool,

    /// Mark the login cookie Secure
    #[arg(long, env = "AUTH_SECURE_COOKIES")]
    secure_cookies: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Role {
    /// Authorization server only
    Auth,
    /// MCP resource server only, verifying tokens over HTTP
    Mcp,
    /// Both, verifying tokens in-process
    #[default]
    All,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(port) = self.auth_port {
            config.auth.port = port;
        }
        if let Some(port) = self.mcp_port {
            config.resource.port = port;
        }
        if let Some(issuer) = self.issuer_url {
            config.resource.authorization_server.clone_from(&issuer);
            if self.introspection_url.is_none() {
                config.resource.introspection_url = format!("{}/oauth/introspect", issuer.trim_end_matches('/'));
            }
            config.auth.issuer_url = issuer;
        }
        if let Some(resource) = self.resource_url {
            config.resource.resource_url = resource;
        }
        if let Some(url) = self.introspection_url {
            config.resource.introspection_url = url;
        }
        config.resource.strict_resource |= self.strict_resource;
        config.resource.stateless |= self.stateless;
        config.auth.require_registered_clients |= self.require_registered_clients;
        config.auth.secure_cookies |= self.secure_cookies;
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    let role = cli.role;
    let mut config = Config::from_env()?;
    cli.apply(&mut config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        role = ?role,
        issuer = %config.auth.issuer_url,
        resource = %config.resource.resource_url,
        stateless = config.resource.stateless,
        strict_resource = config.resource.strict_resource,
        "Starting mcp-auth-gateway"
    );

    match role {
        Role::Auth => {
            let engine = std::sync::Arc::new(server::oauth::AuthorizationEngine::new(config.auth.clone()));
            server::run_auth_server(config, engine).await?;
        }
        Role::Mcp => server::run_remote_resource_server(config).await?,
        Role::All => server::run_all(config).await?,
    }

    Ok(())
}
