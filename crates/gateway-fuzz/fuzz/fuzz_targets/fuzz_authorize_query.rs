#![no_main]

use libfuzzer_sys::fuzz_target;
use mcp_auth_gateway::config::AuthServerConfig;
use mcp_auth_gateway::server::oauth::AuthorizationEngine;
use mcp_auth_gateway::server::oauth::types::{AuthorizeOutcome, AuthorizeRequest};

fuzz_target!(|data: &[u8]| {
    let Ok(request) = serde_urlencoded::from_bytes::<AuthorizeRequest>(data) else {
        return;
    };

    // The in-memory store needs no runtime, so a plain executor is enough
    let engine = AuthorizationEngine::new(AuthServerConfig::default());
    if let Ok(AuthorizeOutcome::LoginRequired { state }) =
        futures::executor::block_on(engine.authorize(&request, None))
    {
        assert_eq!(Some(state), request.state);
    }
});
