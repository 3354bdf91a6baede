#![no_main]

use libfuzzer_sys::fuzz_target;
use mcp_auth_gateway::client::{IntrospectionClaims, evaluate_claims};

fuzz_target!(|data: &[u8]| {
    if let Ok(claims) = serde_json::from_slice::<IntrospectionClaims>(data) {
        let active = claims.active;
        let strict = evaluate_claims("token", claims, Some("http://localhost:3003"));
        assert!(active || strict.is_err());
    }
});
