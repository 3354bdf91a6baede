#![no_main]

use libfuzzer_sys::fuzz_target;
use mcp_auth_gateway::server::jsonrpc::{codes, parse_message};

fuzz_target!(|data: &[u8]| {
    // Never panics; failures are always a parse or invalid-request envelope
    if let Err(envelope) = parse_message(data) {
        let code = envelope.error.map(|e| e.code);
        assert!(code == Some(codes::PARSE_ERROR) || code == Some(codes::INVALID_REQUEST));
    }
});
