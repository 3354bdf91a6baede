//! Fuzzing library for mcp-auth-gateway.
//!
//! This crate provides fuzzing targets for the untrusted inputs the gateway
//! parses: JSON-RPC bodies, authorize query strings and introspection
//! responses.
//!
//! # Usage
//!
//! ```bash
//! cd crates/gateway-fuzz
//! cargo +nightly fuzz run fuzz_jsonrpc_parse -- -max_total_time=60
//! ```

pub use mcp_auth_gateway::client;
pub use mcp_auth_gateway::server::{jsonrpc, oauth};
