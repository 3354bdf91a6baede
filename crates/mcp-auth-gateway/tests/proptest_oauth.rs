//! Property-based tests for PKCE, token expiry, scopes and JSON-RPC parsing.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use mcp_auth_gateway::client::normalize_resource;
use mcp_auth_gateway::error::OAuthError;
use mcp_auth_gateway::server::jsonrpc::{codes, parse_message};
use mcp_auth_gateway::server::oauth::pkce::{self, s256_challenge};
use mcp_auth_gateway::server::oauth::types::{ChallengeMethod, PkceChallenge, TokenRecord, join_scope, parse_scope};

/// RFC 7636 verifier alphabet.
const VERIFIER: &str = "[A-Za-z0-9._~-]{43,128}";

fn record(expires_in: u64) -> TokenRecord {
    TokenRecord {
        access_token: "at".into(),
        refresh_token: "rt".into(),
        user_id: "user_1".into(),
        client_id: "c1".into(),
        scope: parse_scope(Some("mcp")),
        resource: None,
        created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        expires_in,
    }
}

proptest! {
    /// Plain accepts exactly the recorded verifier.
    #[test]
    fn plain_matches_iff_equal(challenge in VERIFIER, verifier in VERIFIER) {
        let recorded = PkceChallenge { challenge: challenge.clone(), method: ChallengeMethod::Plain };
        let result = pkce::check(Some(&recorded), Some(&verifier));
        if verifier == challenge {
            prop_assert!(result.is_ok());
        } else {
            prop_assert_eq!(result, Err(OAuthError::InvalidCodeVerifier));
        }
        prop_assert!(pkce::check(Some(&recorded), Some(&challenge)).is_ok());
    }

    /// S256 accepts the verifier whose hash was recorded and nothing else.
    #[test]
    fn s256_matches_own_verifier(verifier in VERIFIER, other in VERIFIER) {
        let recorded = PkceChallenge { challenge: s256_challenge(&verifier), method: ChallengeMethod::S256 };
        prop_assert!(pkce::check(Some(&recorded), Some(&verifier)).is_ok());
        if other != verifier {
            prop_assert_eq!(pkce::check(Some(&recorded), Some(&other)), Err(OAuthError::InvalidCodeVerifier));
        }
        // The challenge itself is never a valid verifier.
        prop_assert!(pkce::check(Some(&recorded), Some(&recorded.challenge)).is_err());
    }

    /// Challenges are unpadded base64url of a 32-byte digest.
    #[test]
    fn s256_challenge_shape(verifier in ".{0,200}") {
        let challenge = s256_challenge(&verifier);
        prop_assert_eq!(challenge.len(), 43);
        prop_assert!(challenge.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    /// Without a recorded challenge any verifier, or none, is accepted.
    #[test]
    fn no_challenge_ignores_verifier(verifier in proptest::option::of(".{0,64}")) {
        prop_assert!(pkce::check(None, verifier.as_deref()).is_ok());
    }

    /// A token is active through its expiry instant and inactive one second later.
    #[test]
    fn token_active_until_expiry(expires_in in 1u64..100_000, offset in 0i64..200_000) {
        let token = record(expires_in);
        let now = token.created_at + Duration::seconds(offset);
        prop_assert_eq!(token.is_active(now), offset <= expires_in as i64);
        prop_assert!(token.is_active(token.expires_at()));
        prop_assert!(!token.is_active(token.expires_at() + Duration::seconds(1)));
    }

    /// Scope strings normalize to sorted, deduplicated sets.
    #[test]
    fn scope_join_is_stable(words in proptest::collection::vec("[a-z:]{1,10}", 0..6)) {
        let joined = join_scope(&parse_scope(Some(&words.join(" "))));
        prop_assert_eq!(join_scope(&parse_scope(Some(&joined))), joined.clone());
        for word in &words {
            prop_assert!(joined.split(' ').any(|w| w == word));
        }
    }

    /// Arbitrary bytes never panic the JSON-RPC parser; failures carry a standard code.
    #[test]
    fn parse_message_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        if let Err(response) = parse_message(&bytes) {
            let code = response.error.map(|e| e.code);
            prop_assert!(code == Some(codes::PARSE_ERROR) || code == Some(codes::INVALID_REQUEST));
        }
    }

    /// Resource normalization is idempotent.
    #[test]
    fn normalize_resource_idempotent(host in "[a-z]{1,12}", port in 1u16..65535, path in "(/[a-z]{1,8}){0,3}/?") {
        let raw = format!("http://{host}.example:{port}{path}");
        let once = normalize_resource(&raw).unwrap();
        prop_assert_eq!(normalize_resource(&once), Some(once.clone()));
        prop_assert!(!once.ends_with('/'));
    }
}
