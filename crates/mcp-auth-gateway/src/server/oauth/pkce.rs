//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements both challenge methods of RFC 7636: `plain` compares the
//! verifier byte for byte, `S256` compares `BASE64URL(SHA256(verifier))`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use super::types::{ChallengeMethod, PkceChallenge};
use crate::error::OAuthError;

/// Compute the S256 challenge for a verifier.
#[must_use]
pub fn s256_challenge(code_verifier: &str) -> String {
    let hash = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Verify a PKCE S256 code challenge.
///
/// Computes `BASE64URL(SHA256(code_verifier))` and compares to the stored challenge.
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    s256_challenge(code_verifier) == code_challenge
}

/// Check a token request's verifier against the challenge recorded at authorize time.
///
/// No recorded challenge means the grant was issued without PKCE and any
/// verifier is ignored.
pub fn check(recorded: Option<&PkceChallenge>, code_verifier: Option<&str>) -> Result<(), OAuthError> {
    let Some(recorded) = recorded else {
        return Ok(());
    };
    let Some(verifier) = code_verifier.filter(|v| !v.is_empty()) else {
        return Err(OAuthError::MissingCodeVerifier);
    };

    let valid = match recorded.method {
        ChallengeMethod::Plain => verifier.as_bytes() == recorded.challenge.as_bytes(),
        ChallengeMethod::S256 => verify_s256(verifier, &recorded.challenge),
    };

    if valid { Ok(()) } else { Err(OAuthError::InvalidCodeVerifier) }
}
