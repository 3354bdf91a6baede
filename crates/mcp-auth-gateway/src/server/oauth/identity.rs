//! Identity verification collaborator.
//!
//! Login receives an identity assertion and needs a stable user id for it.
//! A production deployment would verify an ID token here; the bundled
//! [`EmailIdentity`] trusts the email it is given.

use sha2::{Digest, Sha256};

use crate::error::OAuthError;

/// Resolves an identity assertion to a stable user id.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, assertion: &str) -> Result<String, OAuthError>;
}

/// Derives `user_<hex8>` from the normalized email address.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailIdentity;

impl IdentityProvider for EmailIdentity {
    fn resolve(&self, assertion: &str) -> Result<String, OAuthError> {
        let email = assertion.trim().to_lowercase();
        if email.is_empty() {
            return Err(OAuthError::invalid_request("email is required"));
        }
        if !email.contains('@') {
            return Err(OAuthError::invalid_request("email must contain '@'"));
        }

        let digest = Sha256::digest(email.as_bytes());
        let hex8: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        Ok(format!("user_{hex8}"))
    }
}
