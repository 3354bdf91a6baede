//! Credential storage for the authorization engine.
//!
//! [`CredentialStore`] is the seam persistence backends plug into.
//! [`MemoryStore`] keeps every mapping in its own `RwLock<HashMap>`, so
//! unrelated mappings never contend on a shared lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::types::{AuthorizationCode, LoginSession, PendingAuthorization, RegisteredClient, TokenRecord};
use crate::error::{OAuthError, OAuthResult};

/// Validation run inside the code-consumption critical section.
pub type CodeCheck<'a> = dyn Fn(&AuthorizationCode) -> OAuthResult<()> + Send + Sync + 'a;

/// What a refresh token grants: the fields copied into every refreshed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshGrant {
    pub user_id: String,
    pub client_id: String,
    pub scope: std::collections::BTreeSet<String>,
    pub resource: Option<String>,
}

/// How long each short-lived record stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetimes {
    pub pending: Duration,
    pub code: Duration,
    pub login: Duration,
}

/// Records removed by a sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub pending: usize,
    pub codes: usize,
    pub logins: usize,
}

/// True once `created_at + ttl` lies before `now`.
#[must_use]
pub fn expired(created_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| created_at.checked_add_signed(ttl))
        .is_some_and(|deadline| deadline < now)
}

/// Keyed storage for every credential the engine issues.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace the pending authorization for `pending.state`.
    async fn put_pending(&self, pending: PendingAuthorization);

    async fn get_pending(&self, state: &str) -> Option<PendingAuthorization>;

    /// Attach a user to a pending authorization. Returns false if `state` is unknown.
    async fn attach_user(&self, state: &str, user_id: &str) -> bool;

    async fn delete_pending(&self, state: &str) -> Option<PendingAuthorization>;

    async fn put_code(&self, code: AuthorizationCode);

    async fn get_code(&self, code: &str) -> Option<AuthorizationCode>;

    /// Look up, validate and delete a code as one operation.
    ///
    /// Unknown codes fail with [`OAuthError::InvalidCode`]. If `check` fails the
    /// code stays redeemable and its error is returned.
    async fn consume_code(&self, code: &str, check: &CodeCheck<'_>) -> OAuthResult<AuthorizationCode>;

    async fn delete_code(&self, code: &str) -> Option<AuthorizationCode>;

    /// Store a token record and index it under its refresh token.
    async fn put_token(&self, record: TokenRecord);

    async fn get_token(&self, access_token: &str) -> Option<TokenRecord>;

    /// Refresh-index lookup.
    async fn find_refresh(&self, refresh_token: &str) -> Option<RefreshGrant>;

    /// Delete one access token (its refresh token stays usable).
    async fn delete_token(&self, access_token: &str) -> Option<TokenRecord>;

    /// Drop a refresh token and every access token minted under it.
    /// Returns the number of access tokens removed.
    async fn delete_refresh_family(&self, refresh_token: &str) -> Option<usize>;

    async fn put_login(&self, token: String, session: LoginSession);

    async fn get_login(&self, token: &str) -> Option<LoginSession>;

    async fn delete_login(&self, token: &str) -> bool;

    async fn put_client(&self, client: RegisteredClient);

    async fn get_client(&self, client_id: &str) -> Option<RegisteredClient>;

    /// Evict pending authorizations, codes and login sessions past their lifetime.
    async fn sweep(&self, now: DateTime<Utc>, lifetimes: Lifetimes) -> SweepStats;
}

struct RefreshFamily {
    grant: RefreshGrant,
    access_tokens: Vec<String>,
}

#[derive(Default)]
struct TokenTable {
    by_access: HashMap<String, TokenRecord>,
    by_refresh: HashMap<String, RefreshFamily>,
}

/// In-memory credential store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pending: Arc<RwLock<HashMap<String, PendingAuthorization>>>,
    codes: Arc<RwLock<HashMap<String, AuthorizationCode>>>,
    tokens: Arc<RwLock<TokenTable>>,
    logins: Arc<RwLock<HashMap<String, LoginSession>>>,
    clients: Arc<RwLock<HashMap<String, RegisteredClient>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn put_pending(&self, pending: PendingAuthorization) {
        self.pending.write().await.insert(pending.state.clone(), pending);
    }

    async fn get_pending(&self, state: &str) -> Option<PendingAuthorization> {
        self.pending.read().await.get(state).cloned()
    }

    async fn attach_user(&self, state: &str, user_id: &str) -> bool {
        match self.pending.write().await.get_mut(state) {
            Some(pending) => {
                pending.user_id = Some(user_id.to_owned());
                true
            }
            None => false,
        }
    }

    async fn delete_pending(&self, state: &str) -> Option<PendingAuthorization> {
        self.pending.write().await.remove(state)
    }

    async fn put_code(&self, code: AuthorizationCode) {
        self.codes.write().await.insert(code.code.clone(), code);
    }

    async fn get_code(&self, code: &str) -> Option<AuthorizationCode> {
        self.codes.read().await.get(code).cloned()
    }

    async fn consume_code(&self, code: &str, check: &CodeCheck<'_>) -> OAuthResult<AuthorizationCode> {
        let mut codes = self.codes.write().await;
        let stored = codes.get(code).ok_or(OAuthError::InvalidCode)?;
        check(stored)?;
        codes.remove(code).ok_or(OAuthError::InvalidCode)
    }

    async fn delete_code(&self, code: &str) -> Option<AuthorizationCode> {
        self.codes.write().await.remove(code)
    }

    async fn put_token(&self, record: TokenRecord) {
        let mut tokens = self.tokens.write().await;
        let family = tokens.by_refresh.entry(record.refresh_token.clone()).or_insert_with(|| {
            RefreshFamily {
                grant: RefreshGrant {
                    user_id: record.user_id.clone(),
                    client_id: record.client_id.clone(),
                    scope: record.scope.clone(),
                    resource: record.resource.clone(),
                },
                access_tokens: Vec::new(),
            }
        });
        family.access_tokens.push(record.access_token.clone());
        tokens.by_access.insert(record.access_token.clone(), record);
    }

    async fn get_token(&self, access_token: &str) -> Option<TokenRecord> {
        self.tokens.read().await.by_access.get(access_token).cloned()
    }

    async fn find_refresh(&self, refresh_token: &str) -> Option<RefreshGrant> {
        self.tokens.read().await.by_refresh.get(refresh_token).map(|f| f.grant.clone())
    }

    async fn delete_token(&self, access_token: &str) -> Option<TokenRecord> {
        let mut tokens = self.tokens.write().await;
        let record = tokens.by_access.remove(access_token)?;
        if let Some(family) = tokens.by_refresh.get_mut(&record.refresh_token) {
            family.access_tokens.retain(|t| t != access_token);
        }
        Some(record)
    }

    async fn delete_refresh_family(&self, refresh_token: &str) -> Option<usize> {
        let mut tokens = self.tokens.write().await;
        let family = tokens.by_refresh.remove(refresh_token)?;
        let removed = family
            .access_tokens
            .iter()
            .filter(|t| tokens.by_access.remove(t.as_str()).is_some())
            .count();
        Some(removed)
    }

    async fn put_login(&self, token: String, session: LoginSession) {
        self.logins.write().await.insert(token, session);
    }

    async fn get_login(&self, token: &str) -> Option<LoginSession> {
        self.logins.read().await.get(token).cloned()
    }

    async fn delete_login(&self, token: &str) -> bool {
        self.logins.write().await.remove(token).is_some()
    }

    async fn put_client(&self, client: RegisteredClient) {
        self.clients.write().await.insert(client.client_id.clone(), client);
    }

    async fn get_client(&self, client_id: &str) -> Option<RegisteredClient> {
        self.clients.read().await.get(client_id).cloned()
    }

    async fn sweep(&self, now: DateTime<Utc>, lifetimes: Lifetimes) -> SweepStats {
        let pending = {
            let mut map = self.pending.write().await;
            let before = map.len();
            map.retain(|_, p| !expired(p.created_at, lifetimes.pending, now));
            before - map.len()
        };

        let codes = {
            let mut map = self.codes.write().await;
            let before = map.len();
            map.retain(|_, c| !expired(c.created_at, lifetimes.code, now));
            before - map.len()
        };

        let logins = {
            let mut map = self.logins.write().await;
            let before = map.len();
            map.retain(|_, l| !expired(l.created_at, lifetimes.login, now));
            before - map.len()
        };

        if pending + codes + logins > 0 {
            tracing::debug!(pending, codes, logins, "Swept expired authorization state");
        }

        SweepStats { pending, codes, logins }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}
