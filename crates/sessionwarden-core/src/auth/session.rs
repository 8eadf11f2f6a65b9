use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{PlanTier, UserProfile};

use super::storage::{TokenStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Access/refresh token pair. Either half may be missing independently.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Some(access.into()),
            refresh: Some(refresh.into()),
        }
    }

    /// A session without a refresh token can't be renewed once the access
    /// token expires.
    pub fn is_renewable(&self) -> bool {
        self.refresh.is_some()
    }
}

// Tokens are secrets; only show which halves are present
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &self.access.as_ref().map(|_| "<redacted>"))
            .field("refresh", &self.refresh.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Snapshot of the client-side session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user: Option<UserProfile>,
    pub tokens: CredentialPair,
    pub loading: bool,
}

impl Session {
    /// Authenticated means "holds an access token", whether or not the
    /// profile has been fetched yet.
    pub fn is_authenticated(&self) -> bool {
        self.tokens.access.is_some()
    }

    pub fn plan_tier(&self) -> PlanTier {
        self.user
            .as_ref()
            .map(|u| u.plan.clone())
            .unwrap_or_default()
    }

    pub fn is_premium_user(&self) -> bool {
        self.user.as_ref().map(|u| u.is_premium).unwrap_or(false)
    }
}

struct SessionInner {
    state: RwLock<Session>,
    storage: Arc<dyn TokenStorage>,
}

/// Shared, owned session state.
///
/// Clone is cheap and every clone sees the same session. Every change to
/// the token pair is mirrored to the durable storage before the call
/// returns; the storage is the only source used to restore a session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    /// Restore the token pair from durable storage. The profile is never
    /// persisted and starts out empty.
    pub fn restore(storage: Arc<dyn TokenStorage>) -> Self {
        let tokens = CredentialPair {
            access: Self::read_key(storage.as_ref(), ACCESS_TOKEN_KEY),
            refresh: Self::read_key(storage.as_ref(), REFRESH_TOKEN_KEY),
        };
        debug!(
            has_access = tokens.access.is_some(),
            has_refresh = tokens.refresh.is_some(),
            "Session restored"
        );

        Self {
            inner: Arc::new(SessionInner {
                state: RwLock::new(Session {
                    user: None,
                    tokens,
                    loading: false,
                }),
                storage,
            }),
        }
    }

    fn read_key(storage: &dyn TokenStorage, key: &str) -> Option<String> {
        match storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read token from storage");
                None
            }
        }
    }

    fn write_key(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.inner.storage.set(key, value),
            None => self.inner.storage.remove(key),
        };
        if let Err(e) = result {
            warn!(key, error = %e, "Failed to update token storage");
        }
    }

    pub fn snapshot(&self) -> Session {
        self.inner.state.read().clone()
    }

    pub fn tokens(&self) -> CredentialPair {
        self.inner.state.read().tokens.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.read().tokens.access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.state.read().tokens.refresh.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.read().user.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read().loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().is_authenticated()
    }

    pub fn plan_tier(&self) -> PlanTier {
        self.inner.state.read().plan_tier()
    }

    pub fn is_premium_user(&self) -> bool {
        self.inner.state.read().is_premium_user()
    }

    /// Replace user and both tokens wholesale (login/register).
    pub fn establish(&self, user: UserProfile, tokens: CredentialPair) {
        let mut state = self.inner.state.write();
        self.write_key(ACCESS_TOKEN_KEY, tokens.access.as_deref());
        self.write_key(REFRESH_TOKEN_KEY, tokens.refresh.as_deref());
        state.user = Some(user);
        state.tokens = tokens;
    }

    /// Overwrite the access token only if the session still holds
    /// `refresh_used`. Returns false, leaving everything untouched, when the
    /// session was cleared or replaced in the meantime.
    pub fn replace_access_if(&self, refresh_used: &str, access: &str) -> bool {
        let mut state = self.inner.state.write();
        if state.tokens.refresh.as_deref() != Some(refresh_used) {
            return false;
        }
        self.write_key(ACCESS_TOKEN_KEY, Some(access));
        state.tokens.access = Some(access.to_string());
        true
    }

    pub fn set_user(&self, user: UserProfile) {
        self.inner.state.write().user = Some(user);
    }

    /// Drop both tokens, keeping the cached profile. Returns false if there
    /// were none to drop.
    pub fn clear_tokens(&self) -> bool {
        let mut state = self.inner.state.write();
        self.write_key(ACCESS_TOKEN_KEY, None);
        self.write_key(REFRESH_TOKEN_KEY, None);
        let had_tokens = state.tokens != CredentialPair::default();
        state.tokens = CredentialPair::default();
        had_tokens
    }

    /// Drop user and both tokens.
    pub fn clear(&self) {
        let mut state = self.inner.state.write();
        self.write_key(ACCESS_TOKEN_KEY, None);
        self.write_key(REFRESH_TOKEN_KEY, None);
        state.user = None;
        state.tokens = CredentialPair::default();
    }

    /// Mark the session busy until the returned guard is dropped.
    pub(crate) fn begin_loading(&self) -> LoadingGuard {
        self.inner.state.write().loading = true;
        LoadingGuard {
            session: self.clone(),
        }
    }
}

/// Resets `loading` when dropped, including on early return.
pub(crate) struct LoadingGuard {
    session: SessionHandle,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.session.inner.state.write().loading = false;
    }
}
