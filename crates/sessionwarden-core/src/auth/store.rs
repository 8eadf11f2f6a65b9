use std::fmt::Write as _;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, AuthenticatedTransport, RefreshError};
use crate::config::Config;
use crate::models::{
    ChangePasswordRequest, LoginRequest, PlanTier, ProfileUpdate, RegisterRequest, UserProfile,
    UserStats,
};

use super::session::{CredentialPair, SessionHandle};
use super::storage::TokenStorage;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login/";
const REGISTER_PATH: &str = "/auth/register/";
const LOGOUT_PATH: &str = "/auth/logout/";
const PROFILE_PATH: &str = "/auth/profile/";
const CHANGE_PASSWORD_PATH: &str = "/auth/change-password/";
const STATS_PATH: &str = "/auth/stats/";

const LOGIN_FAILED: &str = "Login failed";
const REGISTER_FAILED: &str = "Registration failed";
const PROFILE_LOAD_FAILED: &str = "Failed to load profile";
const PROFILE_UPDATE_FAILED: &str = "Failed to update profile";
const PASSWORD_CHANGE_FAILED: &str = "Failed to change password";
const STATS_LOAD_FAILED: &str = "Failed to load statistics";

#[derive(Debug, Deserialize)]
struct AuthResponse {
    user: UserProfile,
    tokens: TokenPair,
}

#[derive(Deserialize)]
struct TokenPair {
    access: String,
    refresh: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenPair { .. }")
    }
}

/// A failed store action, with a message fit to show the user.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    /// The error body as sent by the server, when it was JSON
    pub details: Option<Value>,
}

impl ActionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    /// Message from the first of `fields` present in the error body, else
    /// `fallback`.
    fn from_fields(err: &ApiError, fields: &[&str], fallback: &str) -> Self {
        let message = fields
            .iter()
            .find_map(|field| err.body_field(field))
            .unwrap_or_else(|| fallback.to_string());
        Self {
            message,
            details: err.body_json(),
        }
    }

    /// Message describing the whole error body, e.g. per-field validation
    /// errors, else `fallback`.
    fn from_body(err: &ApiError, fallback: &str) -> Self {
        match err.body_json() {
            Some(body) => Self {
                message: describe_body(&body).unwrap_or_else(|| fallback.to_string()),
                details: Some(body),
            },
            None => Self::new(fallback),
        }
    }
}

/// Flatten a validation error body like `{"email": ["taken"]}` into
/// `email: taken`.
fn describe_body(body: &Value) -> Option<String> {
    match body {
        Value::String(s) => (!s.is_empty()).then(|| s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(describe_body).collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        Value::Object(fields) => {
            let mut out = String::new();
            for (field, value) in fields {
                if let Some(text) = describe_body(value) {
                    if !out.is_empty() {
                        out.push_str("; ");
                    }
                    if field == "detail" || field == "non_field_errors" {
                        out.push_str(&text);
                    } else {
                        let _ = write!(out, "{}: {}", field, text);
                    }
                }
            }
            (!out.is_empty()).then_some(out)
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Clears the session when dropped, so logout completes locally even if
/// the caller stops awaiting it.
struct ResetOnDrop<'a> {
    store: &'a CredentialStore,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.store.session().clear();
        self.store.transport.clear_default_token();
    }
}

/// User-facing session actions: login, register, logout, profile and
/// token refresh.
///
/// Clone is cheap; all clones share the same session and transport.
#[derive(Clone)]
pub struct CredentialStore {
    transport: AuthenticatedTransport,
}

impl CredentialStore {
    pub fn new(transport: AuthenticatedTransport) -> Self {
        Self { transport }
    }

    /// Restore the session from `storage` and build a transport for `config`
    pub fn open(config: &Config, storage: Arc<dyn TokenStorage>) -> Result<Self, ApiError> {
        let session = SessionHandle::restore(storage);
        Ok(Self::new(AuthenticatedTransport::new(config, session)?))
    }

    pub fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }

    pub fn session(&self) -> &SessionHandle {
        self.transport.session()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.session().user()
    }

    pub fn tokens(&self) -> CredentialPair {
        self.session().tokens()
    }

    pub fn is_loading(&self) -> bool {
        self.session().is_loading()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated()
    }

    pub fn plan_tier(&self) -> PlanTier {
        self.session().plan_tier()
    }

    pub fn is_premium_user(&self) -> bool {
        self.session().is_premium_user()
    }

    // ===== Actions =====

    pub async fn login(&self, credentials: &LoginRequest) -> Result<(), ActionError> {
        let _loading = self.session().begin_loading();

        match self.exchange_credentials(LOGIN_PATH, credentials).await {
            Ok(auth) => {
                self.establish(auth);
                info!(email = %credentials.email, "Logged in");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                Err(ActionError::from_fields(
                    &e,
                    &["detail", "non_field_errors"],
                    LOGIN_FAILED,
                ))
            }
        }
    }

    pub async fn register(&self, profile: &RegisterRequest) -> Result<(), ActionError> {
        let _loading = self.session().begin_loading();

        match self.exchange_credentials(REGISTER_PATH, profile).await {
            Ok(auth) => {
                self.establish(auth);
                info!(email = %profile.email, "Registered");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Registration failed");
                Err(ActionError::from_body(&e, REGISTER_FAILED))
            }
        }
    }

    async fn exchange_credentials<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<AuthResponse, ApiError> {
        let request = ApiRequest::post(path).json(body)?.without_renewal();
        self.transport.send(&request).await?.json()
    }

    fn establish(&self, auth: AuthResponse) {
        let AuthResponse { user, tokens } = auth;
        self.transport.set_default_token(&tokens.access);
        self.session()
            .establish(user, CredentialPair::new(tokens.access, tokens.refresh));
    }

    /// Tell the server to revoke the refresh token (best effort), then clear
    /// the local session. Always succeeds locally.
    pub async fn logout(&self) {
        let _reset = ResetOnDrop { store: self };

        if let Some(refresh) = self.session().refresh_token() {
            let result = match ApiRequest::post(LOGOUT_PATH).json(&json!({ "refresh": refresh })) {
                Ok(request) => self.transport.send(&request.without_renewal()).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(error = %e, "Logout request failed, clearing session anyway");
            }
        }

        info!("Logged out");
    }

    pub async fn fetch_profile(&self) -> Result<(), ActionError> {
        match self.transport.get::<UserProfile>(PROFILE_PATH).await {
            Ok(user) => {
                self.session().set_user(user);
                Ok(())
            }
            Err(e) => Err(ActionError::from_fields(&e, &["detail"], PROFILE_LOAD_FAILED)),
        }
    }

    pub async fn update_profile(&self, changes: &ProfileUpdate) -> Result<(), ActionError> {
        let _loading = self.session().begin_loading();

        match self.transport.patch::<UserProfile, _>(PROFILE_PATH, changes).await {
            Ok(user) => {
                self.session().set_user(user);
                Ok(())
            }
            Err(e) => Err(ActionError::from_body(&e, PROFILE_UPDATE_FAILED)),
        }
    }

    pub async fn change_password(&self, data: &ChangePasswordRequest) -> Result<(), ActionError> {
        let _loading = self.session().begin_loading();

        match self.transport.post::<Value, _>(CHANGE_PASSWORD_PATH, data).await {
            Ok(_) => Ok(()),
            Err(e) => Err(ActionError::from_fields(
                &e,
                &["error", "non_field_errors"],
                PASSWORD_CHANGE_FAILED,
            )),
        }
    }

    pub async fn fetch_user_stats(&self) -> Result<UserStats, ActionError> {
        self.transport
            .get::<UserStats>(STATS_PATH)
            .await
            .map_err(|e| ActionError::from_fields(&e, &["detail"], STATS_LOAD_FAILED))
    }

    /// Renew the access token. Any failure, including a missing refresh
    /// token, ends the session. A session that was replaced or logged out
    /// while the refresh ran is left alone.
    pub async fn refresh_access_token(&self) -> Result<(), RefreshError> {
        let result = if self.session().refresh_token().is_none() {
            Err(RefreshError::MissingRefreshToken)
        } else {
            self.transport.refresh_access_token().await.map(|_| ())
        };

        match result {
            Err(RefreshError::SessionChanged) => {
                debug!("Session changed during refresh, not logging out");
            }
            Err(ref e) => {
                warn!(error = %e, "Token refresh failed, logging out");
                self.logout().await;
            }
            Ok(()) => {}
        }
        result
    }

    /// Pick up a stored session at startup: attach the stored access token
    /// and try to load the profile. A failed profile fetch leaves the
    /// session authenticated by its tokens alone.
    pub async fn initialize(&self) {
        let Some(access) = self.session().access_token() else {
            debug!("No stored session");
            return;
        };

        self.transport.set_default_token(&access);
        if let Err(e) = self.fetch_profile().await {
            warn!(error = %e, "Could not load profile for stored session");
        }
    }
}
