//! Authenticated transport for the account service API.
//!
//! Every call goes through the same pipeline:
//!
//! 1. Dispatch with `Authorization: Bearer <access>` when an access token
//!    is held (unauthenticated calls pass through unchanged).
//! 2. On a 401 for a call still in its [`Attempt::Initial`] state, renew the
//!    access token once through the coalesced refresh and re-dispatch the
//!    call as [`Attempt::Retried`].
//! 3. Anything else, including a second 401, is handed back to the caller.
//!
//! If the refresh itself fails the session is terminated and a
//! [`SessionEvent::SessionExpired`] is broadcast.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth::SessionHandle;
use crate::config::Config;

use super::error::{ApiError, RefreshError};
use super::events::SessionEvent;
use super::refresh::{RefreshOutcome, SingleFlight};

// ============================================================================
// Constants
// ============================================================================

/// Token refresh endpoint, called outside the interception pipeline
pub const REFRESH_PATH: &str = "/auth/token/refresh/";

/// Buffer size for the session event channel.
/// Slow receivers lose the oldest events rather than blocking calls.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
}

/// Where a call is in its retry budget. A call is re-dispatched at most
/// once after an authorization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Initial,
    Retried,
}

/// A call that can be dispatched again after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    renew_on_unauthorized: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            renew_on_unauthorized: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value =
            serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Hand a 401 straight back instead of refreshing. Used for credential
    /// exchanges, where a 401 means bad credentials rather than an expired
    /// session.
    pub fn without_renewal(mut self) -> Self {
        self.renew_on_unauthorized = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    body: String,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Parse the body as JSON. An empty body parses as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }
}

struct TransportInner {
    client: Client,
    base_url: String,
    session: SessionHandle,
    default_authorization: RwLock<Option<String>>,
    refresh: SingleFlight,
    events: broadcast::Sender<SessionEvent>,
}

impl TransportInner {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn set_default_token(&self, access: &str) {
        *self.default_authorization.write() = Some(format!("Bearer {}", access));
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// POST the refresh token straight to the refresh endpoint, bypassing
    /// the interception pipeline. On success the new access token is stored
    /// before any waiter is released, unless the session was logged out or
    /// replaced while the request was on the wire.
    async fn exchange_refresh_token(self: Arc<Self>) -> RefreshOutcome {
        let refresh = self
            .session
            .refresh_token()
            .ok_or(RefreshError::MissingRefreshToken)?;

        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest { refresh: &refresh })
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "Token refresh rejected");
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        // Header lock first, so a concurrent logout can't clear the header
        // between the session write and ours
        let mut authorization = self.default_authorization.write();
        if !self.session.replace_access_if(&refresh, &parsed.access) {
            warn!("Session changed during token refresh, discarding new access token");
            return Err(RefreshError::SessionChanged);
        }
        *authorization = Some(format!("Bearer {}", parsed.access));
        drop(authorization);
        info!("Access token refreshed");
        Ok(parsed.access)
    }
}

/// HTTP transport that attaches and renews credentials.
/// Clone is cheap - all clones share the client, session and refresh state.
#[derive(Clone)]
pub struct AuthenticatedTransport {
    inner: Arc<TransportInner>,
}

impl AuthenticatedTransport {
    pub fn new(config: &Config, session: SessionHandle) -> Result<Self, ApiError> {
        Self::with_base_url(config.base_url(), config.request_timeout(), session)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        timeout: Duration,
        session: SessionHandle,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(TransportInner {
                client,
                base_url,
                session,
                default_authorization: RwLock::new(None),
                refresh: SingleFlight::new(),
                events,
            }),
        })
    }

    pub fn session(&self) -> &SessionHandle {
        &self.inner.session
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Set the credential header sent when a call carries no token of its own
    pub fn set_default_token(&self, access: &str) {
        self.inner.set_default_token(access);
    }

    pub fn clear_default_token(&self) {
        *self.inner.default_authorization.write() = None;
    }

    /// Current default credential header value, e.g. `Bearer A1`
    pub fn default_authorization(&self) -> Option<String> {
        self.inner.default_authorization.read().clone()
    }

    /// True while a token refresh is running
    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.is_in_flight()
    }

    // ===== Pipeline =====

    /// Send a call through the interception pipeline.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut attempt = Attempt::Initial;
        let mut token = self.inner.session.access_token();

        loop {
            let result = self.dispatch(request, attempt, token.as_deref()).await;

            let renewable = attempt == Attempt::Initial
                && request.renew_on_unauthorized
                && matches!(result, Err(ApiError::Unauthorized(_)));
            if !renewable {
                return self.finish(request, result);
            }

            match self.renew(token.as_deref()).await? {
                Some(fresh) => {
                    token = Some(fresh);
                    attempt = Attempt::Retried;
                }
                // Nothing to renew with, the 401 stands
                None => return self.finish(request, result),
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        attempt: Attempt,
        token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.inner.url(&request.path);
        debug!(method = %request.method, path = %request.path, ?attempt, "Dispatching request");

        let authorization = match token {
            Some(token) => Some(format!("Bearer {}", token)),
            None => self.default_authorization(),
        };

        let mut builder = self
            .inner
            .client
            .request(request.method.clone(), &url)
            .header(header::ACCEPT, "application/json");
        if let Some(authorization) = authorization {
            builder = builder.header(header::AUTHORIZATION, authorization);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            Ok(ApiResponse { status, body })
        } else {
            debug!(status = status.as_u16(), path = %request.path, "Request failed");
            Err(ApiError::from_status(status, body))
        }
    }

    /// Get a token to retry with after a 401. `Ok(None)` means there is
    /// nothing to retry with (no refresh token, or the session was cleared
    /// mid-refresh) and the 401 should be passed through.
    async fn renew(&self, sent_with: Option<&str>) -> Result<Option<String>, ApiError> {
        // Another call may already have renewed the token we were sent with
        if let Some(current) = self.inner.session.access_token() {
            if sent_with != Some(current.as_str()) {
                debug!("Access token changed while in flight, retrying with current token");
                return Ok(Some(current));
            }
        }

        match self.refresh_access_token().await {
            Ok(access) => Ok(Some(access)),
            Err(RefreshError::MissingRefreshToken) => Ok(None),
            // Logged out or logged in again meanwhile: retry with whatever
            // the session holds now, if anything
            Err(RefreshError::SessionChanged) => Ok(self.inner.session.access_token()),
            Err(e) => {
                self.terminate_session();
                Err(e.into())
            }
        }
    }

    /// Drop both tokens and the default header after a failed refresh.
    fn terminate_session(&self) {
        self.clear_default_token();
        if self.inner.session.clear_tokens() {
            info!("Session terminated after failed token refresh");
            self.inner.emit(SessionEvent::SessionExpired);
        }
    }

    /// Raise a notice for user-visible failures and hand the result back.
    fn finish(
        &self,
        request: &ApiRequest,
        result: Result<ApiResponse, ApiError>,
    ) -> Result<ApiResponse, ApiError> {
        if let Err(ref e) = result {
            if let Some(notice) = e.notice() {
                warn!(method = %request.method, path = %request.path, error = %e, "Request failed");
                self.inner.emit(SessionEvent::Notice(notice));
            }
        }
        result
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Concurrent callers share one request on the wire. This does not
    /// touch the session on failure; callers decide how to end it.
    pub async fn refresh_access_token(&self) -> Result<String, RefreshError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .refresh
            .run(move || inner.exchange_refresh_token().boxed())
            .await
    }

    // ===== Typed helpers =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(&ApiRequest::get(path)).await?.json()
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(&ApiRequest::post(path).json(body)?).await?.json()
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(&ApiRequest::patch(path).json(body)?).await?.json()
    }
}
