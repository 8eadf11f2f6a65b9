//! In-process mock of the account service API for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use sessionwarden_core::{
    AuthenticatedTransport, CredentialStore, MemoryStorage, SessionHandle, TokenStorage,
};

pub const PASSWORD: &str = "secret123";
pub const REFRESH: &str = "R1";

pub struct MockState {
    pub valid_access: Mutex<String>,
    pub next_access: Mutex<String>,
    /// Refresh token handed out by login and register
    pub refresh_token: Mutex<String>,
    pub refresh_calls: AtomicUsize,
    pub refresh_fails: AtomicBool,
    pub refresh_delay_ms: AtomicU64,
    pub logout_calls: AtomicUsize,
    pub logout_fails: AtomicBool,
    pub data_calls: AtomicUsize,
    pub always_unauthorized: AtomicBool,
    pub slow_delay_ms: AtomicU64,
    pub seen_authorization: Mutex<Vec<Option<String>>>,
    pub profile: Mutex<Value>,
}

impl MockState {
    fn new() -> Self {
        Self {
            valid_access: Mutex::new("A1".to_string()),
            next_access: Mutex::new("A2".to_string()),
            refresh_token: Mutex::new(REFRESH.to_string()),
            refresh_calls: AtomicUsize::new(0),
            refresh_fails: AtomicBool::new(false),
            refresh_delay_ms: AtomicU64::new(0),
            logout_calls: AtomicUsize::new(0),
            logout_fails: AtomicBool::new(false),
            data_calls: AtomicUsize::new(0),
            always_unauthorized: AtomicBool::new(false),
            slow_delay_ms: AtomicU64::new(0),
            seen_authorization: Mutex::new(Vec::new()),
            profile: Mutex::new(json!({
                "id": 1,
                "email": "ana@example.com",
                "username": "ana",
                "first_name": "Ana",
                "last_name": "Silva",
                "plan": "premium",
                "created_at": "2025-03-01T12:00:00Z",
                "monthly_transcriptions": 3,
                "monthly_content_generations": 1,
                "is_premium": true
            })),
        }
    }

    /// Invalidate the current access token; the next refresh hands out `next`.
    pub fn expire_access(&self, next: &str) {
        *self.valid_access.lock() = "expired".to_string();
        *self.next_access.lock() = next.to_string();
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        bearer(headers).is_some_and(|token| token == *self.valid_access.lock())
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

type Reply = (StatusCode, Json<Value>);

fn unauthorized() -> Reply {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Given token not valid for any token type"})),
    )
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Reply {
    if body["password"] != PASSWORD {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Invalid credentials."})),
        );
    }
    let access = state.valid_access.lock().clone();
    let refresh = state.refresh_token.lock().clone();
    let user = state.profile.lock().clone();
    (
        StatusCode::OK,
        Json(json!({"user": user, "tokens": {"access": access, "refresh": refresh}})),
    )
}

async fn register(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Reply {
    if body["email"] == "taken@example.com" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"email": ["user with this email already exists."]})),
        );
    }
    let access = state.valid_access.lock().clone();
    let mut user = state.profile.lock().clone();
    user["email"] = body["email"].clone();
    user["username"] = body["username"].clone();
    user["plan"] = json!("free");
    user["is_premium"] = json!(false);
    let refresh = state.refresh_token.lock().clone();
    (
        StatusCode::CREATED,
        Json(json!({"user": user, "tokens": {"access": access, "refresh": refresh}})),
    )
}

async fn logout(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Reply {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    if state.logout_fails.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "boom"})),
        );
    }
    if body["refresh"] != state.refresh_token.lock().as_str() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "Invalid token."})));
    }
    (StatusCode::OK, Json(json!({"message": "Logged out."})))
}

async fn profile(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::OK, Json(state.profile.lock().clone()))
}

async fn update_profile(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    if body.get("username").is_some_and(|u| u == "") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"username": ["This field may not be blank."]})),
        );
    }
    let mut profile = state.profile.lock();
    if let Some(fields) = body.as_object() {
        for (key, value) in fields {
            profile[key] = value.clone();
        }
    }
    (StatusCode::OK, Json(profile.clone()))
}

async fn change_password(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    if body["old_password"] != PASSWORD {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Current password is incorrect."})),
        );
    }
    (StatusCode::OK, Json(json!({"message": "Password changed."})))
}

async fn stats(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    (
        StatusCode::OK,
        Json(json!({
            "plan": "free",
            "is_premium": false,
            "monthly_transcriptions": 3,
            "monthly_content_generations": 0,
            "can_transcribe": true,
            "can_generate_content": true,
            "limits": {"transcriptions": 10, "content_generations": 5}
        })),
    )
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Reply {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    // Judged on arrival, answered after the delay
    let accepted = !state.refresh_fails.load(Ordering::SeqCst)
        && body["refresh"] == state.refresh_token.lock().as_str();
    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if !accepted {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Token is invalid or expired", "code": "token_not_valid"})),
        );
    }
    let access = state.next_access.lock().clone();
    *state.valid_access.lock() = access.clone();
    (StatusCode::OK, Json(json!({"access": access})))
}

async fn data(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    state.data_calls.fetch_add(1, Ordering::SeqCst);
    state.seen_authorization.lock().push(bearer(&headers));
    if state.always_unauthorized.load(Ordering::SeqCst) || !state.is_authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::OK, Json(json!({"ok": true, "token": bearer(&headers)})))
}

/// Like `/data/`, but checks the token only after `slow_delay_ms`.
async fn slow_data(state: State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    let delay = state.slow_delay_ms.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    data(state, headers).await
}

async fn public(headers: HeaderMap) -> Reply {
    (
        StatusCode::OK,
        Json(json!({"authorization": bearer(&headers)})),
    )
}

async fn forbidden() -> Reply {
    (StatusCode::FORBIDDEN, Json(json!({"detail": "Not allowed."})))
}

async fn missing() -> Reply {
    (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found."})))
}

async fn broken() -> Reply {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"detail": "Server exploded."})),
    )
}

pub struct MockApi {
    pub state: Arc<MockState>,
    pub base_url: String,
}

impl MockApi {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::new());
        let app = Router::new()
            .route("/api/auth/login/", post(login))
            .route("/api/auth/register/", post(register))
            .route("/api/auth/logout/", post(logout))
            .route("/api/auth/profile/", get(profile).patch(update_profile))
            .route("/api/auth/change-password/", post(change_password))
            .route("/api/auth/stats/", get(stats))
            .route("/api/auth/token/refresh/", post(refresh))
            .route("/api/data/", get(data))
            .route("/api/slow-data/", get(slow_data))
            .route("/api/public/", get(public))
            .route("/api/forbidden/", get(forbidden))
            .route("/api/missing/", get(missing))
            .route("/api/broken/", get(broken))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base_url: format!("http://{}/api", addr),
        }
    }

    /// A store over `storage`, as a freshly started process would build it.
    pub fn store_with(&self, storage: Arc<dyn TokenStorage>) -> CredentialStore {
        let session = SessionHandle::restore(storage);
        let transport =
            AuthenticatedTransport::with_base_url(&self.base_url, Duration::from_secs(5), session)
                .unwrap();
        CredentialStore::new(transport)
    }

    pub fn store(&self) -> (CredentialStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (self.store_with(storage.clone()), storage)
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub fn data_calls(&self) -> usize {
        self.state.data_calls.load(Ordering::SeqCst)
    }
}
