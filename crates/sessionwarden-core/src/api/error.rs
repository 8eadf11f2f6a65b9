use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use super::events::Notice;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - token may be expired")]
    Unauthorized(String),

    #[error("Access denied: {}", truncate_body(.0))]
    AccessDenied(String),

    #[error("Resource not found: {}", truncate_body(.0))]
    NotFound(String),

    #[error("Server error ({status}): {}", truncate_body(.body))]
    ServerError { status: StatusCode, body: String },

    #[error("Request rejected ({status}): {}", truncate_body(.body))]
    Rejected { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request body: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// Why a token refresh failed. Cloneable so every caller waiting on a
/// coalesced refresh receives the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Refresh token rejected ({status}): {}", truncate_body(.body))]
    Rejected { status: u16, body: String },

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Session changed while the token was being refreshed")]
    SessionChanged,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized(body),
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            500..=599 => ApiError::ServerError { status, body },
            _ => ApiError::Rejected { status, body },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    /// HTTP status, for errors that came from a response
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            ApiError::AccessDenied(_) => Some(StatusCode::FORBIDDEN),
            ApiError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            ApiError::ServerError { status, .. } | ApiError::Rejected { status, .. } => {
                Some(*status)
            }
            ApiError::NetworkError(e) => e.status(),
            ApiError::InvalidResponse(_) | ApiError::InvalidRequest(_) | ApiError::Refresh(_) => {
                None
            }
        }
    }

    /// Raw response body, untruncated
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized(body)
            | ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::ServerError { body, .. }
            | ApiError::Rejected { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Response body parsed as JSON, if it is JSON
    pub fn body_json(&self) -> Option<Value> {
        self.body()
            .filter(|b| !b.trim().is_empty())
            .and_then(|b| serde_json::from_str(b).ok())
    }

    /// A string field of a JSON error body, e.g. `detail` or `error`
    pub fn body_field(&self, field: &str) -> Option<String> {
        match self.body_json()?.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    /// The user-visible notice this failure warrants, if any.
    /// Authorization failures and validation errors are the caller's to report.
    pub fn notice(&self) -> Option<Notice> {
        match self {
            ApiError::ServerError { .. } => Some(Notice::ServerError),
            ApiError::AccessDenied(_) => Some(Notice::PermissionDenied),
            ApiError::NotFound(_) => Some(Notice::NotFound),
            ApiError::NetworkError(_) => Some(Notice::Network),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(ApiError::from_status(StatusCode::UNAUTHORIZED, String::new()).is_unauthorized());
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, String::new()),
            ApiError::AccessDenied(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, String::new()),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, String::new()),
            ApiError::ServerError { .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_REQUEST, String::new()),
            ApiError::Rejected { .. }
        ));
    }

    #[test]
    fn test_notice_classification() {
        let notice = |status| ApiError::from_status(status, String::new()).notice();
        assert_eq!(notice(StatusCode::INTERNAL_SERVER_ERROR), Some(Notice::ServerError));
        assert_eq!(notice(StatusCode::FORBIDDEN), Some(Notice::PermissionDenied));
        assert_eq!(notice(StatusCode::NOT_FOUND), Some(Notice::NotFound));
        assert_eq!(notice(StatusCode::UNAUTHORIZED), None);
        assert_eq!(notice(StatusCode::BAD_REQUEST), None);
        assert_eq!(ApiError::Refresh(RefreshError::MissingRefreshToken).notice(), None);
    }

    #[test]
    fn test_body_field_extraction() {
        let err = ApiError::from_status(
            StatusCode::BAD_REQUEST,
            r#"{"detail": "Invalid credentials.", "error": ["Wrong password."]}"#.to_string(),
        );
        assert_eq!(err.body_field("detail").as_deref(), Some("Invalid credentials."));
        assert_eq!(err.body_field("error").as_deref(), Some("Wrong password."));
        assert_eq!(err.body_field("missing"), None);

        let html = ApiError::from_status(StatusCode::BAD_REQUEST, "<html>oops</html>".to_string());
        assert_eq!(html.body_json(), None);
        assert_eq!(html.body_field("detail"), None);
    }

    #[test]
    fn test_display_truncates_long_bodies() {
        let body = "é".repeat(400);
        let err = ApiError::from_status(StatusCode::FORBIDDEN, body.clone());
        let rendered = err.to_string();
        assert!(rendered.contains("truncated, 800 total bytes"));
        // The raw body stays intact for message extraction
        assert_eq!(err.body(), Some(body.as_str()));
    }
}
