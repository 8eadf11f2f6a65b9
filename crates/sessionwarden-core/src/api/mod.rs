//! Authenticated transport for the account service API.
//!
//! This module provides `AuthenticatedTransport`, which attaches the
//! current access token to outbound calls, coalesces token refreshes into
//! a single request on the wire, and retries a call at most once after an
//! authorization failure.
//!
//! The API uses JWT bearer tokens obtained from `/auth/login/` and renewed
//! through `/auth/token/refresh/`.

pub mod client;
pub mod error;
pub mod events;
mod refresh;

pub use client::{ApiRequest, ApiResponse, Attempt, AuthenticatedTransport, REFRESH_PATH};
pub use error::{ApiError, RefreshError};
pub use events::{Notice, SessionEvent};
pub use refresh::RefreshOutcome;
