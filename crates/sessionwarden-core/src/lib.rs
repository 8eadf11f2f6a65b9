//! Core library for sessionwarden.
//!
//! Keeps an authenticated user's identity and credential pair, attaches the
//! access token to every outbound call, and renews it transparently when the
//! remote service answers with an authorization failure.
//!
//! - [`CredentialStore`]: login, register, logout, profile and token refresh
//! - [`AuthenticatedTransport`]: request/response interception with a
//!   single-flight refresh protocol
//! - [`TokenStorage`]: durable mirror of the token pair

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{
    ApiError, ApiRequest, ApiResponse, Attempt, AuthenticatedTransport, Notice, RefreshError,
    SessionEvent,
};
pub use auth::{
    ActionError, CredentialPair, CredentialStore, EncryptedFileStorage, KeyringStorage,
    MemoryStorage, Session, SessionHandle, TokenStorage,
};
pub use config::{Config, Environment, StorageBackend};
pub use models::{
    ChangePasswordRequest, LoginRequest, PlanTier, ProfileUpdate, RegisterRequest, UserProfile,
    UserStats,
};
