//! Authentication module for managing the user session and its tokens.
//!
//! This module provides:
//! - `CredentialStore`: login, register, logout, profile and token refresh
//! - `SessionHandle`: shared in-memory session with a durable token mirror
//! - `TokenStorage` backends: in-memory, OS keychain, encrypted file
//!
//! Only the access and refresh tokens are persisted; the profile is
//! re-fetched after a restart.

pub mod file;
pub mod keychain;
pub mod session;
pub mod storage;
pub mod store;

pub use file::EncryptedFileStorage;
pub use keychain::KeyringStorage;
pub use session::{CredentialPair, Session, SessionHandle};
pub use storage::{MemoryStorage, TokenStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use store::{ActionError, CredentialStore};
