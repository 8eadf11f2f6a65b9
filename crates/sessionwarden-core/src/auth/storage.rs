use std::collections::HashMap;

use anyhow::Result;
use parking_lot::Mutex;

/// Durable key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Durable key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Durable key-value medium mirroring the in-memory token pair.
///
/// Calls are synchronous. The session layer logs and tolerates errors, so
/// an unavailable medium degrades to an in-memory-only session.
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local storage. Nothing survives a restart unless the same
/// instance is shared.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
