//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: which
//! API environment to talk to, the request timeout, and where tokens are
//! kept between runs.
//!
//! Configuration is stored at `~/.config/sessionwarden/config.json` and can
//! be overridden per process with `SESSIONWARDEN_*` environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::file::TOKEN_FILE;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionwarden";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// API served by a local development backend
pub const DEVELOPMENT_API_URL: &str = "http://localhost:8000/api";

/// Production API, used unless `api_url` says otherwise
pub const PRODUCTION_API_URL: &str = "https://api.texts.com.br";

/// Every outbound call, the token refresh included, gives up after this long.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

pub const ENV_ENVIRONMENT: &str = "SESSIONWARDEN_ENV";
pub const ENV_API_URL: &str = "SESSIONWARDEN_API_URL";
pub const ENV_TIMEOUT_MS: &str = "SESSIONWARDEN_TIMEOUT_MS";
pub const ENV_STORAGE: &str = "SESSIONWARDEN_STORAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(anyhow!("Unknown environment '{}'", other)),
        }
    }
}

/// Where the token pair is mirrored between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Keyring,
    #[default]
    File,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "keyring" => Ok(StorageBackend::Keyring),
            "file" => Ok(StorageBackend::File),
            other => Err(anyhow!("Unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    /// Overrides the production API URL. Ignored in development.
    pub api_url: Option<String>,
    pub request_timeout_ms: u64,
    pub storage: StorageBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            api_url: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            storage: StorageBackend::default(),
        }
    }
}

impl Config {
    /// Load the config file (defaults if missing), then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `SESSIONWARDEN_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup(ENV_ENVIRONMENT) {
            self.environment = env.parse()?;
        }
        if let Some(url) = lookup(ENV_API_URL) {
            let url = url.trim();
            self.api_url = (!url.is_empty()).then(|| url.to_string());
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_MS) {
            self.request_timeout_ms = timeout
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_TIMEOUT_MS, timeout))?;
        }
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = storage.parse()?;
        }
        Ok(())
    }

    /// API base URL for the selected environment, without a trailing slash
    pub fn base_url(&self) -> String {
        let url = match self.environment {
            Environment::Development => DEVELOPMENT_API_URL,
            Environment::Production => self.api_url.as_deref().unwrap_or(PRODUCTION_API_URL),
        };
        url.trim_end_matches('/').to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn token_file_path(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join(TOKEN_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.base_url(), PRODUCTION_API_URL);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.storage, StorageBackend::File);
    }

    #[test]
    fn test_development_ignores_api_url() {
        let config = Config {
            environment: Environment::Development,
            api_url: Some("https://staging.example.com/api".to_string()),
            ..Config::default()
        };
        assert_eq!(config.base_url(), DEVELOPMENT_API_URL);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                (ENV_API_URL, "https://staging.example.com/api/"),
                (ENV_TIMEOUT_MS, "5000"),
                (ENV_STORAGE, "keyring"),
            ]))
            .unwrap();
        assert_eq!(config.base_url(), "https://staging.example.com/api");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.storage, StorageBackend::Keyring);

        config.apply_overrides(lookup(&[(ENV_ENVIRONMENT, "dev")])).unwrap();
        assert_eq!(config.base_url(), DEVELOPMENT_API_URL);
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let mut config = Config::default();
        assert!(config.apply_overrides(lookup(&[(ENV_TIMEOUT_MS, "soon")])).is_err());
        assert!(config.apply_overrides(lookup(&[(ENV_ENVIRONMENT, "staging")])).is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join(CONFIG_FILE);

        assert_eq!(Config::load_from(&path).unwrap(), Config::default());

        let config = Config {
            environment: Environment::Development,
            storage: StorageBackend::Memory,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"environment": "development"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
    }
}
