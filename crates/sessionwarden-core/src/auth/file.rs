use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::storage::TokenStorage;

/// Token file name in cache directory
pub const TOKEN_FILE: &str = "tokens.sealed.json";

const FILE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// On-disk layout. The salt stays fixed for the life of the file; every
/// write gets a fresh nonce.
#[derive(Serialize, Deserialize)]
struct SealedFile {
    version: u8,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// Token storage in a single file, sealed with ChaCha20-Poly1305 under a key
/// derived from a passphrase with Argon2.
pub struct EncryptedFileStorage {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    entries: Mutex<HashMap<String, String>>,
}

impl EncryptedFileStorage {
    /// Open the file at `path`, or prepare a new one if it doesn't exist yet.
    /// Fails if the file exists but can't be decrypted with `passphrase`.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            let salt: [u8; SALT_LEN] = rand::random();
            let cipher = Self::derive_cipher(passphrase, &salt)?;
            debug!(path = %path.display(), "Token file not found, starting empty");
            return Ok(Self {
                path,
                salt,
                cipher,
                entries: Mutex::new(HashMap::new()),
            });
        }

        let contents = std::fs::read_to_string(&path).context("Failed to read token file")?;
        let sealed: SealedFile =
            serde_json::from_str(&contents).context("Failed to parse token file")?;
        if sealed.version != FILE_VERSION {
            return Err(anyhow!("Unsupported token file version {}", sealed.version));
        }
        let salt: [u8; SALT_LEN] = sealed
            .salt
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("Token file has an invalid salt"))?;
        if sealed.nonce.len() != NONCE_LEN {
            return Err(anyhow!("Token file has an invalid nonce"));
        }

        let cipher = Self::derive_cipher(passphrase, &salt)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|_| anyhow!("Failed to decrypt token file (wrong passphrase or corrupt file)"))?;
        let entries: HashMap<String, String> =
            serde_json::from_slice(&plaintext).context("Failed to parse decrypted tokens")?;

        Ok(Self {
            path,
            salt,
            cipher,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<ChaCha20Poly1305> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| anyhow!("Failed to derive token file key: {}", e))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
    }

    /// Seal the current entries and write them out. Caller holds the lock.
    fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        let plaintext = serde_json::to_vec(entries)?;
        let nonce: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| anyhow!("Failed to encrypt tokens"))?;

        let sealed = SealedFile {
            version: FILE_VERSION,
            salt: self.salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(&sealed)?;
        std::fs::write(&self.path, contents).context("Failed to write token file")?;
        Ok(())
    }
}

impl TokenStorage for EncryptedFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}
