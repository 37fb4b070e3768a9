use std::fs;
use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::{EncryptionKey, fill_random};
use crate::errors::{AuthError, Result};
use crate::secret::PassphraseProvider;

const SALT_LEN: usize = 32;
const META_FILE: &str = "meta.json";
#[cfg(feature = "keyring-support")]
const KEYRING_USER: &str = "file-store-key:v1";

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // m=64MB, t=3, p=1
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 1,
        }
    }
}

/// Where the data key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Keyring,
    Passphrase,
}

/// Metadata for key derivation and storage format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMeta {
    pub version: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<KeySource>,
    /// Base64-encoded salt for Argon2id (if using passphrase)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_salt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfParams>,
}

impl Default for KeyMeta {
    fn default() -> Self {
        Self {
            version: 1,
            created_at: chrono::Utc::now(),
            source: None,
            passphrase_salt: None,
            kdf: None,
        }
    }
}

/// How a [`KeyManager`] obtains its key
#[derive(Debug, Clone)]
pub struct KeyOptions {
    /// Keyring service holding the data key; `None` skips the keyring entirely
    pub keyring_service: Option<String>,
    /// Cost parameters for newly derived passphrase keys
    pub kdf: KdfParams,
}

impl KeyOptions {
    pub fn keyring(service: impl Into<String>) -> Self {
        Self {
            keyring_service: Some(service.into()),
            kdf: KdfParams::default(),
        }
    }

    pub fn passphrase_only(kdf: KdfParams) -> Self {
        Self {
            keyring_service: None,
            kdf,
        }
    }
}

/// How [`KeyManager::open`] should obtain the key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPlan<'a> {
    Passphrase,
    Keyring {
        service: &'a str,
        /// Only stores that never settled on a source may fall back
        passphrase_fallback: bool,
    },
}

fn plan_key(source: Option<KeySource>, service: Option<&str>) -> Result<KeyPlan<'_>> {
    match (source, service) {
        (Some(KeySource::Passphrase), _) | (None, None) => Ok(KeyPlan::Passphrase),
        (Some(KeySource::Keyring), None) => Err(AuthError::Keyring(
            "File store key is kept in the keyring but no keyring service is configured"
                .to_string(),
        )),
        (source, Some(service)) => Ok(KeyPlan::Keyring {
            service,
            passphrase_fallback: source.is_none(),
        }),
    }
}

fn write_meta_to(path: &Path, meta: &KeyMeta) -> Result<()> {
    let meta_json = serde_json::to_string_pretty(meta)?;
    fs::write(path, meta_json)?;
    Ok(())
}

/// A rotated key that has not been persisted yet
pub struct PendingRotation {
    key: EncryptionKey,
    meta: KeyMeta,
}

impl PendingRotation {
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }
}

impl std::fmt::Debug for PendingRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRotation")
            .field("meta", &self.meta)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Manages the file store data key with OS keyring and passphrase fallback
pub struct KeyManager {
    meta: KeyMeta,
    meta_path: PathBuf,
    key: EncryptionKey,
    options: KeyOptions,
}

impl KeyManager {
    /// Load or create the data key for the store rooted at `storage_dir`.
    ///
    /// A key already in the keyring wins. A brand new store gets a random key
    /// in the keyring when one is reachable, and a passphrase-derived key
    /// otherwise. Once a store records its key source it keeps it: a
    /// keyring-backed store fails to open while the keyring is unreachable.
    pub fn open(
        storage_dir: &Path,
        options: KeyOptions,
        passphrase: &dyn PassphraseProvider,
    ) -> Result<Self> {
        let meta_path = storage_dir.join(META_FILE);
        let fresh = !meta_path.exists();

        let mut meta: KeyMeta = if fresh {
            KeyMeta::default()
        } else {
            let content = fs::read_to_string(&meta_path)?;
            serde_json::from_str(&content)
                .map_err(|e| AuthError::InvalidResponse(format!("Invalid meta.json: {}", e)))?
        };

        let key = match plan_key(meta.source, options.keyring_service.as_deref())? {
            KeyPlan::Passphrase => Self::derive_from_passphrase(&mut meta, options.kdf, passphrase)?,
            KeyPlan::Keyring {
                service,
                passphrase_fallback,
            } => match Self::keyring_key(service, fresh) {
                Ok(key) => {
                    meta.source = Some(KeySource::Keyring);
                    key
                }
                Err(e) if passphrase_fallback => {
                    debug!("Keyring unavailable ({}), using passphrase fallback", e);
                    Self::derive_from_passphrase(&mut meta, options.kdf, passphrase)?
                }
                Err(e) => {
                    warn!("File store key is kept in the keyring, which is unavailable: {}", e);
                    return Err(e);
                }
            },
        };

        let manager = Self {
            meta,
            meta_path,
            key,
            options,
        };
        manager.write_meta()?;
        Ok(manager)
    }

    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn source(&self) -> Option<KeySource> {
        self.meta.source
    }

    /// Replace the data key. The caller re-encrypts existing data.
    pub fn rotate(&mut self, passphrase: &dyn PassphraseProvider) -> Result<()> {
        let pending = self.begin_rotation(passphrase)?;
        self.commit_rotation(pending)
    }

    /// Produce the next data key without persisting anything
    pub fn begin_rotation(&self, passphrase: &dyn PassphraseProvider) -> Result<PendingRotation> {
        let mut meta = self.meta.clone();
        let key = match (meta.source, self.options.keyring_service.as_deref()) {
            (Some(KeySource::Keyring), Some(_)) => EncryptionKey::generate()?,
            (Some(KeySource::Keyring), None) => {
                return Err(AuthError::Keyring(
                    "File store key is kept in the keyring but no keyring service is configured"
                        .to_string(),
                ));
            }
            _ => {
                // Fresh salt gives a fresh key for the same passphrase
                meta.passphrase_salt = None;
                Self::derive_from_passphrase(&mut meta, self.options.kdf, passphrase)?
            }
        };
        meta.created_at = chrono::Utc::now();

        Ok(PendingRotation { key, meta })
    }

    /// Persist a key from [`begin_rotation`](Self::begin_rotation) and start
    /// using it. On error the current key stays in effect.
    pub fn commit_rotation(&mut self, pending: PendingRotation) -> Result<()> {
        write_meta_to(&self.meta_path, &pending.meta)?;

        if pending.meta.source == Some(KeySource::Keyring) {
            let service = self.options.keyring_service.as_deref().unwrap_or_default();
            if let Err(e) = Self::save_to_keyring(service, &pending.key) {
                if let Err(restore) = self.write_meta() {
                    warn!("Failed to restore key metadata: {}", restore);
                }
                return Err(e);
            }
        }

        self.key = pending.key;
        self.meta = pending.meta;
        Ok(())
    }

    fn write_meta(&self) -> Result<()> {
        write_meta_to(&self.meta_path, &self.meta)
    }

    #[cfg(feature = "keyring-support")]
    fn keyring_key(service: &str, fresh: bool) -> Result<EncryptionKey> {
        match Self::load_from_keyring(service) {
            Ok(key) => {
                debug!("Loaded file store key from OS keyring");
                Ok(key)
            }
            Err(AuthError::NoStoredCredentials) => {
                if !fresh {
                    warn!("File store key missing from keyring; existing secrets become unreadable");
                }
                let key = EncryptionKey::generate()?;
                Self::save_to_keyring(service, &key)?;
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(not(feature = "keyring-support"))]
    fn keyring_key(_service: &str, _fresh: bool) -> Result<EncryptionKey> {
        Err(AuthError::Keyring("keyring support not compiled in".to_string()))
    }

    #[cfg(feature = "keyring-support")]
    fn load_from_keyring(service: &str) -> Result<EncryptionKey> {
        let entry = keyring::Entry::new(service, KEYRING_USER)
            .map_err(|e| AuthError::Keyring(format!("Failed to access keyring: {}", e)))?;

        let key_b64 = entry.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => AuthError::NoStoredCredentials,
            e => AuthError::Keyring(format!("Failed to read from keyring: {}", e)),
        })?;

        let key_bytes = STANDARD
            .decode(key_b64)
            .map_err(|_| AuthError::CorruptedStore)?;
        let key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| AuthError::CorruptedStore)?;

        Ok(EncryptionKey::from_bytes(key))
    }

    #[cfg(feature = "keyring-support")]
    fn save_to_keyring(service: &str, key: &EncryptionKey) -> Result<()> {
        let entry = keyring::Entry::new(service, KEYRING_USER)
            .map_err(|e| AuthError::Keyring(format!("Failed to access keyring: {}", e)))?;

        entry
            .set_password(&STANDARD.encode(key.as_bytes()))
            .map_err(|e| AuthError::Keyring(format!("Failed to write to keyring: {}", e)))
    }

    #[cfg(not(feature = "keyring-support"))]
    fn save_to_keyring(_service: &str, _key: &EncryptionKey) -> Result<()> {
        Err(AuthError::Keyring("keyring support not compiled in".to_string()))
    }

    /// Derive key from passphrase using Argon2id
    fn derive_from_passphrase(
        meta: &mut KeyMeta,
        default_params: KdfParams,
        passphrase: &dyn PassphraseProvider,
    ) -> Result<EncryptionKey> {
        let salt = match meta.passphrase_salt.as_deref() {
            Some(salt_b64) => STANDARD
                .decode(salt_b64)
                .map_err(|_| AuthError::CorruptedStore)?,
            None => {
                let mut salt = vec![0u8; SALT_LEN];
                fill_random(&mut salt)?;
                meta.passphrase_salt = Some(STANDARD.encode(&salt));
                salt
            }
        };
        let kdf = *meta.kdf.get_or_insert(default_params);

        let passphrase = passphrase
            .passphrase("Enter passphrase for secret storage")
            .ok_or_else(|| AuthError::Crypto("No passphrase available".to_string()))?;

        let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
            .map_err(|e| AuthError::Crypto(format!("Invalid Argon2 params: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| AuthError::Crypto(format!("Key derivation failed: {}", e)))?;

        meta.source = Some(KeySource::Passphrase);
        Ok(EncryptionKey::from_bytes(key))
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("meta", &self.meta)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
