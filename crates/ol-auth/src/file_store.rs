use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs2::FileExt;
use tracing::{debug, error};
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptedBlob, EncryptionKey};
use crate::errors::{AuthError, Result};
use crate::key_manager::{KeyManager, KeyOptions};
use crate::secret::PassphraseProvider;
use crate::store::{SecretName, SecretStore, StoreError};

/// File-based encrypted secret store
///
/// Fallback for hosts without a usable OS keychain. Every secret is an
/// AES-256-GCM blob bound to its logical name.
///
/// # Directory Structure
/// ```text
/// ~/.local/share/overlook/
/// ├── meta.json                  # Key metadata
/// ├── lock                       # Advisory lock file
/// └── secrets/
///     ├── accessToken.json
///     ├── refreshToken.json
///     ├── idToken.json
///     └── cachedProfileBytes.json
/// ```
#[derive(Debug)]
pub struct FileSecretStore {
    storage_dir: PathBuf,
    secrets_dir: PathBuf,
    lock_file: PathBuf,
    key_manager: RwLock<KeyManager>,
}

impl FileSecretStore {
    /// Open (or create) a store rooted at `storage_dir`
    pub fn open(
        storage_dir: impl AsRef<Path>,
        options: KeyOptions,
        passphrase: &dyn PassphraseProvider,
    ) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        let secrets_dir = storage_dir.join("secrets");
        let lock_file = storage_dir.join("lock");

        fs::create_dir_all(&secrets_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(&storage_dir, perms.clone())?;
            fs::set_permissions(&secrets_dir, perms)?;
        }

        let key_manager = KeyManager::open(&storage_dir, options, passphrase)?;
        debug!(
            "Opened file secret store at {} ({:?} key)",
            storage_dir.display(),
            key_manager.source()
        );

        Ok(Self {
            storage_dir,
            secrets_dir,
            lock_file,
            key_manager: RwLock::new(key_manager),
        })
    }

    /// Default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("com", "overlook", "overlook")
            .ok_or_else(|| {
                AuthError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine data directory",
                ))
            })?;

        Ok(project_dirs.data_dir().to_path_buf())
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn secret_path(&self, name: SecretName) -> PathBuf {
        self.secrets_dir.join(format!("{}.json", name.as_str()))
    }

    /// Exclusive advisory lock, held until the returned file is dropped
    fn acquire_lock(&self) -> Result<fs::File> {
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| AuthError::LockTimeout)?;

        Ok(lock_file)
    }

    fn read_blob(&self, name: SecretName) -> Result<Option<Vec<u8>>> {
        let path = self.secret_path(name);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let encrypted: EncryptedBlob = serde_json::from_str(&content)
            .map_err(|e| AuthError::InvalidResponse(format!("Invalid encrypted data: {}", e)))?;

        let key_manager = self
            .key_manager
            .read()
            .map_err(|_| AuthError::Crypto("Key lock poisoned".to_string()))?;
        let plaintext = crypto::decrypt(key_manager.key(), &encrypted, name.as_str())?;

        Ok(Some(plaintext))
    }

    fn write_blob(&self, name: SecretName, bytes: &[u8]) -> Result<()> {
        let key_manager = self
            .key_manager
            .read()
            .map_err(|_| AuthError::Crypto("Key lock poisoned".to_string()))?;
        write_encrypted(&self.secret_path(name), key_manager.key(), name, bytes)
    }

    fn remove_blob(&self, name: SecretName) -> Result<()> {
        match fs::remove_file(self.secret_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rotate the data key and re-encrypt every stored secret.
    ///
    /// Secrets are staged under the new key before it is committed, so a
    /// failure before the final renames leaves the store readable with the
    /// old key.
    pub fn rotate_key(&self, passphrase: &dyn PassphraseProvider) -> Result<()> {
        let _lock = self.acquire_lock()?;

        let mut plaintexts = Vec::new();
        for name in SecretName::ALL {
            if let Some(bytes) = self.read_blob(name)? {
                plaintexts.push((name, Zeroizing::new(bytes)));
            }
        }

        let mut key_manager = self
            .key_manager
            .write()
            .map_err(|_| AuthError::Crypto("Key lock poisoned".to_string()))?;
        let pending = key_manager.begin_rotation(passphrase)?;

        let mut staged = Vec::with_capacity(plaintexts.len());
        for (name, bytes) in &plaintexts {
            let path = self.secret_path(*name).with_extension(ROTATING_EXT);
            let written = write_encrypted(&path, pending.key(), *name, bytes);
            staged.push(path);
            if let Err(e) = written {
                discard_staged(&staged);
                return Err(e);
            }
        }

        if let Err(e) = key_manager.commit_rotation(pending) {
            error!("Key rotation aborted: {}", e);
            discard_staged(&staged);
            return Err(e);
        }

        for ((name, _), path) in plaintexts.iter().zip(&staged) {
            fs::rename(path, self.secret_path(*name))?;
        }
        debug!("Rotated file store key ({} secrets)", staged.len());

        Ok(())
    }
}

const ROTATING_EXT: &str = "rotating";

/// Encrypt `bytes` for `name` and write them to `path` atomically
fn write_encrypted(path: &Path, key: &EncryptionKey, name: SecretName, bytes: &[u8]) -> Result<()> {
    let encrypted = crypto::encrypt(key, bytes, name.as_str())?;
    let encrypted_json = serde_json::to_string_pretty(&encrypted)?;

    // Atomic write: temp file, sync, rename
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, encrypted_json)?;
    fs::File::open(&temp_path)?.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn discard_staged(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                error!("Failed to remove {}: {}", path.display(), e);
            }
            _ => {}
        }
    }
}

impl SecretStore for FileSecretStore {
    fn save(&self, name: SecretName, bytes: &[u8]) -> std::result::Result<(), StoreError> {
        let _lock = self
            .acquire_lock()
            .map_err(|e| StoreError::Write(e.to_string()))?;

        self.remove_blob(name)
            .and_then(|()| self.write_blob(name, bytes))
            .map_err(|e| {
                error!("Failed to save {}: {}", name, e);
                StoreError::Write(e.to_string())
            })
    }

    fn retrieve(&self, name: SecretName) -> std::result::Result<Vec<u8>, StoreError> {
        match self.read_blob(name) {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(StoreError::NotFound),
            Err(e) => {
                error!("Failed to load {}: {}", name, e);
                Err(StoreError::Read(e.to_string()))
            }
        }
    }

    fn delete(&self, name: SecretName) -> std::result::Result<(), StoreError> {
        let _lock = self
            .acquire_lock()
            .map_err(|e| StoreError::Delete(e.to_string()))?;

        self.remove_blob(name)
            .map_err(|e| StoreError::Delete(e.to_string()))
    }
}
