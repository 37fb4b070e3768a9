use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::errors::AuthErrorKind;

/// Logical names of the secrets kept in secure storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretName {
    AccessToken,
    RefreshToken,
    IdToken,
    CachedProfile,
}

impl SecretName {
    pub const ALL: [SecretName; 4] = [
        SecretName::AccessToken,
        SecretName::RefreshToken,
        SecretName::IdToken,
        SecretName::CachedProfile,
    ];

    /// Stable name used as the storage key
    pub fn as_str(self) -> &'static str {
        match self {
            SecretName::AccessToken => "accessToken",
            SecretName::RefreshToken => "refreshToken",
            SecretName::IdToken => "idToken",
            SecretName::CachedProfile => "cachedProfileBytes",
        }
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secure storage failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Secret not found")]
    NotFound,

    #[error("Failed to read secret: {0}")]
    Read(String),

    #[error("Failed to write secret: {0}")]
    Write(String),

    #[error("Failed to delete secret: {0}")]
    Delete(String),
}

impl StoreError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            StoreError::NotFound => AuthErrorKind::NoStoredCredentials,
            StoreError::Read(_) => AuthErrorKind::StorageReadFailed,
            StoreError::Write(_) => AuthErrorKind::StorageWriteFailed,
            StoreError::Delete(_) => AuthErrorKind::StorageDeleteFailed,
        }
    }
}

/// Storage for the small set of named session secrets
///
/// Operations are synchronous; every backend is expected to be fast enough to
/// call from async code. Writes replace, they never append.
pub trait SecretStore: Send + Sync {
    /// Store `bytes` under `name`, replacing any previous value
    fn save(&self, name: SecretName, bytes: &[u8]) -> Result<(), StoreError>;

    /// Read the value stored under `name`
    fn retrieve(&self, name: SecretName) -> Result<Vec<u8>, StoreError>;

    /// Remove the value stored under `name`; a missing entry is not an error
    fn delete(&self, name: SecretName) -> Result<(), StoreError>;

    /// Remove every known secret, continuing past failures.
    ///
    /// Returns the first failure encountered, if any.
    fn delete_all(&self) -> Result<(), StoreError> {
        let mut first_error = None;

        for name in SecretName::ALL {
            match self.delete(name) {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(e) => {
                    tracing::warn!("Failed to delete {}: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// In-memory secret store for testing and ephemeral sessions
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    secrets: Arc<RwLock<HashMap<SecretName, Vec<u8>>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of secrets currently held
    pub fn len(&self) -> usize {
        self.secrets.read().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretStore for MemorySecretStore {
    fn save(&self, name: SecretName, bytes: &[u8]) -> Result<(), StoreError> {
        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| StoreError::Write("Lock poisoned".to_string()))?;
        secrets.remove(&name);
        secrets.insert(name, bytes.to_vec());
        Ok(())
    }

    fn retrieve(&self, name: SecretName) -> Result<Vec<u8>, StoreError> {
        self.secrets
            .read()
            .map_err(|_| StoreError::Read("Lock poisoned".to_string()))?
            .get(&name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn delete(&self, name: SecretName) -> Result<(), StoreError> {
        self.secrets
            .write()
            .map_err(|_| StoreError::Delete("Lock poisoned".to_string()))?
            .remove(&name);
        Ok(())
    }
}
