use tracing::debug;

use crate::store::{SecretName, SecretStore, StoreError};

/// Secret store backed by the OS keychain
///
/// Each logical name is one keychain entry under the configured service
/// (macOS Keychain, Windows Credential Manager, Linux kernel keyutils).
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, name: SecretName) -> Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(&self.service, name.as_str())
    }
}

impl SecretStore for KeyringSecretStore {
    fn save(&self, name: SecretName, bytes: &[u8]) -> Result<(), StoreError> {
        debug!(service = %self.service, %name, "Saving secret to keyring");

        // Replace rather than update so a stale entry can never linger
        self.delete(name)
            .map_err(|e| StoreError::Write(format!("Failed to replace {}: {}", name, e)))?;

        let entry = self
            .entry(name)
            .map_err(|e| StoreError::Write(format!("Failed to access keyring: {}", e)))?;
        entry
            .set_secret(bytes)
            .map_err(|e| StoreError::Write(format!("Failed to write {}: {}", name, e)))
    }

    fn retrieve(&self, name: SecretName) -> Result<Vec<u8>, StoreError> {
        let entry = self
            .entry(name)
            .map_err(|e| StoreError::Read(format!("Failed to access keyring: {}", e)))?;

        entry.get_secret().map_err(|e| match e {
            keyring::Error::NoEntry => StoreError::NotFound,
            e => StoreError::Read(format!("Failed to read {}: {}", name, e)),
        })
    }

    fn delete(&self, name: SecretName) -> Result<(), StoreError> {
        let entry = self
            .entry(name)
            .map_err(|e| StoreError::Delete(format!("Failed to access keyring: {}", e)))?;

        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Delete(format!(
                "Failed to delete {}: {}",
                name, e
            ))),
        }
    }
}
