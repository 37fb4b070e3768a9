use zeroize::Zeroizing;

/// Source of the passphrase used to derive the file store key
///
/// Consulted only when the OS keyring cannot hold the data key.
pub trait PassphraseProvider: Send + Sync {
    /// Returns None if no passphrase is available.
    fn passphrase(&self, prompt: &str) -> Option<Zeroizing<String>>;
}

/// Provider that never yields a passphrase (keyring-only operation)
#[derive(Debug, Clone, Default)]
pub struct NoPassphrase;

impl PassphraseProvider for NoPassphrase {
    fn passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
        None
    }
}

/// Fixed passphrase, mostly for tests
#[derive(Clone)]
pub struct StaticPassphrase {
    secret: Zeroizing<String>,
}

impl StaticPassphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }
}

impl std::fmt::Debug for StaticPassphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticPassphrase([REDACTED])")
    }
}

impl PassphraseProvider for StaticPassphrase {
    fn passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
        Some(self.secret.clone())
    }
}

/// Reads the passphrase from an environment variable
#[derive(Debug, Clone)]
pub struct EnvPassphrase {
    var: String,
}

impl EnvPassphrase {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl PassphraseProvider for EnvPassphrase {
    fn passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
        std::env::var(&self.var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(Zeroizing::new)
    }
}
