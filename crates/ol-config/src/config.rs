use std::path::PathBuf;
use std::time::Duration;

use ol_auth::config::{DEFAULT_KEYRING_SERVICE, DEFAULT_SCOPE};
use ol_auth::{AuthConfig, HttpTimeouts};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::loader::ConfigError;

pub const DEFAULT_REDIRECT_URI: &str = "overlookme://callback";

/// On-disk application configuration (`config.toml`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auth: AuthSection,
    pub storage: StorageSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub domain: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub audience: Option<String>,
    /// Overrides `https://{domain}/` as the base of every endpoint
    pub issuer: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub keyring_service: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        let timeouts = HttpTimeouts::default();
        Self {
            domain: String::new(),
            client_id: String::new(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scope: None,
            audience: None,
            issuer: None,
            connect_timeout_secs: timeouts.connect.as_secs(),
            request_timeout_secs: timeouts.request.as_secs(),
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One OS keychain entry per secret
    #[default]
    Keyring,
    /// Encrypted files, key from the keyring or a passphrase
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    /// Directory for the file backend; platform data dir when unset
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Build the runtime auth configuration
    pub fn to_auth_config(&self) -> Result<AuthConfig, ConfigError> {
        let auth = &self.auth;
        if auth.domain.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "auth.domain",
            });
        }
        if auth.client_id.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "auth.client_id",
            });
        }

        let redirect_uri = parse_url("auth.redirect_uri", &auth.redirect_uri)?;
        let mut config = AuthConfig::new(auth.domain.trim(), auth.client_id.trim(), redirect_uri)?
            .with_scope(auth.scope.as_deref().unwrap_or(DEFAULT_SCOPE))
            .with_timeouts(HttpTimeouts {
                connect: Duration::from_secs(auth.connect_timeout_secs),
                request: Duration::from_secs(auth.request_timeout_secs),
            });

        if let Some(audience) = auth.audience.as_deref() {
            config = config.with_audience(audience);
        }
        if let Some(issuer) = auth.issuer.as_deref() {
            config = config.with_issuer(parse_url("auth.issuer", issuer)?);
        }
        config.keyring_service = auth.keyring_service.clone();

        Ok(config)
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })
}
