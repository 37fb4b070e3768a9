use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Authentication error types
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body_snippet}")]
    Http {
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("Authorization code exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed - refresh token may be invalid or expired: {0}")]
    RefreshFailed(String),

    #[error("Profile fetch failed - access token may be invalid or expired: {0}")]
    ProfileFetchFailed(String),

    #[error("OAuth state mismatch - possible CSRF attack")]
    CallbackStateMismatch,

    #[error("Identity provider reported an error: {error}{}", describe(.description))]
    CallbackError {
        error: String,
        description: Option<String>,
    },

    #[error("Invalid redirect URI or missing code")]
    InvalidRedirect,

    #[error("No stored credentials")]
    NoStoredCredentials,

    #[error("Secure storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Secret storage is corrupted or was encrypted with a different key")]
    CorruptedStore,

    #[error("Storage is locked by another process")]
    LockTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    /// Project this error onto the coarse kind recorded in the session state
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::Network(_) => AuthErrorKind::Network,
            Self::TokenExchangeFailed(_) => AuthErrorKind::TokenExchangeFailed,
            Self::RefreshFailed(_) => AuthErrorKind::RefreshFailed,
            Self::ProfileFetchFailed(_) => AuthErrorKind::ProfileFetchFailed,
            Self::CallbackStateMismatch => AuthErrorKind::CallbackStateMismatch,
            Self::CallbackError { .. } => AuthErrorKind::CallbackError,
            Self::InvalidRedirect | Self::UrlParse(_) => AuthErrorKind::InvalidRedirect,
            Self::NoStoredCredentials => AuthErrorKind::NoStoredCredentials,
            Self::Store(err) => err.kind(),
            Self::Keyring(_) | Self::CorruptedStore | Self::LockTimeout | Self::Io(_) => {
                AuthErrorKind::StorageReadFailed
            }
            Self::Http { .. } | Self::Crypto(_) | Self::Serde(_) | Self::InvalidResponse(_) => {
                AuthErrorKind::Internal
            }
        }
    }
}

/// Error kinds exposed through `SessionState::last_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthErrorKind {
    /// Nothing stored yet; a normal first-run state, not shown to users
    NoStoredCredentials,
    RefreshFailed,
    ProfileFetchFailed,
    TokenExchangeFailed,
    CallbackStateMismatch,
    CallbackError,
    InvalidRedirect,
    StorageReadFailed,
    StorageWriteFailed,
    StorageDeleteFailed,
    Network,
    Internal,
}

impl AuthErrorKind {
    /// Whether a launch-time session check reports this kind in `last_error`.
    ///
    /// Only transport-level failures qualify; rejections by the provider
    /// resolve silently to logged out.
    pub fn is_transport(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::StorageReadFailed
                | Self::StorageWriteFailed
                | Self::StorageDeleteFailed
        )
    }

    /// Whether the stored secrets are no longer usable and must be discarded
    pub fn forces_logout(self) -> bool {
        matches!(
            self,
            Self::NoStoredCredentials | Self::RefreshFailed | Self::ProfileFetchFailed
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}
