use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TOKEN_EXPIRY_SKEW;
use crate::models::TokenResponse;

/// Tokens issued by one exchange with the identity provider
///
/// Never mutated: the next exchange produces a new value.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub token_type: String,
}

impl Credentials {
    /// Build credentials from a token response received at `issued_at`.
    ///
    /// The lifetime is always the provider-declared `expires_in`.
    pub fn from_response(response: TokenResponse, issued_at: DateTime<Utc>) -> Self {
        let lifetime = i64::try_from(response.expires_in).unwrap_or(i64::MAX);
        let expires_at = issued_at
            .checked_add_signed(chrono::Duration::seconds(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            access_token: response.access_token,
            id_token: response.id_token.unwrap_or_default(),
            refresh_token: response.refresh_token,
            expires_at,
            scope: response.scope,
            token_type: response.token_type,
        }
    }

    /// Whether the access token is expired or about to be
    pub fn is_expired(&self) -> bool {
        let skew = chrono::Duration::from_std(TOKEN_EXPIRY_SKEW)
            .unwrap_or(chrono::Duration::seconds(300));
        Utc::now() + skew >= self.expires_at
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .finish()
    }
}
