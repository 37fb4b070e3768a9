use serde::{Deserialize, Serialize};

use crate::errors::{AuthError, Result};

/// Token endpoint response (from both code and refresh_token grants)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token endpoint error body
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Userinfo endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(rename = "oauthId", default)]
    pub oauth_id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

impl TryFrom<UserInfoResponse> for UserProfile {
    type Error = AuthError;

    fn try_from(info: UserInfoResponse) -> Result<Self> {
        if info.sub.trim().is_empty() {
            return Err(AuthError::ProfileFetchFailed(
                "userinfo response has an empty subject".to_string(),
            ));
        }

        Ok(UserProfile {
            external_auth_id: info.oauth_id.unwrap_or_else(|| info.sub.clone()),
            subject_id: info.sub,
            email: info.email,
            display_name: info.name,
            picture_url: info.picture,
            email_verified: info.email_verified,
        })
    }
}

/// Signed-in user's profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    /// Provider subject claim; stable across sessions
    pub subject_id: String,
    pub external_auth_id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture_url: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Result<UserProfile> {
        let info: UserInfoResponse = serde_json::from_str(json)?;
        info.try_into()
    }

    #[test]
    fn test_full_userinfo() {
        let profile = decode(
            r#"{
                "sub": "auth0|123",
                "oauthId": "google-oauth2|999",
                "email": "ada@example.com",
                "name": "Ada",
                "picture": "https://example.com/ada.png",
                "email_verified": true
            }"#,
        )
        .unwrap();

        assert_eq!(profile.subject_id, "auth0|123");
        assert_eq!(profile.external_auth_id, "google-oauth2|999");
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
        assert_eq!(
            profile.picture_url.as_deref(),
            Some("https://example.com/ada.png")
        );
        assert!(profile.email_verified);
    }

    #[test]
    fn test_minimal_userinfo_uses_defaults() {
        let profile = decode(r#"{"sub": "auth0|123", "email": "ada@example.com"}"#).unwrap();

        assert_eq!(profile.external_auth_id, "auth0|123");
        assert_eq!(profile.display_name, None);
        assert_eq!(profile.picture_url, None);
        assert!(!profile.email_verified);
    }

    #[test]
    fn test_empty_subject_is_rejected() {
        let result = decode(r#"{"sub": "", "email": "ada@example.com"}"#);
        assert!(matches!(result, Err(AuthError::ProfileFetchFailed(_))));
    }

    #[test]
    fn test_missing_subject_fails_decode() {
        let result = decode(r#"{"email": "ada@example.com"}"#);
        assert!(matches!(result, Err(AuthError::Serde(_))));
    }

    #[test]
    fn test_token_response_optional_fields() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "at", "expires_in": 86400}"#).unwrap();

        assert_eq!(response.token_type, "Bearer");
        assert!(response.id_token.is_none());
        assert!(response.refresh_token.is_none());
        assert!(response.scope.is_none());
    }
}
