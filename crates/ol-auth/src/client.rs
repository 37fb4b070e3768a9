use std::collections::HashMap;

use chrono::Utc;
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use crate::config::AuthConfig;
use crate::credentials::Credentials;
use crate::errors::{AuthError, Result};
use crate::models::{TokenErrorResponse, TokenResponse, UserInfoResponse, UserProfile};
use crate::pkce::{AuthorizationRequest, CHALLENGE_METHOD, PkceChallenge, generate_state};

const BODY_SNIPPET_LEN: usize = 200;

/// HTTP client for the identity provider
///
/// Every call is a single attempt; retry policy belongs to the caller.
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: AuthConfig,
    http: Client,
}

impl AuthClient {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request);
        if let Some(user_agent) = config.user_agent.as_deref() {
            builder = builder.user_agent(user_agent);
        }

        Ok(Self {
            http: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start an interactive login: fresh PKCE pair, fresh state, authorize URL
    #[instrument(skip(self))]
    pub fn authorization_request(&self) -> Result<AuthorizationRequest> {
        let pkce = PkceChallenge::generate()?;
        let state = generate_state()?;

        let mut url = self.config.authorize_endpoint()?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &self.config.scope)
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.code_challenge)
            .append_pair("code_challenge_method", CHALLENGE_METHOD);
        if let Some(audience) = self.config.audience.as_deref() {
            url.query_pairs_mut().append_pair("audience", audience);
        }

        debug!("Built authorize URL for {}", self.config.domain);
        Ok(AuthorizationRequest { url, state, pkce })
    }

    /// Validate the redirect callback and extract the authorization code
    #[instrument(skip(self, redirect_url, expected_state))]
    pub fn parse_redirect(&self, redirect_url: &str, expected_state: &str) -> Result<String> {
        let url = Url::parse(redirect_url)?;
        let params: HashMap<_, _> = url.query_pairs().collect();

        if let Some(error) = params.get("error") {
            return Err(AuthError::CallbackError {
                error: error.to_string(),
                description: params.get("error_description").map(|d| d.to_string()),
            });
        }

        match params.get("state") {
            Some(actual) if actual == expected_state => {}
            _ => return Err(AuthError::CallbackStateMismatch),
        }

        params
            .get("code")
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string())
            .ok_or(AuthError::InvalidRedirect)
    }

    /// Exchange an authorization code (plus PKCE verifier) for credentials
    #[instrument(skip(self, code, code_verifier))]
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<Credentials> {
        debug!("Exchanging authorization code for tokens");
        let issued_at = Utc::now();
        let response = self
            .http
            .post(self.config.token_endpoint()?)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.config.client_id.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::TokenExchangeFailed(
                error_summary(response).await,
            ));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("undecodable response: {}", e)))?;
        if token_response.id_token.as_deref().is_none_or(str::is_empty) {
            return Err(AuthError::TokenExchangeFailed(
                "response is missing id_token".to_string(),
            ));
        }

        Ok(Credentials::from_response(token_response, issued_at))
    }

    /// Exchange a refresh token for new credentials.
    ///
    /// `refresh_token` in the result is only set when the provider rotated it.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credentials> {
        debug!("Refreshing access token");
        let issued_at = Utc::now();
        let response = self
            .http
            .post(self.config.token_endpoint()?)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::RefreshFailed(error_summary(response).await));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("undecodable response: {}", e)))?;

        Ok(Credentials::from_response(token_response, issued_at))
    }

    /// Fetch the profile belonging to `access_token`
    #[instrument(skip(self, access_token))]
    pub async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile> {
        debug!("Fetching user profile");
        let response = self
            .http
            .get(self.config.userinfo_endpoint()?)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::ProfileFetchFailed(format!(
                "HTTP {}: {}",
                status,
                snippet(&body)
            )));
        }

        let info: UserInfoResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ProfileFetchFailed(format!("undecodable response: {}", e)))?;
        info.try_into()
    }
}

/// Describe a failed token endpoint response without echoing secrets back
async fn error_summary(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<TokenErrorResponse>(&body) {
        Ok(err) => match err.error_description {
            Some(description) => format!("HTTP {}: {} ({})", status, err.error, description),
            None => format!("HTTP {}: {}", status, err.error),
        },
        Err(_) => format!("HTTP {}: {}", status, snippet(&body)),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}
