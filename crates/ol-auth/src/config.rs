use std::time::Duration;

use url::Url;

use crate::errors::Result;

/// Identity provider endpoint paths, relative to the issuer
pub mod endpoints {
    pub const AUTHORIZE: &str = "authorize";
    pub const TOKEN: &str = "oauth/token";
    pub const USERINFO: &str = "userinfo";
}

/// Scopes requested by default; `offline_access` yields a refresh token
pub const DEFAULT_SCOPE: &str = "openid profile email offline_access";

/// Default keyring service name
pub const DEFAULT_KEYRING_SERVICE: &str = "overlook-me";

/// Time skew for token expiration (refresh 5 minutes early)
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(300);

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Configuration for [`AuthClient`](crate::AuthClient)
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Identity provider tenant domain, e.g. `overlook.eu.auth0.com`
    pub domain: String,

    pub client_id: String,

    /// Redirect URI registered for the app (usually a custom scheme)
    pub redirect_uri: Url,

    pub scope: String,

    /// API audience, if the provider should mint an API access token
    pub audience: Option<String>,

    /// Base URL for every endpoint. Defaults to `https://{domain}/`.
    pub issuer: Url,

    pub http_timeouts: HttpTimeouts,

    pub user_agent: Option<String>,

    /// Service name for OS keychain entries
    pub keyring_service: String,
}

impl AuthConfig {
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: Url,
    ) -> Result<Self> {
        let domain = domain.into();
        let issuer = Url::parse(&format!("https://{}/", domain.trim_end_matches('/')))?;

        Ok(Self {
            domain,
            client_id: client_id.into(),
            redirect_uri,
            scope: DEFAULT_SCOPE.to_string(),
            audience: None,
            issuer,
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some(concat!("overlook/", env!("CARGO_PKG_VERSION")).to_string()),
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
        })
    }

    /// Point every endpoint at another base URL (mock servers, proxies)
    pub fn with_issuer(mut self, issuer: Url) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_timeouts(mut self, http_timeouts: HttpTimeouts) -> Self {
        self.http_timeouts = http_timeouts;
        self
    }

    pub fn authorize_endpoint(&self) -> Result<Url> {
        self.endpoint(endpoints::AUTHORIZE)
    }

    pub fn token_endpoint(&self) -> Result<Url> {
        self.endpoint(endpoints::TOKEN)
    }

    pub fn userinfo_endpoint(&self) -> Result<Url> {
        self.endpoint(endpoints::USERINFO)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        // Url::join drops the last segment unless the base ends with '/'
        let mut base = self.issuer.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(base.join(path)?)
    }
}
