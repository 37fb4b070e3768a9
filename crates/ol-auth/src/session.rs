use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::client::AuthClient;
use crate::credentials::Credentials;
use crate::errors::{AuthError, AuthErrorKind, Result};
use crate::models::UserProfile;
use crate::pkce::AuthorizationRequest;
use crate::state::{Outcome, SessionHandle, SessionPhase, SessionState};
use crate::store::{SecretName, SecretStore, StoreError};

/// Owns the session lifecycle and is the only writer of [`SessionState`].
///
/// Operations are serialized: a login, renewal or logout started while
/// another one runs waits for it to settle.
pub struct SessionManager {
    client: AuthClient,
    store: Arc<dyn SecretStore>,
    state: watch::Sender<SessionState>,
    op_lock: Mutex<()>,
    pending: Mutex<Option<AuthorizationRequest>>,
}

/// Tokens handed to the session by a login, before the profile is known
struct SessionTokens {
    access_token: String,
    id_token: String,
    refresh_token: Option<String>,
}

impl From<Credentials> for SessionTokens {
    fn from(credentials: Credentials) -> Self {
        Self {
            access_token: credentials.access_token,
            id_token: credentials.id_token,
            refresh_token: credentials.refresh_token,
        }
    }
}

impl SessionManager {
    pub fn new(client: AuthClient, store: Arc<dyn SecretStore>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            client,
            store,
            state,
            op_lock: Mutex::new(()),
            pending: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    /// Read-only, subscribable view of the session
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.state.subscribe())
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Decide whether the stored credentials still describe a signed-in user.
    ///
    /// Never fails: every problem resolves to `Unauthenticated`, and only
    /// transport failures are recorded in `last_error`.
    #[instrument(skip_all)]
    pub async fn check_authentication(&self, cancel: &CancellationToken) -> Outcome<bool> {
        cancellable(cancel, self.run_check()).await
    }

    /// Exchange the stored refresh token for fresh credentials
    #[instrument(skip_all)]
    pub async fn renew_credentials(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Outcome<UserProfile>> {
        cancellable(cancel, self.run_renew()).await.transpose()
    }

    /// Start an interactive login and return the URL to open.
    ///
    /// Replaces any login that was started but never completed.
    #[instrument(skip_all)]
    pub async fn begin_login(&self) -> Result<Url> {
        let request = self.client.authorization_request()?;
        let url = request.url.clone();
        *self.pending.lock().await = Some(request);
        Ok(url)
    }

    /// Finish the login started by [`begin_login`](Self::begin_login) from
    /// the redirect the browser landed on.
    ///
    /// A redirect that does not answer the pending login is rejected without
    /// touching the session or the stored secrets.
    #[instrument(skip_all)]
    pub async fn handle_redirect(
        &self,
        redirect_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome<UserProfile>> {
        let login = async {
            let (code, code_verifier) = self.accept_redirect(redirect_url).await?;
            let tokens = async move {
                self.client
                    .exchange_authorization_code(&code, &code_verifier)
                    .await
                    .map(SessionTokens::from)
            };
            self.run_login(tokens).await
        };
        cancellable(cancel, login).await.transpose()
    }

    /// Exchange an authorization code obtained elsewhere and sign in
    #[instrument(skip_all)]
    pub async fn complete_login_with_code(
        &self,
        code: &str,
        code_verifier: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome<UserProfile>> {
        let tokens = async move {
            self.client
                .exchange_authorization_code(code, code_verifier)
                .await
                .map(SessionTokens::from)
        };
        cancellable(cancel, self.run_login(tokens)).await.transpose()
    }

    /// Sign in with tokens issued by the provider.
    ///
    /// A `None` refresh token removes any stale one from storage.
    #[instrument(skip_all)]
    pub async fn complete_login(
        &self,
        access_token: &str,
        id_token: &str,
        refresh_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Outcome<UserProfile>> {
        let tokens = SessionTokens {
            access_token: access_token.to_string(),
            id_token: id_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
        };
        cancellable(cancel, self.run_login(async { Ok(tokens) }))
            .await
            .transpose()
    }

    /// Forget every stored secret. Always ends `Unauthenticated`.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        let _op = self.op_lock.lock().await;
        self.pending.lock().await.take();

        let transition = Transition::begin(&self.state, SessionPhase::LoggingOut);
        let last_error = match self.store.delete_all() {
            Ok(()) => None,
            Err(err) => {
                warn!("Failed to clear secure storage on logout: {}", err);
                Some(err.kind())
            }
        };
        transition.settle(SessionPhase::Unauthenticated, last_error);
    }

    /// Stored access token, for authorizing API requests
    pub fn bearer_token(&self) -> Result<String> {
        self.read_secret(SecretName::AccessToken)?
            .ok_or(AuthError::NoStoredCredentials)
    }

    /// Profile cached by the last successful sign-in or check
    pub fn cached_profile(&self) -> Result<Option<UserProfile>> {
        match self.store.retrieve(SecretName::CachedProfile) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Match the redirect against the pending login and return the code and
    /// PKCE verifier to exchange.
    ///
    /// A state mismatch leaves the pending login in place for the genuine
    /// redirect; any other answer uses it up.
    async fn accept_redirect(&self, redirect_url: &str) -> Result<(String, String)> {
        let mut pending = self.pending.lock().await;
        let Some(request) = pending.as_ref() else {
            warn!("Ignoring redirect: no login in progress");
            return Err(AuthError::InvalidRedirect);
        };

        match self.client.parse_redirect(redirect_url, &request.state) {
            Ok(code) => {
                let request = pending.take().ok_or(AuthError::InvalidRedirect)?;
                Ok((code, request.pkce.code_verifier))
            }
            Err(AuthError::CallbackStateMismatch) => {
                warn!("Ignoring redirect with unexpected state");
                Err(AuthError::CallbackStateMismatch)
            }
            Err(err) => {
                pending.take();
                warn!("Login redirect rejected: {}", err);
                Err(err)
            }
        }
    }

    async fn run_check(&self) -> bool {
        let _op = self.op_lock.lock().await;
        let transition = Transition::begin(&self.state, SessionPhase::CheckingStoredCredentials);

        match self.validate_stored(&transition).await {
            Ok(profile) => {
                transition.settle(SessionPhase::Authenticated(profile), None);
                true
            }
            Err(err) => {
                self.settle_rejected(transition, &err);
                false
            }
        }
    }

    async fn run_renew(&self) -> Result<UserProfile> {
        let _op = self.op_lock.lock().await;
        let transition = Transition::begin(&self.state, SessionPhase::RenewingCredentials);

        match self.renew(&transition).await {
            Ok(profile) => {
                transition.settle(SessionPhase::Authenticated(profile.clone()), None);
                Ok(profile)
            }
            Err(err) => {
                self.settle_rejected(transition, &err);
                Err(err)
            }
        }
    }

    async fn run_login<F>(&self, tokens: F) -> Result<UserProfile>
    where
        F: Future<Output = Result<SessionTokens>>,
    {
        let _op = self.op_lock.lock().await;
        let transition = Transition::begin(&self.state, SessionPhase::CompletingLogin);

        let result = async {
            let tokens = tokens.await?;
            self.establish(&tokens).await
        }
        .await;

        match result {
            Ok(profile) => {
                transition.settle(SessionPhase::Authenticated(profile.clone()), None);
                Ok(profile)
            }
            Err(err) => {
                warn!("Login failed: {}", err);
                self.discard_secrets();
                transition.settle(SessionPhase::Unauthenticated, Some(err.kind()));
                Err(err)
            }
        }
    }

    async fn validate_stored(&self, transition: &Transition<'_>) -> Result<UserProfile> {
        let Some(access_token) = self.read_secret(SecretName::AccessToken)? else {
            debug!("No stored access token");
            return self.renew(transition).await;
        };

        match self.client.fetch_profile(&access_token).await {
            Ok(profile) => {
                self.cache_profile_quietly(&profile);
                Ok(profile)
            }
            Err(AuthError::ProfileFetchFailed(reason)) => {
                debug!("Stored access token rejected: {}", reason);
                self.renew(transition).await
            }
            Err(err) => Err(err),
        }
    }

    async fn renew(&self, transition: &Transition<'_>) -> Result<UserProfile> {
        let refresh_token = self
            .read_secret(SecretName::RefreshToken)?
            .ok_or(AuthError::NoStoredCredentials)?;
        transition.advance(SessionPhase::RenewingCredentials);

        let credentials = self.client.refresh(&refresh_token).await?;
        if credentials.is_expired() {
            warn!(
                "Renewed access token expires at {}, inside the refresh window",
                credentials.expires_at
            );
        }
        self.persist_refreshed(&credentials)?;

        let profile = self.client.fetch_profile(&credentials.access_token).await?;
        self.cache_profile_quietly(&profile);
        Ok(profile)
    }

    /// Fetch the profile for `tokens` and, once it is known, store everything
    async fn establish(&self, tokens: &SessionTokens) -> Result<UserProfile> {
        let profile = self.client.fetch_profile(&tokens.access_token).await?;

        self.store
            .save(SecretName::AccessToken, tokens.access_token.as_bytes())?;
        self.store
            .save(SecretName::IdToken, tokens.id_token.as_bytes())?;
        match tokens.refresh_token.as_deref() {
            Some(refresh_token) => self
                .store
                .save(SecretName::RefreshToken, refresh_token.as_bytes())?,
            None => self.store.delete(SecretName::RefreshToken)?,
        }
        self.cache_profile(&profile)?;

        info!("Signed in as {}", profile.subject_id);
        Ok(profile)
    }

    /// Keep the stored refresh token unless the provider rotated it
    fn persist_refreshed(&self, credentials: &Credentials) -> Result<()> {
        self.store
            .save(SecretName::AccessToken, credentials.access_token.as_bytes())?;
        if !credentials.id_token.is_empty() {
            self.store
                .save(SecretName::IdToken, credentials.id_token.as_bytes())?;
        }
        if let Some(refresh_token) = credentials.refresh_token.as_deref() {
            debug!("Refresh token was rotated");
            self.store
                .save(SecretName::RefreshToken, refresh_token.as_bytes())?;
        }
        Ok(())
    }

    fn cache_profile(&self, profile: &UserProfile) -> Result<()> {
        let bytes = serde_json::to_vec(profile)?;
        self.store.save(SecretName::CachedProfile, &bytes)?;
        Ok(())
    }

    fn cache_profile_quietly(&self, profile: &UserProfile) {
        if let Err(err) = self.cache_profile(profile) {
            warn!("Failed to cache user profile: {}", err);
        }
    }

    fn read_secret(&self, name: SecretName) -> Result<Option<String>> {
        match self.store.retrieve(name) {
            Ok(bytes) => {
                let value = String::from_utf8(bytes)
                    .map_err(|_| StoreError::Read(format!("{} is not valid UTF-8", name)))?;
                Ok(Some(value).filter(|v| !v.is_empty()))
            }
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn discard_secrets(&self) {
        if let Err(err) = self.store.delete_all() {
            warn!("Failed to discard stored secrets: {}", err);
        }
    }

    /// Resolve a failed check or renewal to `Unauthenticated`
    fn settle_rejected(&self, transition: Transition<'_>, err: &AuthError) {
        let kind = err.kind();
        if kind.forces_logout() {
            debug!("Stored credentials are no longer usable: {}", err);
            self.discard_secrets();
        } else {
            warn!("Could not validate stored credentials: {}", err);
        }

        let last_error = kind.is_transport().then_some(kind);
        transition.settle(SessionPhase::Unauthenticated, last_error);
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, operation: F) -> Outcome<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Operation cancelled");
            Outcome::Cancelled
        }
        output = operation => Outcome::Done(output),
    }
}

/// An in-flight phase change.
///
/// Dropping it without [`settle`](Self::settle) (cancellation, or the
/// future being dropped) puts back the phase held before the operation and
/// leaves `last_error` alone.
struct Transition<'a> {
    state: &'a watch::Sender<SessionState>,
    prior: SessionPhase,
    settled: bool,
}

impl<'a> Transition<'a> {
    fn begin(state: &'a watch::Sender<SessionState>, phase: SessionPhase) -> Self {
        let prior = state.borrow().phase.clone();
        debug!("Session {} -> {}", prior.label(), phase.label());
        state.send_modify(|s| {
            s.phase = phase;
            s.is_loading = true;
        });

        Self {
            state,
            prior,
            settled: false,
        }
    }

    fn advance(&self, phase: SessionPhase) {
        self.state.send_if_modified(|s| {
            if s.phase == phase {
                return false;
            }
            s.phase = phase;
            true
        });
    }

    fn settle(mut self, phase: SessionPhase, last_error: Option<AuthErrorKind>) {
        info!(
            phase = phase.label(),
            error = ?last_error,
            "Session settled"
        );
        self.state.send_modify(|s| {
            s.phase = phase;
            s.is_loading = false;
            s.last_error = last_error;
        });
        self.settled = true;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let prior = std::mem::replace(&mut self.prior, SessionPhase::Unknown);
        debug!("Session restored to {}", prior.label());
        self.state.send_modify(|s| {
            s.phase = prior;
            s.is_loading = false;
        });
    }
}
