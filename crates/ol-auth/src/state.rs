use serde::Serialize;
use tokio::sync::watch;

use crate::errors::AuthErrorKind;
use crate::models::UserProfile;

/// Where the session lifecycle currently stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "profile", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Nothing has been checked yet (fresh process)
    Unknown,
    CheckingStoredCredentials,
    Authenticated(UserProfile),
    RenewingCredentials,
    Unauthenticated,
    CompletingLogin,
    LoggingOut,
}

impl SessionPhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::CheckingStoredCredentials => "checking_stored_credentials",
            Self::Authenticated(_) => "authenticated",
            Self::RenewingCredentials => "renewing_credentials",
            Self::Unauthenticated => "unauthenticated",
            Self::CompletingLogin => "completing_login",
            Self::LoggingOut => "logging_out",
        }
    }
}

/// Observable projection of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub is_loading: bool,
    pub last_error: Option<AuthErrorKind>,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, SessionPhase::Authenticated(_))
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        match &self.phase {
            SessionPhase::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Unknown,
            is_loading: false,
            last_error: None,
        }
    }
}

/// Read-only view of the session state, cheap to clone and hand out
#[derive(Debug, Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub(crate) fn new(rx: watch::Receiver<SessionState>) -> Self {
        Self { rx }
    }

    /// Snapshot of the current state
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Wait for the next change and return the new state.
    ///
    /// Returns `None` once the session manager is gone.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Result of an operation that may be cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    Done(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Done(value) => Outcome::Done(f(value)),
            Self::Cancelled => Outcome::Cancelled,
        }
    }
}

impl<T, E> Outcome<Result<T, E>> {
    /// `Outcome<Result<T, E>>` into `Result<Outcome<T>, E>`
    pub fn transpose(self) -> Result<Outcome<T>, E> {
        match self {
            Self::Done(Ok(value)) => Ok(Outcome::Done(value)),
            Self::Done(Err(err)) => Err(err),
            Self::Cancelled => Ok(Outcome::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            subject_id: "auth0|123".to_string(),
            external_auth_id: "auth0|123".to_string(),
            email: "ada@example.com".to_string(),
            display_name: None,
            picture_url: None,
            email_verified: true,
        }
    }

    #[test]
    fn test_profile_only_when_authenticated() {
        let mut state = SessionState::default();
        assert!(!state.is_authenticated());
        assert!(state.profile().is_none());

        state.phase = SessionPhase::Authenticated(profile());
        assert!(state.is_authenticated());
        assert_eq!(state.profile().unwrap().subject_id, "auth0|123");
    }

    #[test]
    fn test_transpose() {
        let ok: Outcome<Result<u8, &str>> = Outcome::Done(Ok(1));
        let err: Outcome<Result<u8, &str>> = Outcome::Done(Err("boom"));
        let cancelled: Outcome<Result<u8, &str>> = Outcome::Cancelled;

        assert_eq!(ok.transpose(), Ok(Outcome::Done(1)));
        assert_eq!(err.transpose(), Err("boom"));
        assert_eq!(cancelled.transpose(), Ok(Outcome::Cancelled));
    }

    #[tokio::test]
    async fn test_handle_observes_changes() {
        let (tx, rx) = watch::channel(SessionState::default());
        let mut handle = SessionHandle::new(rx);

        tx.send_modify(|state| state.phase = SessionPhase::Unauthenticated);

        let state = handle.changed().await.unwrap();
        assert_eq!(state.phase, SessionPhase::Unauthenticated);
        assert_eq!(handle.current(), state);

        drop(tx);
        assert!(handle.changed().await.is_none());
    }
}
