//! Authenticated session lifecycle for overlook against an OAuth2/OIDC
//! identity provider
//!
//! This crate signs users in with the authorization code flow plus PKCE,
//! keeps their tokens in secure storage, silently renews them and exposes a
//! single observable session state.
//!
//! # Session Lifecycle
//!
//! 1. On launch, [`SessionManager::check_authentication`] validates the stored
//!    access token against the userinfo endpoint
//! 2. A rejected or missing access token is renewed with the stored refresh token
//! 3. Anything else resolves to `Unauthenticated`; the user signs in again
//!    through [`SessionManager::begin_login`] and
//!    [`SessionManager::handle_redirect`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ol_auth::{AuthClient, AuthConfig, MemorySecretStore, Outcome, SessionManager};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! # async fn example() -> ol_auth::Result<()> {
//! let config = AuthConfig::new(
//!     "overlook.eu.auth0.com",
//!     "client-id",
//!     Url::parse("overlookme://callback")?,
//! )?;
//! let manager = SessionManager::new(AuthClient::new(config)?, Arc::new(MemorySecretStore::new()));
//! let cancel = CancellationToken::new();
//!
//! if manager.check_authentication(&cancel).await == Outcome::Done(false) {
//!     let url = manager.begin_login().await?;
//!     println!("Visit: {}", url);
//!
//!     // The browser lands on the redirect URI...
//!     let redirect = "overlookme://callback?code=...&state=...";
//!     if let Outcome::Done(profile) = manager.handle_redirect(redirect, &cancel).await? {
//!         println!("Signed in as {}", profile.email);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Secret Storage
//!
//! Secrets live behind the synchronous [`SecretStore`] trait, under four
//! fixed [`SecretName`]s.
//!
//! ## In-Memory Storage (Testing)
//!
//! ```
//! use ol_auth::{MemorySecretStore, SecretName, SecretStore};
//!
//! # async fn example() -> ol_auth::Result<()> {
//! let store = MemorySecretStore::new();
//! store.save(SecretName::AccessToken, b"token")?;
//! assert_eq!(store.retrieve(SecretName::AccessToken)?, b"token");
//!
//! store.delete_all()?;
//! assert!(store.is_empty());
//! # Ok(())
//! # }
//! # tokio_test::block_on(example()).unwrap();
//! ```
//!
//! ## OS Keychain
//!
//! With the default `keyring-support` feature, `KeyringSecretStore` keeps one
//! keychain entry per secret (macOS Keychain, Windows Credential Manager,
//! Linux kernel keyutils).
//!
//! ## File-Based Encrypted Storage
//!
//! ```no_run
//! use ol_auth::{EnvPassphrase, FileSecretStore, KeyOptions};
//!
//! # fn example() -> ol_auth::Result<()> {
//! // Data key in the OS keyring, or derived from $OVERLOOK_PASSPHRASE without one
//! let storage_dir = FileSecretStore::default_storage_dir()?;
//! let store = FileSecretStore::open(
//!     storage_dir,
//!     KeyOptions::keyring("overlook-me"),
//!     &EnvPassphrase::new("OVERLOOK_PASSPHRASE"),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! # Important Notes
//!
//! - Token values are never logged and `Debug` output redacts them
//! - Cancelling an operation restores the previous state and is not an error
//! - The client makes exactly one attempt per request

pub mod client;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod errors;
pub mod file_store;
pub mod key_manager;
#[cfg(feature = "keyring-support")]
pub mod keyring_store;
pub mod models;
pub mod pkce;
pub mod secret;
pub mod session;
pub mod state;
pub mod store;

// Re-export main types
pub use client::AuthClient;
pub use config::{AuthConfig, HttpTimeouts};
pub use credentials::Credentials;
pub use errors::{AuthError, AuthErrorKind, Result};
pub use file_store::FileSecretStore;
pub use key_manager::{KdfParams, KeyOptions, KeySource};
#[cfg(feature = "keyring-support")]
pub use keyring_store::KeyringSecretStore;
pub use models::UserProfile;
pub use pkce::{AuthorizationRequest, PkceChallenge};
pub use secret::{EnvPassphrase, NoPassphrase, PassphraseProvider, StaticPassphrase};
pub use session::SessionManager;
pub use state::{Outcome, SessionHandle, SessionPhase, SessionState};
pub use store::{MemorySecretStore, SecretName, SecretStore, StoreError};
