//! PKCE (Proof Key for Code Exchange, RFC 7636) helpers.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use url::Url;

use crate::crypto::fill_random;
use crate::errors::Result;

/// Random bytes behind a verifier or state value (encodes to 43 chars)
pub const RANDOM_BYTES: usize = 32;

pub const CHALLENGE_METHOD: &str = "S256";

fn random_urlsafe() -> Result<String> {
    let mut bytes = [0u8; RANDOM_BYTES];
    fill_random(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate a PKCE code verifier
pub fn generate_code_verifier() -> Result<String> {
    random_urlsafe()
}

/// code_challenge = base64url_nopad(sha256(verifier))
pub fn compute_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random state parameter for CSRF protection
pub fn generate_state() -> Result<String> {
    random_urlsafe()
}

/// Verifier/challenge pair
#[derive(Clone)]
pub struct PkceChallenge {
    /// Kept secret until the token exchange
    pub code_verifier: String,
    /// Sent with the authorization request
    pub code_challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Result<Self> {
        let code_verifier = generate_code_verifier()?;
        let code_challenge = compute_code_challenge(&code_verifier);
        Ok(Self {
            code_verifier,
            code_challenge,
        })
    }
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .finish()
    }
}

/// One interactive login attempt: the URL to open plus what the redirect
/// must be checked against
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub pkce: PkceChallenge,
}
