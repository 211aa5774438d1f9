//! `Basic` challenge handler.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::Zeroizing;

use super::challenge::{ChallengeRequest, ChallengeResponse};
use crate::core::ChallengeHandler;

/// Username and password supplied for a challenge.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Username.
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

type CredentialProvider = dyn Fn(&ChallengeRequest) -> Option<Credentials> + Send + Sync;

/// Answers `Basic` and `Application Basic` challenges.
///
/// Credentials come from a provider callback, which may prompt the user;
/// returning `None` abandons the challenge.
pub struct BasicChallengeHandler {
    provider: Box<CredentialProvider>,
}

impl BasicChallengeHandler {
    /// Create a handler that asks `provider` for credentials.
    pub fn new<F>(provider: F) -> Self
    where
        F: Fn(&ChallengeRequest) -> Option<Credentials> + Send + Sync + 'static,
    {
        Self {
            provider: Box::new(provider),
        }
    }

    /// Create a handler that always answers with the same credentials.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self::new(move |_| Some(credentials.clone()))
    }

    /// Encode credentials as a `Basic` token.
    pub fn encode(credentials: &Credentials) -> String {
        let pair = Zeroizing::new(format!(
            "{}:{}",
            credentials.username,
            credentials.password.as_str()
        ));
        STANDARD.encode(pair.as_bytes())
    }
}

impl ChallengeHandler for BasicChallengeHandler {
    fn can_handle(&self, request: &ChallengeRequest) -> bool {
        request.base_scheme().eq_ignore_ascii_case("basic")
    }

    fn handle(&self, request: &ChallengeRequest) -> Option<ChallengeResponse> {
        if !self.can_handle(request) {
            return None;
        }
        let credentials = (self.provider)(request)?;
        Some(ChallengeResponse::new(format!(
            "{} {}",
            request.scheme(),
            Self::encode(&credentials)
        )))
    }
}

impl fmt::Debug for BasicChallengeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicChallengeHandler").finish_non_exhaustive()
    }
}
