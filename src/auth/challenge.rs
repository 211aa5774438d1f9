//! Challenge request and response records.

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::core::ChallengeHandler;

/// Challenge schemes the emulation layer knows how to route to a handler.
const RECOGNIZED_SCHEMES: &[&str] = &["basic", "digest", "negotiate", "bearer", "token"];

/// Prefix of application-level challenges (`Application Basic ...`).
const APPLICATION_PREFIX: &str = "application";

/// A server-issued authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    location: String,
    challenge: String,
}

impl ChallengeRequest {
    /// Create a challenge for `location` with the raw `WWW-Authenticate`
    /// value.
    pub fn new(location: impl Into<String>, challenge: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            challenge: challenge.into(),
        }
    }

    /// Location that issued the challenge.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Raw challenge string.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Authentication scheme, including the `Application` prefix when
    /// present (`"Basic"`, `"Application Token"`).
    pub fn scheme(&self) -> &str {
        let trimmed = self.challenge.trim_start();
        let first_end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        if !trimmed[..first_end].eq_ignore_ascii_case(APPLICATION_PREFIX) {
            return &trimmed[..first_end];
        }

        let rest = trimmed[first_end..].trim_start();
        let second_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let second = &rest[..second_end];
        if second.is_empty() || second.contains('=') {
            // `Application realm="x"`: no inner scheme, only parameters
            return &trimmed[..first_end];
        }
        let offset = trimmed.len() - rest.len();
        &trimmed[..offset + second_end]
    }

    /// Scheme with the `Application` prefix removed.
    pub fn base_scheme(&self) -> &str {
        let scheme = self.scheme();
        match scheme.split_once(char::is_whitespace) {
            Some((prefix, base)) if prefix.eq_ignore_ascii_case(APPLICATION_PREFIX) => base.trim(),
            _ => scheme,
        }
    }

    /// Check if the challenge is an `Application` challenge.
    pub fn is_application(&self) -> bool {
        self.scheme()
            .split(char::is_whitespace)
            .next()
            .is_some_and(|first| first.eq_ignore_ascii_case(APPLICATION_PREFIX))
    }

    /// Check if the scheme belongs to a recognized family.
    pub fn is_recognized(&self) -> bool {
        self.is_application()
            || RECOGNIZED_SCHEMES
                .iter()
                .any(|scheme| scheme.eq_ignore_ascii_case(self.base_scheme()))
    }

    /// Value of an auth parameter such as `realm`.
    pub fn param(&self, name: &str) -> Option<String> {
        let params = self.challenge.trim_start()[self.scheme().len()..].trim();
        split_params(params).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            if key.trim().eq_ignore_ascii_case(name) {
                Some(value.trim().trim_matches('"').to_string())
            } else {
                None
            }
        })
    }
}

/// Split on commas that are not inside a quoted string.
fn split_params(params: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in params.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty())
}

/// Credentials answering a challenge.
///
/// The credential string is wiped from memory when the response is dropped.
#[derive(Clone)]
pub struct ChallengeResponse {
    credentials: Zeroizing<String>,
    next_handler: Option<Arc<dyn ChallengeHandler>>,
}

impl ChallengeResponse {
    /// Create a response carrying the `Authorization` header value.
    pub fn new(credentials: impl Into<String>) -> Self {
        Self {
            credentials: Zeroizing::new(credentials.into()),
            next_handler: None,
        }
    }

    /// Chain the handler that should answer the next challenge on the same
    /// channel.
    pub fn with_next_handler(mut self, handler: Arc<dyn ChallengeHandler>) -> Self {
        self.next_handler = Some(handler);
        self
    }

    /// `Authorization` header value.
    pub fn credentials(&self) -> &str {
        &self.credentials
    }

    /// Handler chained for the next challenge.
    pub fn next_handler(&self) -> Option<&Arc<dyn ChallengeHandler>> {
        self.next_handler.as_ref()
    }
}

impl fmt::Debug for ChallengeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeResponse")
            .field("credentials", &"[REDACTED]")
            .field("next_handler", &self.next_handler.is_some())
            .finish()
    }
}
