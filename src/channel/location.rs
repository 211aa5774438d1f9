//! Connection target locations.
//!
//! A location is a URL whose scheme may be qualified with a strategy
//! prefix, e.g. `wss://host/path` (try every strategy for `wss`) or
//! `native:wss://host/path` (only the native strategy).

use std::fmt;

use url::Url;

use crate::core::ChannelError;

/// Parsed connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLocation {
    /// Scheme as written, including any strategy qualifier.
    scheme_token: String,
    /// Location with the plain transport scheme.
    url: Url,
}

impl ChannelLocation {
    /// Parse a location string.
    pub fn parse(location: &str) -> Result<Self, ChannelError> {
        let (token, rest) = location
            .split_once("://")
            .ok_or_else(|| ChannelError::InvalidLocation(format!("missing scheme: {location}")))?;
        let scheme = token.rsplit(':').next().unwrap_or(token);
        if !matches!(scheme, "ws" | "wss" | "http" | "https") {
            return Err(ChannelError::InvalidLocation(format!(
                "unsupported transport scheme: {scheme}"
            )));
        }

        let url = Url::parse(&format!("{scheme}://{rest}"))
            .map_err(|e| ChannelError::InvalidLocation(format!("{location}: {e}")))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ChannelError::InvalidLocation(format!("missing host: {location}")));
        }

        Ok(Self {
            scheme_token: token.to_ascii_lowercase(),
            url,
        })
    }

    /// Build a location from an already-parsed URL.
    pub fn from_url(url: Url) -> Result<Self, ChannelError> {
        Self::parse(url.as_str())
    }

    /// Scheme as requested, used to look up the strategy table.
    pub fn scheme_token(&self) -> &str {
        &self.scheme_token
    }

    /// Check if the scheme carries a strategy qualifier.
    pub fn is_qualified(&self) -> bool {
        self.scheme_token.contains(':')
    }

    /// Location with the plain transport scheme.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Check if the transport scheme is encrypted.
    pub fn is_secure(&self) -> bool {
        matches!(self.url.scheme(), "wss" | "https")
    }

    /// Host name.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Port, falling back to the scheme default.
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// Location rewritten for HTTP-based strategies (`ws`→`http`,
    /// `wss`→`https`).
    pub fn http_url(&self) -> Url {
        let mut url = self.url.clone();
        let scheme = if self.is_secure() { "https" } else { "http" };
        if url.scheme() != scheme {
            // Both schemes are special, so the switch cannot be refused.
            let _ = url.set_scheme(scheme);
        }
        url
    }

    /// Location rewritten for socket-based strategies (`http`→`ws`,
    /// `https`→`wss`).
    pub fn socket_url(&self) -> Url {
        let mut url = self.url.clone();
        let scheme = if self.is_secure() { "wss" } else { "ws" };
        if url.scheme() != scheme {
            let _ = url.set_scheme(scheme);
        }
        url
    }
}

impl fmt::Display for ChannelLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_qualified() {
            let prefix = self
                .scheme_token
                .rsplit_once(':')
                .map(|(prefix, _)| prefix)
                .unwrap_or_default();
            write!(f, "{prefix}:{}", self.url)
        } else {
            write!(f, "{}", self.url)
        }
    }
}
