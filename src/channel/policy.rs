//! Redirect policy.
//!
//! A policy compares the current location with a redirect target and
//! decides whether the redirect may be followed. Every policy other than
//! `Never` and `Always` first requires the redirect to keep the same scheme
//! or upgrade to its secure counterpart.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::core::ChannelError;

/// Which redirects the HTTP emulation layer may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RedirectPolicy {
    /// Never follow redirects.
    Never,
    /// Follow every redirect.
    Always,
    /// Same scheme (or secure upgrade), host and port.
    #[default]
    SameOrigin,
    /// Same host; port may change.
    SameDomain,
    /// Same host, or a sibling under the same parent domain
    /// (`sales.example.com` → `support.example.com`).
    PeerDomain,
    /// Same host, or a sub-domain of it
    /// (`example.com` → `eu.example.com`).
    SubDomain,
}

impl RedirectPolicy {
    /// Check if a redirect from `current` to `redirect` is allowed.
    pub fn allows(&self, current: &Url, redirect: &Url) -> bool {
        match self {
            RedirectPolicy::Never => return false,
            RedirectPolicy::Always => return true,
            _ => {}
        }

        let Some(upgraded) = scheme_transition(current.scheme(), redirect.scheme()) else {
            return false;
        };
        let (Some(current_host), Some(redirect_host)) = (current.host_str(), redirect.host_str())
        else {
            return false;
        };
        let current_host = current_host.to_ascii_lowercase();
        let redirect_host = redirect_host.to_ascii_lowercase();
        let same_host = current_host == redirect_host;

        match self {
            RedirectPolicy::SameOrigin => same_host && same_port(current, redirect, upgraded),
            RedirectPolicy::SameDomain => same_host,
            RedirectPolicy::PeerDomain => {
                same_host
                    || matches!(
                        (parent_domain(&current_host), parent_domain(&redirect_host)),
                        (Some(a), Some(b)) if a == b
                    )
            }
            RedirectPolicy::SubDomain => {
                same_host || redirect_host.ends_with(&format!(".{current_host}"))
            }
            RedirectPolicy::Never => false,
            RedirectPolicy::Always => true,
        }
    }

    /// Check a redirect, returning the policy error when it is denied.
    pub fn check(&self, current: &Url, redirect: &Url) -> Result<(), ChannelError> {
        if self.allows(current, redirect) {
            Ok(())
        } else {
            Err(ChannelError::RedirectDenied {
                from: current.to_string(),
                to: redirect.to_string(),
            })
        }
    }

    /// Lower-case hyphenated name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectPolicy::Never => "never",
            RedirectPolicy::Always => "always",
            RedirectPolicy::SameOrigin => "same-origin",
            RedirectPolicy::SameDomain => "same-domain",
            RedirectPolicy::PeerDomain => "peer-domain",
            RedirectPolicy::SubDomain => "sub-domain",
        }
    }
}

/// `Some(upgraded)` if the scheme stays the same or moves to its secure
/// counterpart; `None` for any other change.
fn scheme_transition(current: &str, redirect: &str) -> Option<bool> {
    match (current, redirect) {
        (a, b) if a == b => Some(false),
        ("http", "https") | ("ws", "wss") => Some(true),
        _ => None,
    }
}

fn same_port(current: &Url, redirect: &Url, upgraded: bool) -> bool {
    if current.port_or_known_default() == redirect.port_or_known_default() {
        return true;
    }
    // An upgrade moves from one default port to the other.
    upgraded && current.port().is_none() && redirect.port().is_none()
}

/// Host minus its first label, if what remains is still a registrable
/// domain (contains a dot).
fn parent_domain(host: &str) -> Option<&str> {
    host.split_once('.')
        .map(|(_, parent)| parent)
        .filter(|parent| parent.contains('.'))
}

impl fmt::Display for RedirectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedirectPolicy {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "never" => Ok(RedirectPolicy::Never),
            "always" => Ok(RedirectPolicy::Always),
            "same-origin" => Ok(RedirectPolicy::SameOrigin),
            "same-domain" => Ok(RedirectPolicy::SameDomain),
            "peer-domain" => Ok(RedirectPolicy::PeerDomain),
            "sub-domain" => Ok(RedirectPolicy::SubDomain),
            other => Err(ChannelError::Config(format!("unknown redirect policy: {other}"))),
        }
    }
}
