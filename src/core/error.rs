//! Error types for the channel layers.

use thiserror::Error;

use super::constants::CLOSE_ABNORMAL;
use crate::channel::ReadyState;

/// Errors from the HTTP request model used by the emulated transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Headers can only change before the request leaves the READY state.
    #[error("headers are locked once a request is sent")]
    HeadersLocked,

    /// Ready-state transition not permitted by the request state machine.
    #[error("illegal request transition: {from} -> {to}")]
    IllegalTransition {
        /// State the request was in.
        from: &'static str,
        /// State that was requested.
        to: &'static str,
    },

    /// The request was aborted.
    #[error("request aborted")]
    Aborted,

    /// The underlying HTTP transport failed.
    #[error("http transport error: {0}")]
    Transport(String),

    /// A response could not be parsed.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors from the resumable timer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// The timer was cancelled and its remaining delay is no longer valid.
    #[error("timer cancelled")]
    Cancelled,
}

/// Top-level channel errors.
///
/// Variants fall into the taxonomy the composite engine acts on:
/// configuration errors and policy violations are fatal and never retried,
/// transient transport failures advance to the next candidate, protocol
/// errors close abnormally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Operation not permitted in the current ready state.
    #[error("{operation} not permitted while {state}")]
    InvalidState {
        /// Rejected operation.
        operation: &'static str,
        /// State at the time of the call.
        state: ReadyState,
    },

    /// An argument was rejected before any state change.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The target location could not be parsed.
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// No strategy table entry for the requested scheme.
    #[error("unknown scheme: {0}")]
    UnknownScheme(String),

    /// Missing or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A redirect was rejected by the configured policy.
    #[error("redirect from {from} to {to} denied by policy")]
    RedirectDenied {
        /// Location being redirected away from.
        from: String,
        /// Redirect target.
        to: String,
    },

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport-level handshake was refused or malformed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Connection attempt exceeded the connect timeout.
    #[error("connection timed out")]
    Timeout,

    /// Peer violated the emulation or challenge protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Challenge could not be answered.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// HTTP request model error.
    #[error("http error: {0}")]
    Http(#[from] HttpError),

    /// Timer error.
    #[error("timer error: {0}")]
    Timer(#[from] TimerError),
}

impl ChannelError {
    /// Check if a failure with this error may be recovered by trying the
    /// next candidate strategy.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            ChannelError::Transport(_) | ChannelError::Handshake(_) | ChannelError::Http(_)
        )
    }

    /// Check if this is a configuration error (fatal, never retried).
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ChannelError::Config(_)
                | ChannelError::UnknownScheme(_)
                | ChannelError::InvalidLocation(_)
                | ChannelError::InvalidArgument(_)
        )
    }

    /// Check if this is a security policy violation.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, ChannelError::RedirectDenied { .. })
    }

    /// Check if this is a protocol-level error.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ChannelError::Protocol(_) | ChannelError::AuthenticationFailed(_)
        )
    }

    /// Close code reported when this error terminates a channel.
    pub fn close_code(&self) -> u16 {
        CLOSE_ABNORMAL
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
