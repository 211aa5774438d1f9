//! Handler-pipeline boundary.
//!
//! Outbound calls go through [`Transport`] (`process_connect`,
//! `process_send`, `process_close`); inbound events come back through the
//! [`ChannelListener`] registered at connect time. This is the seam where
//! concrete transports, extension pipelines and higher layers attach.

use std::sync::Arc;

use super::constants::{CLOSE_ABNORMAL, CLOSE_NO_STATUS};
use super::error::ChannelError;
use crate::auth::{ChallengeRequest, ChallengeResponse};
use crate::channel::{Channel, ChannelLocation, RedirectPolicy};
use crate::transport::{StrategyId, TimerHandle};

/// A close or failure notification.
///
/// A clean close carries the peer's (or caller's) code and reason. A
/// failure carries the error that caused it, which also decides whether
/// the composite may fall back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close code (opaque).
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
    /// Whether the closing handshake completed.
    pub was_clean: bool,
    /// Error that caused the close, if any.
    pub error: Option<ChannelError>,
}

impl CloseEvent {
    /// A clean close.
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean: true,
            error: None,
        }
    }

    /// A close without a status code.
    pub fn no_status() -> Self {
        Self {
            code: CLOSE_NO_STATUS,
            reason: String::new(),
            was_clean: false,
            error: None,
        }
    }

    /// An abnormal close caused by `error`.
    pub fn failed(error: ChannelError) -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: error.to_string(),
            was_clean: false,
            error: Some(error),
        }
    }

    /// Check if the composite may try the next candidate after this close.
    pub fn allows_fallback(&self) -> bool {
        self.error.as_ref().is_none_or(ChannelError::allows_fallback)
    }
}

/// Message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
}

impl Payload {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An outbound message tagged with its channel sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Per-channel monotonic sequence number.
    pub sequence: u64,
    /// Message body.
    pub payload: Payload,
}

/// Parameters of a single connect attempt.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Target location.
    pub location: ChannelLocation,
    /// Requested sub-protocols, in preference order.
    pub protocols: Vec<String>,
    /// Channel record of the concrete transport.
    pub channel: Arc<Channel>,
}

/// Inbound events delivered by a transport.
///
/// Implementations must tolerate calls from any thread, including
/// synchronously from inside a `process_*` call.
pub trait ChannelListener: Send + Sync {
    /// The connection opened with the negotiated sub-protocol, if any.
    fn connection_opened(&self, protocol: Option<&str>);

    /// The connection closed cleanly or failed.
    fn connection_closed(&self, event: CloseEvent);

    /// A text message arrived.
    fn text_message_received(&self, text: &str);

    /// A binary message arrived.
    fn binary_message_received(&self, data: &[u8]);

    /// The server issued an authentication challenge.
    fn authentication_requested(&self, location: &str, challenge: &str) {
        let _ = (location, challenge);
    }

    /// The connection was redirected to `location`.
    fn redirected(&self, location: &str) {
        let _ = location;
    }
}

/// Outbound operations of one concrete transport.
pub trait Transport: Send + Sync {
    /// Start connecting. Completion is reported through `listener`.
    fn process_connect(
        &self,
        request: ConnectRequest,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError>;

    /// Send one message.
    fn process_send(&self, frame: OutboundFrame) -> Result<(), ChannelError>;

    /// Start closing. Completion is reported through the listener.
    fn process_close(&self, code: u16, reason: &str) -> Result<(), ChannelError>;
}

/// Everything a factory may need to build a transport for one candidate.
#[derive(Clone)]
pub struct TransportContext {
    /// Strategy being instantiated.
    pub strategy: StrategyId,
    /// The composite's challenge handler.
    pub challenge_handler: Option<Arc<dyn ChallengeHandler>>,
    /// Pause/resume access to the composite's connect timer.
    pub connect_timer: Option<TimerHandle>,
    /// Redirect policy for HTTP-based strategies.
    pub redirect_policy: RedirectPolicy,
}

impl std::fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportContext")
            .field("strategy", &self.strategy)
            .field("challenge_handler", &self.challenge_handler.is_some())
            .field("connect_timer", &self.connect_timer.is_some())
            .field("redirect_policy", &self.redirect_policy)
            .finish()
    }
}

/// Builds a fresh transport for each connect attempt.
pub trait TransportFactory: Send + Sync {
    /// Create a transport for `context.strategy`.
    fn create(&self, context: &TransportContext) -> Result<Box<dyn Transport>, ChannelError>;
}

impl<F> TransportFactory for F
where
    F: Fn(&TransportContext) -> Result<Box<dyn Transport>, ChannelError> + Send + Sync,
{
    fn create(&self, context: &TransportContext) -> Result<Box<dyn Transport>, ChannelError> {
        self(context)
    }
}

/// Answers authentication challenges.
///
/// `handle` may block while credentials are gathered; the connect timer is
/// paused for the duration of the call.
pub trait ChallengeHandler: Send + Sync {
    /// Check if this handler can answer `request`.
    fn can_handle(&self, request: &ChallengeRequest) -> bool {
        let _ = request;
        true
    }

    /// Produce credentials, or `None` to give up.
    fn handle(&self, request: &ChallengeRequest) -> Option<ChallengeResponse>;
}
