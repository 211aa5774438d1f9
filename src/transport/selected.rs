//! Guard around the transport chosen for one connect attempt.
//!
//! The selected channel owns a concrete transport and enforces the ready
//! state contract on it: sends only while open, at most one open and one
//! close notification upward, nothing after close.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::strategy::StrategyId;
use crate::channel::{Channel, ChannelKind, ChannelLocation, ReadyState};
use crate::core::{
    ChannelError, ChannelListener, CloseEvent, ConnectRequest, OutboundFrame, Payload, Transport,
};

struct SelectedState {
    ready_state: ReadyState,
    protocol: Option<String>,
    listener: Option<Arc<dyn ChannelListener>>,
}

struct SelectedInner {
    channel: Arc<Channel>,
    strategy: StrategyId,
    transport: Box<dyn Transport>,
    state: Mutex<SelectedState>,
}

/// One candidate transport wrapped with ready-state bookkeeping.
#[derive(Clone)]
pub struct SelectedChannel {
    inner: Arc<SelectedInner>,
}

impl SelectedChannel {
    /// Wrap `transport` as a child of `parent`.
    pub fn new(parent: &Arc<Channel>, strategy: StrategyId, transport: Box<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(SelectedInner {
                channel: Channel::child(parent, ChannelKind::Selected),
                strategy,
                transport,
                state: Mutex::new(SelectedState {
                    ready_state: ReadyState::Connecting,
                    protocol: None,
                    listener: None,
                }),
            }),
        }
    }

    /// Strategy of the wrapped transport.
    pub fn strategy(&self) -> StrategyId {
        self.inner.strategy
    }

    /// Channel record of this layer.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.inner.channel
    }

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().ready_state
    }

    /// Sub-protocol negotiated on open.
    pub fn protocol(&self) -> Option<String> {
        self.inner.state.lock().protocol.clone()
    }

    /// Start the wrapped transport.
    ///
    /// A transport that refuses to start is reported to `listener` as an
    /// abnormal close rather than returned.
    pub fn connect(
        &self,
        location: ChannelLocation,
        protocols: Vec<String>,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError> {
        {
            let mut state = self.inner.state.lock();
            if state.ready_state != ReadyState::Connecting || state.listener.is_some() {
                return Err(ChannelError::InvalidState {
                    operation: "connect",
                    state: state.ready_state,
                });
            }
            state.listener = Some(listener);
        }

        let request = ConnectRequest {
            location,
            protocols,
            channel: Channel::child(&self.inner.channel, ChannelKind::Concrete),
        };
        let guard = Arc::new(GuardListener {
            inner: Arc::downgrade(&self.inner),
        });

        debug!(
            channel = %self.inner.channel.id(),
            strategy = %self.inner.strategy,
            location = %request.location,
            "connecting transport"
        );
        if let Err(e) = self.inner.transport.process_connect(request, guard.clone()) {
            debug!(channel = %self.inner.channel.id(), error = %e, "transport refused connect");
            guard.connection_closed(CloseEvent::failed(e));
        }
        Ok(())
    }

    /// Send one message. Only permitted while open.
    pub fn send(&self, payload: Payload) -> Result<(), ChannelError> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(ChannelError::InvalidState {
                operation: "send",
                state,
            });
        }
        let frame = OutboundFrame {
            sequence: self.inner.channel.next_sequence(),
            payload,
        };
        trace!(
            channel = %self.inner.channel.id(),
            sequence = frame.sequence,
            len = frame.payload.len(),
            "send"
        );
        self.inner.transport.process_send(frame)
    }

    /// Ask the transport to close. No-op once closing or closed.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), ChannelError> {
        {
            let mut state = self.inner.state.lock();
            if !state.ready_state.advance(ReadyState::Closing).is_advanced() {
                return Ok(());
            }
        }
        debug!(channel = %self.inner.channel.id(), code, reason, "closing transport");
        self.inner.transport.process_close(code, reason)
    }
}

impl fmt::Debug for SelectedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedChannel")
            .field("channel", &self.inner.channel.id())
            .field("strategy", &self.inner.strategy)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

/// Filters transport events against the selected channel's ready state.
struct GuardListener {
    inner: Weak<SelectedInner>,
}

impl GuardListener {
    /// Listener to forward to, if the current state permits it.
    fn forward_if(&self, permit: impl FnOnce(ReadyState) -> bool) -> Option<Arc<dyn ChannelListener>> {
        let inner = self.inner.upgrade()?;
        let state = inner.state.lock();
        if permit(state.ready_state) {
            state.listener.clone()
        } else {
            None
        }
    }
}

impl ChannelListener for GuardListener {
    fn connection_opened(&self, protocol: Option<&str>) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let listener = {
            let mut state = inner.state.lock();
            if !state.ready_state.advance(ReadyState::Open).is_advanced() {
                return;
            }
            state.protocol = protocol.map(str::to_owned);
            state.listener.clone()
        };
        if let Some(listener) = listener {
            listener.connection_opened(protocol);
        }
    }

    fn connection_closed(&self, event: CloseEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let listener = {
            let mut state = inner.state.lock();
            if !state.ready_state.advance(ReadyState::Closed).is_advanced() {
                return;
            }
            state.listener.take()
        };
        debug!(
            channel = %inner.channel.id(),
            code = event.code,
            clean = event.was_clean,
            "transport closed"
        );
        if let Some(listener) = listener {
            listener.connection_closed(event);
        }
    }

    fn text_message_received(&self, text: &str) {
        if let Some(listener) = self.forward_if(|state| state == ReadyState::Open) {
            listener.text_message_received(text);
        }
    }

    fn binary_message_received(&self, data: &[u8]) {
        if let Some(listener) = self.forward_if(|state| state == ReadyState::Open) {
            listener.binary_message_received(data);
        }
    }

    fn authentication_requested(&self, location: &str, challenge: &str) {
        if let Some(listener) = self.forward_if(|state| state != ReadyState::Closed) {
            listener.authentication_requested(location, challenge);
        }
    }

    fn redirected(&self, location: &str) {
        if let Some(listener) = self.forward_if(|state| state != ReadyState::Closed) {
            listener.redirected(location);
        }
    }
}
