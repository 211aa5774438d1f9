//! Composite strategy engine.
//!
//! A [`CompositeChannel`] expands the requested scheme into an ordered list
//! of candidate strategies and tries them one at a time. A candidate that
//! fails before opening hands over to the next one, unless fallback is
//! disabled for the scheme, an authentication exchange has started, or the
//! failure itself forbids it. Once a candidate opens, the composite is a
//! pass-through to it.
//!
//! Every attempt gets a fresh attempt number. Events from a child whose
//! attempt is no longer current are dropped, so an abandoned candidate can
//! never reach the caller.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::selected::SelectedChannel;
use super::strategy::{StrategyId, StrategyRegistry};
use super::timer::ResumableTimer;
use crate::channel::{Channel, ChannelKind, ChannelLocation, ReadyState, RedirectPolicy};
use crate::core::constants::{CLOSE_ABNORMAL, CLOSE_NORMAL, MAX_CLOSE_REASON_BYTES};
use crate::core::{
    ChallengeHandler, ChannelError, ChannelListener, CloseEvent, Payload, TransportContext,
};

/// Composite channel configuration.
#[derive(Clone, Default)]
pub struct CompositeConfig {
    /// Upper bound for the whole connect attempt, across all candidates.
    pub connect_timeout: Option<Duration>,
    /// Redirect policy handed to HTTP-based strategies.
    pub redirect_policy: RedirectPolicy,
    /// Handler for authentication challenges.
    pub challenge_handler: Option<Arc<dyn ChallengeHandler>>,
    /// Runtime for the connect timer. Defaults to the current runtime.
    pub runtime: Option<Handle>,
}

impl CompositeConfig {
    /// Bound connect attempts by `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the redirect policy.
    pub fn with_redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect_policy = policy;
        self
    }

    /// Set the challenge handler.
    pub fn with_challenge_handler(mut self, handler: Arc<dyn ChallengeHandler>) -> Self {
        self.challenge_handler = Some(handler);
        self
    }

    /// Run the connect timer on `runtime`.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

impl fmt::Debug for CompositeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("redirect_policy", &self.redirect_policy)
            .field("challenge_handler", &self.challenge_handler.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

/// How a connect attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A candidate opened.
    Opened,
    /// The candidate failed; the next one may be tried.
    FailedRetryable,
    /// The attempt is over.
    FailedTerminal,
}

struct CompositeState {
    ready_state: ReadyState,
    location: Option<ChannelLocation>,
    protocols: Vec<String>,
    /// Strategies not yet tried. Only shrinks during an attempt.
    candidates: VecDeque<StrategyId>,
    fallback: bool,
    selected: Option<SelectedChannel>,
    /// Current candidate number; events tagged with another are stale.
    attempt: u64,
    /// Current `connect` call; timer wake-ups from an earlier one are stale.
    epoch: u64,
    auth_started: bool,
    connect_timer: Option<ResumableTimer>,
    last_close: Option<CloseEvent>,
    protocol: Option<String>,
    outcome: Option<ConnectOutcome>,
}

impl CompositeState {
    fn classify(&self, event: &CloseEvent) -> ConnectOutcome {
        if self.ready_state == ReadyState::Connecting
            && !self.auth_started
            && self.fallback
            && event.allows_fallback()
        {
            ConnectOutcome::FailedRetryable
        } else {
            ConnectOutcome::FailedTerminal
        }
    }

    /// Move to CLOSED, handing back what must be released outside the lock.
    fn terminate(&mut self) -> Option<(Option<ResumableTimer>, Option<SelectedChannel>)> {
        if !self.ready_state.advance(ReadyState::Closed).is_advanced() {
            return None;
        }
        self.candidates.clear();
        if self.outcome != Some(ConnectOutcome::Opened) {
            self.outcome = Some(ConnectOutcome::FailedTerminal);
        }
        Some((self.connect_timer.take(), self.selected.take()))
    }
}

struct CompositeInner {
    channel: Arc<Channel>,
    registry: Arc<StrategyRegistry>,
    config: CompositeConfig,
    listener: Arc<dyn ChannelListener>,
    state: Mutex<CompositeState>,
}

impl CompositeInner {
    fn connect_timer(self: &Arc<Self>, delay: Duration, epoch: u64) -> Result<ResumableTimer, ChannelError> {
        let runtime = match &self.config.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|_| {
                ChannelError::Config("connect timeout requires a tokio runtime".into())
            })?,
        };
        let inner = Arc::downgrade(self);
        Ok(ResumableTimer::new(runtime, delay, true, move || {
            if let Some(inner) = inner.upgrade() {
                inner.on_connect_timeout(epoch);
            }
        }))
    }

    fn try_next_candidate(self: &Arc<Self>) {
        let (attempt, context, location, protocols) = {
            let mut state = self.state.lock();
            if state.ready_state != ReadyState::Connecting {
                return;
            }
            let Some(strategy) = state.candidates.pop_front() else {
                let event = match state.last_close.take() {
                    Some(last) => CloseEvent {
                        code: CLOSE_ABNORMAL,
                        was_clean: false,
                        ..last
                    },
                    None => CloseEvent {
                        code: CLOSE_ABNORMAL,
                        reason: "no transport available".into(),
                        was_clean: false,
                        error: None,
                    },
                };
                drop(state);
                debug!(channel = %self.channel.id(), "candidates exhausted");
                self.finish(event);
                return;
            };

            state.attempt += 1;
            state.selected = None;
            let context = TransportContext {
                strategy,
                challenge_handler: self.config.challenge_handler.clone(),
                connect_timer: state.connect_timer.as_ref().map(ResumableTimer::handle),
                redirect_policy: self.config.redirect_policy,
            };
            let Some(location) = state.location.clone() else {
                return;
            };
            (state.attempt, context, location, state.protocols.clone())
        };

        info!(
            channel = %self.channel.id(),
            strategy = %context.strategy,
            attempt,
            "trying transport"
        );
        let transport = match self.registry.create(&context) {
            Ok(transport) => transport,
            Err(e) => {
                self.on_child_closed(attempt, CloseEvent::failed(e));
                return;
            }
        };
        let selected = SelectedChannel::new(&self.channel, context.strategy, transport);

        {
            let mut state = self.state.lock();
            if state.attempt != attempt || state.ready_state != ReadyState::Connecting {
                return;
            }
            state.selected = Some(selected.clone());
        }

        let listener = Arc::new(ChildListener {
            inner: Arc::downgrade(self),
            attempt,
        });
        if let Err(e) = selected.connect(location, protocols, listener) {
            self.on_child_closed(attempt, CloseEvent::failed(e));
        }
    }

    fn on_child_opened(&self, attempt: u64, protocol: Option<&str>) {
        let timer = {
            let mut state = self.state.lock();
            if state.attempt != attempt || !state.ready_state.advance(ReadyState::Open).is_advanced() {
                return;
            }
            state.protocol = protocol.map(str::to_owned);
            state.outcome = Some(ConnectOutcome::Opened);
            state.auth_started = false;
            state.last_close = None;
            state.connect_timer.take()
        };
        drop(timer);

        info!(
            channel = %self.channel.id(),
            protocol = protocol.unwrap_or(""),
            "channel open"
        );
        self.listener.connection_opened(protocol);
    }

    fn on_child_closed(self: &Arc<Self>, attempt: u64, event: CloseEvent) {
        let outcome = {
            let mut state = self.state.lock();
            if state.attempt != attempt {
                debug!(channel = %self.channel.id(), attempt, "stale close dropped");
                return;
            }
            let outcome = state.classify(&event);
            if state.ready_state == ReadyState::Connecting {
                state.outcome = Some(outcome);
            }
            if outcome == ConnectOutcome::FailedRetryable {
                state.selected = None;
                state.last_close = Some(event.clone());
            }
            outcome
        };

        if outcome == ConnectOutcome::FailedRetryable {
            warn!(
                channel = %self.channel.id(),
                attempt,
                reason = %event.reason,
                "transport failed, falling back"
            );
            self.try_next_candidate();
        } else {
            self.finish(event);
        }
    }

    fn on_auth_requested(&self, attempt: u64, location: &str, challenge: &str) {
        {
            let mut state = self.state.lock();
            if state.attempt != attempt || state.ready_state == ReadyState::Closed {
                return;
            }
            if state.ready_state == ReadyState::Connecting {
                state.auth_started = true;
            }
        }
        info!(channel = %self.channel.id(), location, "authentication requested");
        self.listener.authentication_requested(location, challenge);
    }

    /// User listener, if `attempt` is current and the channel is in `expected`.
    fn forward(&self, attempt: u64, expected: ReadyState) -> Option<&Arc<dyn ChannelListener>> {
        let state = self.state.lock();
        (state.attempt == attempt && state.ready_state == expected).then_some(&self.listener)
    }

    fn on_connect_timeout(&self, epoch: u64) {
        let teardown = {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.ready_state != ReadyState::Connecting {
                return;
            }
            state.terminate()
        };
        let Some((timer, selected)) = teardown else {
            return;
        };
        drop(timer);

        warn!(channel = %self.channel.id(), "connect timed out");
        self.listener
            .connection_closed(CloseEvent::failed(ChannelError::Timeout));
        if let Some(selected) = selected {
            if let Err(e) = selected.close(CLOSE_NORMAL, "connection timed out") {
                debug!(channel = %self.channel.id(), error = %e, "close after timeout failed");
            }
        }
    }

    /// Terminal close. Reports `event` once; later calls are no-ops.
    fn finish(&self, event: CloseEvent) {
        let Some((timer, selected)) = self.state.lock().terminate() else {
            return;
        };
        drop(timer);
        drop(selected);

        info!(
            channel = %self.channel.id(),
            code = event.code,
            clean = event.was_clean,
            reason = %event.reason,
            "channel closed"
        );
        self.listener.connection_closed(event);
    }
}

/// Routes one attempt's events back to the composite.
struct ChildListener {
    inner: Weak<CompositeInner>,
    attempt: u64,
}

impl ChannelListener for ChildListener {
    fn connection_opened(&self, protocol: Option<&str>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_child_opened(self.attempt, protocol);
        }
    }

    fn connection_closed(&self, event: CloseEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_child_closed(self.attempt, event);
        }
    }

    fn text_message_received(&self, text: &str) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.forward(self.attempt, ReadyState::Open) {
                listener.text_message_received(text);
            }
        }
    }

    fn binary_message_received(&self, data: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.forward(self.attempt, ReadyState::Open) {
                listener.binary_message_received(data);
            }
        }
    }

    fn authentication_requested(&self, location: &str, challenge: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_auth_requested(self.attempt, location, challenge);
        }
    }

    fn redirected(&self, location: &str) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.forward(self.attempt, ReadyState::Connecting) {
                debug!(channel = %inner.channel.id(), location, "redirected");
                listener.redirected(location);
            }
        }
    }
}

/// Logical full-duplex connection over the best available transport.
///
/// Events are reported to the listener given at construction, from
/// whichever thread the transport calls back on.
pub struct CompositeChannel {
    inner: Arc<CompositeInner>,
}

impl CompositeChannel {
    /// Create a closed composite channel.
    pub fn new(
        registry: Arc<StrategyRegistry>,
        config: CompositeConfig,
        listener: Arc<dyn ChannelListener>,
    ) -> Self {
        Self {
            inner: Arc::new(CompositeInner {
                channel: Channel::root(ChannelKind::Composite),
                registry,
                config,
                listener,
                state: Mutex::new(CompositeState {
                    ready_state: ReadyState::Closed,
                    location: None,
                    protocols: Vec::new(),
                    candidates: VecDeque::new(),
                    fallback: false,
                    selected: None,
                    attempt: 0,
                    epoch: 0,
                    auth_started: false,
                    connect_timer: None,
                    last_close: None,
                    protocol: None,
                    outcome: None,
                }),
            }),
        }
    }

    /// Start connecting to `location`, requesting `protocols` in order.
    ///
    /// Only permitted while closed. Bad locations and unknown schemes are
    /// rejected here and never retried.
    pub fn connect(&self, location: &str, protocols: &[&str]) -> Result<(), ChannelError> {
        let location = {
            let mut state = self.inner.state.lock();
            if state.ready_state != ReadyState::Closed {
                return Err(ChannelError::InvalidState {
                    operation: "connect",
                    state: state.ready_state,
                });
            }

            let location = ChannelLocation::parse(location)?;
            let plan = self.inner.registry.plan(location.scheme_token())?;
            let epoch = state.epoch + 1;
            let timer = self
                .inner
                .config
                .connect_timeout
                .map(|delay| self.inner.connect_timer(delay, epoch))
                .transpose()?;

            state.epoch = epoch;
            let restarted = state.ready_state.restart();
            debug_assert!(restarted.is_advanced());
            state.location = Some(location.clone());
            state.protocols = protocols.iter().map(|p| (*p).to_owned()).collect();
            state.candidates = plan.candidates.into();
            state.fallback = plan.fallback;
            state.selected = None;
            state.auth_started = false;
            state.last_close = None;
            state.protocol = None;
            state.outcome = None;
            if let Some(timer) = &timer {
                timer.start()?;
            }
            state.connect_timer = timer;
            location
        };

        info!(channel = %self.inner.channel.id(), %location, "connecting");
        self.inner.try_next_candidate();
        Ok(())
    }

    /// Send a text message. Only permitted while open.
    pub fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.open_child("send")?.send(Payload::Text(text.to_owned()))
    }

    /// Send a binary message. Only permitted while open.
    pub fn send_binary(&self, data: &[u8]) -> Result<(), ChannelError> {
        self.open_child("send")?.send(Payload::Binary(data.to_vec()))
    }

    fn open_child(&self, operation: &'static str) -> Result<SelectedChannel, ChannelError> {
        let state = self.inner.state.lock();
        match (&state.selected, state.ready_state) {
            (Some(selected), ReadyState::Open) => Ok(selected.clone()),
            (_, ready_state) => Err(ChannelError::InvalidState {
                operation,
                state: ready_state,
            }),
        }
    }

    /// Close the channel. No-op once closing or closed.
    ///
    /// If the transport cannot start closing, the channel is closed locally
    /// with code 1006.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), ChannelError> {
        let selected = {
            let mut state = self.inner.state.lock();
            if !state.ready_state.can_advance_to(ReadyState::Closing) {
                return Ok(());
            }
            if reason.len() > MAX_CLOSE_REASON_BYTES {
                return Err(ChannelError::InvalidArgument(format!(
                    "close reason is {} bytes, limit is {MAX_CLOSE_REASON_BYTES}",
                    reason.len()
                )));
            }
            state.ready_state.advance(ReadyState::Closing);
            state.selected.clone()
        };

        debug!(channel = %self.inner.channel.id(), code, reason, "close requested");
        match selected {
            Some(selected) => {
                if let Err(e) = selected.close(code, reason) {
                    warn!(channel = %self.inner.channel.id(), error = %e, "transport close failed");
                    self.inner.finish(CloseEvent::failed(e));
                }
            }
            None => self.inner.finish(CloseEvent::clean(code, reason)),
        }
        Ok(())
    }

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().ready_state
    }

    /// Sub-protocol negotiated by the open transport.
    pub fn protocol(&self) -> Option<String> {
        self.inner.state.lock().protocol.clone()
    }

    /// Location of the current or last connect.
    pub fn location(&self) -> Option<ChannelLocation> {
        self.inner.state.lock().location.clone()
    }

    /// Strategy of the currently selected transport.
    pub fn selected_strategy(&self) -> Option<StrategyId> {
        self.inner
            .state
            .lock()
            .selected
            .as_ref()
            .map(SelectedChannel::strategy)
    }

    /// Strategies not yet tried in the current attempt.
    pub fn remaining_candidates(&self) -> Vec<StrategyId> {
        self.inner.state.lock().candidates.iter().copied().collect()
    }

    /// Outcome of the latest candidate, if any has finished.
    pub fn outcome(&self) -> Option<ConnectOutcome> {
        self.inner.state.lock().outcome
    }

    /// Channel record of this composite.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.inner.channel
    }
}

impl fmt::Debug for CompositeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CompositeChannel")
            .field("channel", &self.inner.channel.id())
            .field("ready_state", &state.ready_state)
            .field("candidates", &state.candidates)
            .field("attempt", &state.attempt)
            .finish()
    }
}
