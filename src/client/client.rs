//! High-level duplex client.
//!
//! Wraps a [`CompositeChannel`] and a [`HandoffQueue`] so that messages
//! delivered on transport callback threads can be consumed with either a
//! blocking [`DuplexClient::receive`] or an async [`DuplexClient::recv`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::channel::{ReadyState, RedirectPolicy};
use crate::core::constants::{CLOSE_GOING_AWAY, DEFAULT_CONNECT_TIMEOUT, HANDOFF_QUEUE_CAPACITY};
use crate::core::{ChallengeHandler, ChannelError, ChannelListener, CloseEvent};
use crate::transport::{CompositeChannel, CompositeConfig, HandoffQueue, StrategyId, StrategyRegistry};

/// Errors that can occur in the duplex client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The channel rejected an operation.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The connection closed before opening.
    #[error("connection closed ({code}): {reason}")]
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
        /// Error that ended the connection, if any.
        error: Option<ChannelError>,
    },

    /// The client was dropped while an operation was pending.
    #[error("client disconnected")]
    Disconnected,

    /// A blocking receive task failed.
    #[error("receive task failed: {0}")]
    Runtime(String),
}

impl From<CloseEvent> for ClientError {
    fn from(event: CloseEvent) -> Self {
        ClientError::Closed {
            code: event.code,
            reason: event.reason,
            error: event.error,
        }
    }
}

/// An inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
}

impl Message {
    /// Text content, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }

    /// Message body as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Upper bound for a connect attempt. `None` disables the timer.
    pub connect_timeout: Option<Duration>,

    /// Redirect policy for HTTP-emulated strategies.
    pub redirect_policy: RedirectPolicy,

    /// Handler for authentication challenges.
    pub challenge_handler: Option<Arc<dyn ChallengeHandler>>,

    /// Inbound messages buffered before transport callbacks block.
    pub queue_capacity: usize,

    /// Runtime for the connect timer. Defaults to the current runtime.
    pub runtime: Option<Handle>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            redirect_policy: RedirectPolicy::default(),
            challenge_handler: None,
            queue_capacity: HANDOFF_QUEUE_CAPACITY,
            runtime: None,
        }
    }
}

impl ClientConfig {
    fn composite(&self) -> CompositeConfig {
        let mut config = CompositeConfig::default().with_redirect_policy(self.redirect_policy);
        config.connect_timeout = self.connect_timeout;
        config.challenge_handler = self.challenge_handler.clone();
        config.runtime = self.runtime.clone();
        config
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("redirect_policy", &self.redirect_policy)
            .field("challenge_handler", &self.challenge_handler.is_some())
            .field("queue_capacity", &self.queue_capacity)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

/// Builder for creating a [`DuplexClient`].
#[derive(Debug)]
pub struct DuplexClientBuilder {
    registry: Option<Arc<StrategyRegistry>>,
    config: ClientConfig,
}

impl DuplexClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            registry: None,
            config: ClientConfig::default(),
        }
    }

    /// Set the strategy table and factories.
    pub fn registry(mut self, registry: Arc<StrategyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the challenge handler.
    pub fn challenge_handler(mut self, handler: Arc<dyn ChallengeHandler>) -> Self {
        self.config.challenge_handler = Some(handler);
        self
    }

    /// Set the redirect policy.
    pub fn redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.config.redirect_policy = policy;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Disable the connect timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.config.connect_timeout = None;
        self
    }

    /// Set the inbound queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Run the connect timer on `runtime`.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.config.runtime = Some(runtime);
        self
    }

    /// Build the client configuration.
    pub fn config(self) -> ClientConfig {
        self.config
    }

    /// Build the client. Without a registry, the default scheme table is
    /// used with no factories registered.
    pub fn build(self) -> DuplexClient {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(StrategyRegistry::with_defaults()));
        DuplexClient::new(registry, self.config)
    }
}

impl Default for DuplexClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type Pending = oneshot::Sender<Result<Option<String>, ClientError>>;

/// Composite listener feeding the queue and the pending connect.
struct ClientEvents {
    queue: Arc<HandoffQueue<Message>>,
    pending: Mutex<Option<Pending>>,
    last_close: Mutex<Option<CloseEvent>>,
}

impl ClientEvents {
    fn resolve(&self, result: Result<Option<String>, ClientError>) {
        if let Some(pending) = self.pending.lock().take() {
            let _ = pending.send(result);
        }
    }
}

impl ChannelListener for ClientEvents {
    fn connection_opened(&self, protocol: Option<&str>) {
        self.resolve(Ok(protocol.map(str::to_owned)));
    }

    fn connection_closed(&self, event: CloseEvent) {
        debug!(code = event.code, reason = %event.reason, "client connection closed");
        self.queue.done();
        *self.last_close.lock() = Some(event.clone());
        self.resolve(Err(event.into()));
    }

    fn text_message_received(&self, text: &str) {
        self.queue.put(Message::Text(text.to_owned()));
    }

    fn binary_message_received(&self, data: &[u8]) {
        self.queue.put(Message::Binary(data.to_vec()));
    }

    fn authentication_requested(&self, location: &str, challenge: &str) {
        debug!(location, challenge, "authentication requested");
    }

    fn redirected(&self, location: &str) {
        debug!(location, "redirected");
    }
}

/// A full-duplex messaging client.
///
/// # Example
///
/// ```ignore
/// use composite_channel::client::DuplexClientBuilder;
///
/// let client = DuplexClientBuilder::new()
///     .registry(registry)
///     .connect_timeout(Duration::from_secs(5))
///     .build();
///
/// client.connect("ws://example.com/echo", &["chat"]).await?;
/// client.send_text("hello")?;
/// while let Some(message) = client.recv().await? {
///     // Handle message
/// }
/// ```
pub struct DuplexClient {
    composite: CompositeChannel,
    events: Arc<ClientEvents>,
    config: ClientConfig,
}

impl DuplexClient {
    /// Create a closed client.
    pub fn new(registry: Arc<StrategyRegistry>, config: ClientConfig) -> Self {
        let queue = Arc::new(HandoffQueue::new(config.queue_capacity));
        let events = Arc::new(ClientEvents {
            queue,
            pending: Mutex::new(None),
            last_close: Mutex::new(None),
        });
        let composite = CompositeChannel::new(registry, config.composite(), events.clone());
        Self {
            composite,
            events,
            config,
        }
    }

    /// Connect to `location`, requesting `protocols` in order.
    ///
    /// Resolves with the negotiated sub-protocol once a candidate opens, or
    /// with [`ClientError::Closed`] once every candidate has failed.
    pub async fn connect(&self, location: &str, protocols: &[&str]) -> Result<Option<String>, ClientError> {
        let ready_state = self.composite.ready_state();
        if ready_state != ReadyState::Closed {
            return Err(ChannelError::InvalidState {
                operation: "connect",
                state: ready_state,
            }
            .into());
        }

        self.events.queue.reset();
        *self.events.last_close.lock() = None;
        let (tx, rx) = oneshot::channel();
        *self.events.pending.lock() = Some(tx);

        if let Err(e) = self.composite.connect(location, protocols) {
            self.events.pending.lock().take();
            self.events.queue.done();
            return Err(e.into());
        }

        let protocol = rx.await.map_err(|_| ClientError::Disconnected)??;
        info!(
            location,
            strategy = %self.selected_strategy().map_or("-", |s| s.name()),
            protocol = protocol.as_deref().unwrap_or(""),
            "client connected"
        );
        Ok(protocol)
    }

    /// Send a text message.
    pub fn send_text(&self, text: &str) -> Result<(), ClientError> {
        Ok(self.composite.send_text(text)?)
    }

    /// Send a binary message.
    pub fn send_binary(&self, data: &[u8]) -> Result<(), ClientError> {
        Ok(self.composite.send_binary(data)?)
    }

    /// Close the connection.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), ClientError> {
        Ok(self.composite.close(code, reason)?)
    }

    /// Next inbound message, blocking the calling thread.
    ///
    /// Returns `None` once the connection has closed and every buffered
    /// message has been taken.
    pub fn receive(&self) -> Option<Message> {
        self.events.queue.take()
    }

    /// Next inbound message without blocking.
    pub fn try_receive(&self) -> Option<Message> {
        self.events.queue.try_take()
    }

    /// Next inbound message, waiting on a blocking-pool thread.
    pub async fn recv(&self) -> Result<Option<Message>, ClientError> {
        let queue = self.events.queue.clone();
        tokio::task::spawn_blocking(move || queue.take())
            .await
            .map_err(|e| ClientError::Runtime(e.to_string()))
    }

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.composite.ready_state()
    }

    /// Check if the client is connected.
    pub fn is_connected(&self) -> bool {
        self.composite.ready_state() == ReadyState::Open
    }

    /// Sub-protocol negotiated by the open connection.
    pub fn protocol(&self) -> Option<String> {
        self.composite.protocol()
    }

    /// Strategy of the transport in use.
    pub fn selected_strategy(&self) -> Option<StrategyId> {
        self.composite.selected_strategy()
    }

    /// Close event of the last connection, once it has closed.
    pub fn last_close(&self) -> Option<CloseEvent> {
        self.events.last_close.lock().clone()
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for DuplexClient {
    fn drop(&mut self) {
        if !self.composite.ready_state().is_closing_or_closed() {
            let _ = self.composite.close(CLOSE_GOING_AWAY, "");
        }
        self.events.queue.done();
    }
}

impl fmt::Debug for DuplexClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexClient")
            .field("composite", &self.composite)
            .field("queued", &self.events.queue.len())
            .finish()
    }
}
