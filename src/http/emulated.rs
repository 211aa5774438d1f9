//! Emulated full-duplex transport over plain HTTP requests.
//!
//! Session layout:
//!
//! 1. `POST {location}/;e/cb` creates the session. A `201` body carries the
//!    upstream URL on its first line and the downstream URL on its second.
//! 2. `GET downstream` is held open; each body chunk is one message.
//! 3. Every outbound message is one `POST upstream`, tagged with its
//!    sequence number.
//!
//! All requests go through the standard auth and redirect stages.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

use super::headers::HttpMethod;
use super::pipeline::{HttpPipeline, HttpTransport, PipelineListener};
use super::request::{HttpRequest, HttpResponse, RequestKind};
use crate::channel::{Channel, ChannelLocation, ReadyState};
use crate::core::constants::headers::{
    CONTENT_TYPE, SEQUENCE_NO, WEBSOCKET_PROTOCOL, WEBSOCKET_VERSION,
};
use crate::core::constants::{CLOSE_NORMAL, EMULATION_CREATE_SUFFIX, EMULATION_VERSION};
use crate::core::{
    ChannelError, ChannelListener, CloseEvent, ConnectRequest, OutboundFrame, Payload, Transport,
    TransportContext, TransportFactory,
};

/// Session create URI for `location`.
pub fn create_uri(location: &ChannelLocation) -> Url {
    let mut uri = location.http_url();
    let path = format!(
        "{}{}",
        uri.path().trim_end_matches('/'),
        EMULATION_CREATE_SUFFIX
    );
    uri.set_path(&path);
    uri
}

struct Session {
    ready_state: ReadyState,
    started: bool,
    listener: Option<Arc<dyn ChannelListener>>,
    channel: Option<Arc<Channel>>,
    upstream: Option<Url>,
    protocol: Option<String>,
    /// Downstream content type is `text/*`.
    text_stream: bool,
}

struct EmulatedInner {
    pipeline: HttpPipeline,
    session: Mutex<Session>,
}

impl EmulatedInner {
    fn listener(&self) -> Option<Arc<dyn ChannelListener>> {
        self.session.lock().listener.clone()
    }

    fn on_created(&self, request: &HttpRequest, response: &HttpResponse) -> Result<(), ChannelError> {
        if response.status != 201 {
            return Err(ChannelError::Handshake(format!(
                "session create returned {} {}",
                response.status, response.message
            )));
        }

        let body = String::from_utf8_lossy(&response.body);
        let mut lines = body.lines().map(str::trim).filter(|line| !line.is_empty());
        let (Some(upstream), Some(downstream)) = (lines.next(), lines.next()) else {
            return Err(ChannelError::Protocol(
                "session create response must list upstream and downstream URLs".into(),
            ));
        };
        let resolve = |line: &str| {
            request
                .uri()
                .join(line)
                .map_err(|e| ChannelError::Protocol(format!("bad session URL {line}: {e}")))
        };
        let upstream = resolve(upstream)?;
        let downstream = resolve(downstream)?;
        let protocol = response
            .headers
            .get(WEBSOCKET_PROTOCOL)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned);

        let channel = {
            let mut session = self.session.lock();
            if session.ready_state != ReadyState::Connecting {
                return Ok(());
            }
            session.upstream = Some(upstream.clone());
            session.protocol = protocol;
            session.channel.clone()
        };
        let Some(channel) = channel else {
            return Ok(());
        };

        debug!(%upstream, %downstream, "emulated session created");
        let sequence = channel.next_sequence();
        let request = HttpRequest::new(HttpMethod::Get, downstream, RequestKind::Downstream, channel)
            .with_header(SEQUENCE_NO, sequence.to_string());
        self.pipeline.send(request)?;
        Ok(())
    }

    fn on_downstream_opened(&self, head: &HttpResponse) {
        if head.status != 200 {
            return;
        }
        let (listener, protocol) = {
            let mut session = self.session.lock();
            if !session.ready_state.advance(ReadyState::Open).is_advanced() {
                return;
            }
            session.text_stream = head
                .headers
                .media_type()
                .is_some_and(|media| media.starts_with("text/"));
            (session.listener.clone(), session.protocol.clone())
        };
        info!(protocol = protocol.as_deref().unwrap_or(""), "emulated session open");
        if let Some(listener) = listener {
            listener.connection_opened(protocol.as_deref());
        }
    }

    fn on_downstream_chunk(&self, chunk: &[u8]) {
        let (listener, text_stream) = {
            let session = self.session.lock();
            if session.ready_state != ReadyState::Open {
                return;
            }
            (session.listener.clone(), session.text_stream)
        };
        let Some(listener) = listener else {
            return;
        };
        if !text_stream {
            listener.binary_message_received(chunk);
            return;
        }
        match std::str::from_utf8(chunk) {
            Ok(text) => listener.text_message_received(text),
            Err(_) => self.fail(ChannelError::Protocol("downstream text is not valid UTF-8".into())),
        }
    }

    fn on_downstream_ended(&self, response: &HttpResponse) {
        let ready_state = self.session.lock().ready_state;
        match ready_state {
            ReadyState::Connecting => self.fail(ChannelError::Handshake(format!(
                "downstream returned {} {}",
                response.status, response.message
            ))),
            ReadyState::Open => self.fail(ChannelError::Transport("downstream ended by server".into())),
            ReadyState::Closing => self.finish(CloseEvent::clean(CLOSE_NORMAL, "")),
            ReadyState::Closed => {}
        }
    }

    fn fail(&self, error: ChannelError) {
        debug!(error = %error, "emulated session failed");
        self.pipeline.abort_all();
        self.finish(CloseEvent::failed(error));
    }

    fn finish(&self, event: CloseEvent) {
        let listener = {
            let mut session = self.session.lock();
            if !session.ready_state.advance(ReadyState::Closed).is_advanced() {
                return;
            }
            session.listener.take()
        };
        if let Some(listener) = listener {
            listener.connection_closed(event);
        }
    }
}

/// Pipeline listener feeding the session.
struct SessionEvents {
    inner: Weak<EmulatedInner>,
}

impl PipelineListener for SessionEvents {
    fn on_opened(&self, request: &Arc<HttpRequest>, head: &HttpResponse) {
        if let (Some(inner), RequestKind::Downstream) = (self.inner.upgrade(), request.kind()) {
            inner.on_downstream_opened(head);
        }
    }

    fn on_progress(&self, request: &Arc<HttpRequest>, chunk: &[u8]) {
        if let (Some(inner), RequestKind::Downstream) = (self.inner.upgrade(), request.kind()) {
            inner.on_downstream_chunk(chunk);
        }
    }

    fn on_loaded(&self, request: &Arc<HttpRequest>, response: HttpResponse) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match request.kind() {
            RequestKind::Create => {
                if let Err(e) = inner.on_created(request, &response) {
                    inner.fail(e);
                }
            }
            RequestKind::Downstream => inner.on_downstream_ended(&response),
            RequestKind::Upstream if !response.is_success() => inner.fail(ChannelError::Transport(
                format!("upstream returned {} {}", response.status, response.message),
            )),
            RequestKind::Upstream => {}
        }
    }

    fn on_error(&self, _request: &Arc<HttpRequest>, error: ChannelError) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.session.lock().ready_state.is_closing_or_closed() {
            return;
        }
        inner.fail(error);
    }

    fn on_authentication_requested(&self, location: &str, challenge: &str) {
        if let Some(listener) = self.inner.upgrade().and_then(|inner| inner.listener()) {
            listener.authentication_requested(location, challenge);
        }
    }

    fn on_redirected(&self, location: &str) {
        if let Some(listener) = self.inner.upgrade().and_then(|inner| inner.listener()) {
            listener.redirected(location);
        }
    }

    fn is_active(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| {
            matches!(
                inner.session.lock().ready_state,
                ReadyState::Connecting | ReadyState::Open
            )
        })
    }
}

/// HTTP-emulated transport for one connect attempt.
pub struct EmulatedTransport {
    inner: Arc<EmulatedInner>,
}

impl EmulatedTransport {
    /// Create a transport issuing requests through `http`.
    pub fn new(http: Arc<dyn HttpTransport>, context: TransportContext) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<EmulatedInner>| EmulatedInner {
            pipeline: HttpPipeline::builder(http)
                .default_stages()
                .context(context)
                .build(Arc::new(SessionEvents { inner: weak.clone() })),
            session: Mutex::new(Session {
                ready_state: ReadyState::Connecting,
                started: false,
                listener: None,
                channel: None,
                upstream: None,
                protocol: None,
                text_stream: false,
            }),
        });
        Self { inner }
    }

    /// Current session state.
    pub fn ready_state(&self) -> ReadyState {
        self.inner.session.lock().ready_state
    }
}

impl Transport for EmulatedTransport {
    fn process_connect(
        &self,
        request: ConnectRequest,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError> {
        {
            let mut session = self.inner.session.lock();
            if session.started {
                return Err(ChannelError::InvalidState {
                    operation: "connect",
                    state: session.ready_state,
                });
            }
            session.started = true;
            session.listener = Some(listener);
            session.channel = Some(request.channel.clone());
        }

        let uri = create_uri(&request.location);
        let sequence = request.channel.next_sequence();
        let mut create = HttpRequest::new(HttpMethod::Post, uri, RequestKind::Create, request.channel)
            .with_header(WEBSOCKET_VERSION, EMULATION_VERSION)
            .with_header(SEQUENCE_NO, sequence.to_string());
        if !request.protocols.is_empty() {
            create = create.with_header(WEBSOCKET_PROTOCOL, request.protocols.join(", "));
        }

        debug!(uri = %create.uri(), "creating emulated session");
        if let Err(e) = self.inner.pipeline.send(create) {
            let mut session = self.inner.session.lock();
            session.ready_state.advance(ReadyState::Closed);
            session.listener = None;
            return Err(e);
        }
        Ok(())
    }

    fn process_send(&self, frame: OutboundFrame) -> Result<(), ChannelError> {
        let (upstream, channel) = {
            let session = self.inner.session.lock();
            match (&session.upstream, &session.channel, session.ready_state) {
                (Some(upstream), Some(channel), ReadyState::Open) => (upstream.clone(), channel.clone()),
                (_, _, state) => {
                    return Err(ChannelError::InvalidState {
                        operation: "send",
                        state,
                    });
                }
            }
        };

        // One sequence spans every request of the session; `frame.sequence` is not sent.
        let sequence = channel.next_sequence();
        let (content_type, body) = match frame.payload {
            Payload::Text(text) => ("text/plain; charset=utf-8", text.into_bytes()),
            Payload::Binary(data) => ("application/octet-stream", data),
        };
        let request = HttpRequest::new(HttpMethod::Post, upstream, RequestKind::Upstream, channel)
            .with_header(SEQUENCE_NO, sequence.to_string())
            .with_header(CONTENT_TYPE, content_type)
            .with_body(body);
        if let Err(e) = self.inner.pipeline.send(request) {
            self.inner.fail(e.clone());
            return Err(e);
        }
        Ok(())
    }

    fn process_close(&self, code: u16, reason: &str) -> Result<(), ChannelError> {
        {
            let mut session = self.inner.session.lock();
            if !session.ready_state.advance(ReadyState::Closing).is_advanced() {
                return Ok(());
            }
        }
        debug!(code, reason, "closing emulated session");
        self.inner.pipeline.abort_all();
        self.inner.finish(CloseEvent::clean(code, reason));
        Ok(())
    }
}

impl fmt::Debug for EmulatedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedTransport")
            .field("ready_state", &self.ready_state())
            .field("pipeline", &self.inner.pipeline)
            .finish()
    }
}

/// Builds an [`EmulatedTransport`] per connect attempt.
#[derive(Clone)]
pub struct EmulatedTransportFactory {
    http: Arc<dyn HttpTransport>,
}

impl EmulatedTransportFactory {
    /// Create a factory over the HTTP client `http`.
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self { http }
    }
}

impl TransportFactory for EmulatedTransportFactory {
    fn create(&self, context: &TransportContext) -> Result<Box<dyn Transport>, ChannelError> {
        Ok(Box::new(EmulatedTransport::new(self.http.clone(), context.clone())))
    }
}

impl fmt::Debug for EmulatedTransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedTransportFactory").finish_non_exhaustive()
    }
}
