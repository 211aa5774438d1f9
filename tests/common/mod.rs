//! In-memory transports and listeners shared by the integration tests.

#![cfg(all(feature = "emulation", feature = "client"))]
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use composite_channel::channel::ReadyState;
use composite_channel::core::{
    ChannelError, ChannelListener, CloseEvent, ConnectRequest, HttpError, OutboundFrame, Payload,
    Transport, TransportContext, TransportFactory,
};
use composite_channel::http::{HttpEvents, HttpRequest, HttpResponse, HttpTransport};
use composite_channel::transport::StrategyId;
use parking_lot::Mutex;

/// Records everything the caller would see.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
    pub closes: Mutex<Vec<CloseEvent>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn closes(&self) -> Vec<CloseEvent> {
        self.closes.lock().clone()
    }

    pub fn opens(&self) -> usize {
        self.events().iter().filter(|e| e.starts_with("open")).count()
    }
}

impl ChannelListener for Recorder {
    fn connection_opened(&self, protocol: Option<&str>) {
        self.events.lock().push(format!("open {}", protocol.unwrap_or("-")));
    }

    fn connection_closed(&self, event: CloseEvent) {
        self.events.lock().push(format!("close {}", event.code));
        self.closes.lock().push(event);
    }

    fn text_message_received(&self, text: &str) {
        self.events.lock().push(format!("text {text}"));
    }

    fn binary_message_received(&self, data: &[u8]) {
        self.events.lock().push(format!("binary {data:?}"));
    }

    fn authentication_requested(&self, _location: &str, challenge: &str) {
        self.events.lock().push(format!("challenge {challenge}"));
    }

    fn redirected(&self, location: &str) {
        self.events.lock().push(format!("redirect {location}"));
    }
}

/// A transport the test drives by hand.
pub struct Manual {
    pub strategy: StrategyId,
    listener: Mutex<Option<Arc<dyn ChannelListener>>>,
    pub sent: Mutex<Vec<OutboundFrame>>,
    pub closes: Mutex<Vec<(u16, String)>>,
    close_error: Mutex<Option<ChannelError>>,
}

impl Manual {
    fn listener(&self) -> Arc<dyn ChannelListener> {
        match self.listener.lock().clone() {
            Some(listener) => listener,
            None => panic!("{} was never connected", self.strategy),
        }
    }

    pub fn open(&self, protocol: Option<&str>) {
        self.listener().connection_opened(protocol);
    }

    pub fn fail(&self, error: ChannelError) {
        self.listener().connection_closed(CloseEvent::failed(error));
    }

    pub fn closed(&self, event: CloseEvent) {
        self.listener().connection_closed(event);
    }

    pub fn text(&self, text: &str) {
        self.listener().text_message_received(text);
    }

    pub fn challenge(&self, location: &str, challenge: &str) {
        self.listener().authentication_requested(location, challenge);
    }

    /// Make the next `process_close` return `error`.
    pub fn fail_close(&self, error: ChannelError) {
        *self.close_error.lock() = Some(error);
    }
}

struct ManualTransport(Arc<Manual>);

impl Transport for ManualTransport {
    fn process_connect(
        &self,
        _request: ConnectRequest,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError> {
        *self.0.listener.lock() = Some(listener);
        Ok(())
    }

    fn process_send(&self, frame: OutboundFrame) -> Result<(), ChannelError> {
        self.0.sent.lock().push(frame);
        Ok(())
    }

    fn process_close(&self, code: u16, reason: &str) -> Result<(), ChannelError> {
        self.0.closes.lock().push((code, reason.to_owned()));
        match self.0.close_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Factory that hands out [`Manual`] transports and remembers them.
#[derive(Clone, Default)]
pub struct Attempts {
    created: Arc<Mutex<Vec<Arc<Manual>>>>,
}

impl Attempts {
    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn get(&self, index: usize) -> Arc<Manual> {
        self.created.lock()[index].clone()
    }

    pub fn last(&self) -> Arc<Manual> {
        match self.created.lock().last() {
            Some(manual) => manual.clone(),
            None => panic!("no transport created"),
        }
    }
}

impl TransportFactory for Attempts {
    fn create(&self, context: &TransportContext) -> Result<Box<dyn Transport>, ChannelError> {
        let manual = Arc::new(Manual {
            strategy: context.strategy,
            listener: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            close_error: Mutex::new(None),
        });
        self.created.lock().push(manual.clone());
        Ok(Box::new(ManualTransport(manual)))
    }
}

/// Factory whose transports fail synchronously inside `process_connect`.
#[derive(Clone)]
pub struct Failing(pub ChannelError);

struct FailingTransport(ChannelError);

impl Transport for FailingTransport {
    fn process_connect(
        &self,
        _request: ConnectRequest,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError> {
        listener.connection_closed(CloseEvent::failed(self.0.clone()));
        Ok(())
    }

    fn process_send(&self, _frame: OutboundFrame) -> Result<(), ChannelError> {
        Err(ChannelError::InvalidState {
            operation: "send",
            state: ReadyState::Closed,
        })
    }

    fn process_close(&self, _code: u16, _reason: &str) -> Result<(), ChannelError> {
        Ok(())
    }
}

impl TransportFactory for Failing {
    fn create(&self, _context: &TransportContext) -> Result<Box<dyn Transport>, ChannelError> {
        Ok(Box::new(FailingTransport(self.0.clone())))
    }
}

pub fn refused() -> Failing {
    Failing(ChannelError::Transport("connection refused".into()))
}

/// Canned reply for one HTTP request.
#[derive(Clone)]
pub enum Reply {
    /// Open, deliver the body, complete.
    Respond(HttpResponse),
    /// Open, deliver each chunk, stay pending.
    Stream(HttpResponse, Vec<Vec<u8>>),
    /// Fail inside `execute`.
    Refuse(HttpError),
}

struct Pending {
    request: Arc<HttpRequest>,
    events: Arc<dyn HttpEvents>,
}

/// HTTP client answering by request path, in script order.
#[derive(Default)]
pub struct ScriptedHttp {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<Arc<HttpRequest>>>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_handle: Mutex<u64>,
}

impl ScriptedHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, path: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .entry(path.to_owned())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<Arc<HttpRequest>> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Arc<HttpRequest>> {
        self.requests()
            .into_iter()
            .filter(|r| r.uri().path() == path)
            .collect()
    }

    /// Deliver a chunk on the pending request for `path`.
    pub fn push(&self, path: &str, chunk: &[u8]) {
        let found = self
            .pending
            .lock()
            .values()
            .find(|p| p.request.uri().path() == path)
            .map(|p| (p.request.clone(), p.events.clone()));
        if let Some((request, events)) = found {
            events.progressed(&request, chunk);
        }
    }
}

impl HttpTransport for ScriptedHttp {
    fn execute(&self, request: Arc<HttpRequest>, events: Arc<dyn HttpEvents>) -> Result<u64, HttpError> {
        self.requests.lock().push(request.clone());
        let handle = {
            let mut next = self.next_handle.lock();
            *next += 1;
            *next
        };
        let reply = self
            .replies
            .lock()
            .get_mut(request.uri().path())
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Respond(response)) => {
                events.opened(&request, response.head());
                if !response.body.is_empty() {
                    events.progressed(&request, &response.body);
                }
                events.loaded(&request, response);
            }
            Some(Reply::Stream(head, chunks)) => {
                self.pending.lock().insert(
                    handle,
                    Pending {
                        request: request.clone(),
                        events: events.clone(),
                    },
                );
                events.opened(&request, head);
                for chunk in chunks {
                    events.progressed(&request, &chunk);
                }
            }
            Some(Reply::Refuse(error)) => return Err(error),
            None => {
                self.pending.lock().insert(handle, Pending { request, events });
            }
        }
        Ok(handle)
    }

    fn cancel(&self, handle: u64) {
        self.pending.lock().remove(&handle);
    }
}

/// Replies that open an emulated session under `/echo`.
pub fn script_session(http: &ScriptedHttp, chunks: &[&str]) {
    http.on(
        "/echo/;e/cb",
        Reply::Respond(
            HttpResponse::new(201, "Created")
                .with_header("X-WebSocket-Protocol", "chat")
                .with_body("/echo/up\n/echo/down\n"),
        ),
    )
    .on(
        "/echo/down",
        Reply::Stream(
            HttpResponse::new(200, "OK").with_header("Content-Type", "text/plain; charset=utf-8"),
            chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
        ),
    );
}

/// Payload of a recorded frame as text.
pub fn frame_text(frame: &OutboundFrame) -> Option<&str> {
    match &frame.payload {
        Payload::Text(text) => Some(text),
        Payload::Binary(_) => None,
    }
}
