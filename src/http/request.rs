//! HTTP request/response model driven by the emulation pipeline.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use super::headers::{HttpHeaders, HttpMethod};
use crate::channel::Channel;
use crate::core::HttpError;

/// Request lifecycle.
///
/// `Unsent → Ready → Sending → Sent → Opened → Loading* → Loaded`, with
/// `Error` reachable from every state after `Unsent`. Intermediate states
/// may be skipped going forward. `Loaded` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpReadyState {
    /// Created, not yet prepared.
    Unsent,
    /// Prepared; headers still mutable.
    Ready,
    /// Handed to the transport.
    Sending,
    /// Transport accepted the request.
    Sent,
    /// Response status and headers received.
    Opened,
    /// Response body arriving.
    Loading,
    /// Response complete.
    Loaded,
    /// Failed or aborted.
    Error,
}

impl HttpReadyState {
    /// Upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpReadyState::Unsent => "UNSENT",
            HttpReadyState::Ready => "READY",
            HttpReadyState::Sending => "SENDING",
            HttpReadyState::Sent => "SENT",
            HttpReadyState::Opened => "OPENED",
            HttpReadyState::Loading => "LOADING",
            HttpReadyState::Loaded => "LOADED",
            HttpReadyState::Error => "ERROR",
        }
    }

    /// Check if `next` is a legal successor.
    pub fn can_advance_to(self, next: HttpReadyState) -> bool {
        use HttpReadyState::*;
        match (self, next) {
            (Unsent, Ready) => true,
            (Ready, Sending) | (Ready, Error) => true,
            (Sending | Sent | Opened | Loading, Error) => true,
            (Loading, Loading) => true,
            (Sending | Sent | Opened | Loading, Sent | Opened | Loading | Loaded) => next > self,
            _ => false,
        }
    }

    /// Check if no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, HttpReadyState::Loaded | HttpReadyState::Error)
    }
}

impl fmt::Display for HttpReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a request in an emulated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Session creation.
    Create,
    /// Client-to-server message.
    Upstream,
    /// Long-lived server-to-client stream.
    Downstream,
}

struct RequestState {
    ready_state: HttpReadyState,
    transport_handle: Option<u64>,
    /// Status line and headers of the response, once opened.
    head: Option<HttpResponse>,
}

/// One HTTP request.
pub struct HttpRequest {
    method: HttpMethod,
    uri: Url,
    is_async: bool,
    kind: RequestKind,
    channel: Arc<Channel>,
    redirects: u32,
    body: Vec<u8>,
    headers: Mutex<HttpHeaders>,
    state: Mutex<RequestState>,
}

impl HttpRequest {
    /// Create an unsent asynchronous request owned by `channel`.
    pub fn new(method: HttpMethod, uri: Url, kind: RequestKind, channel: Arc<Channel>) -> Self {
        Self {
            method,
            uri,
            is_async: true,
            kind,
            channel,
            redirects: 0,
            body: Vec::new(),
            headers: Mutex::new(HttpHeaders::new()),
            state: Mutex::new(RequestState {
                ready_state: HttpReadyState::Unsent,
                transport_handle: None,
                head: None,
            }),
        }
    }

    /// Set the request body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the async flag.
    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    /// Add a header.
    pub fn with_header(self, name: &str, value: impl Into<String>) -> Self {
        self.headers.lock().set(name, value);
        self
    }

    /// Request method.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Target URI.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Async flag.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Session role.
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Owning channel.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Redirects followed to reach this request.
    pub fn redirects(&self) -> u32 {
        self.redirects
    }

    /// Request body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Snapshot of the request headers.
    pub fn headers(&self) -> HttpHeaders {
        self.headers.lock().clone()
    }

    /// Value of one request header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.lock().get(name).map(str::to_owned)
    }

    /// Set a header. Only permitted in `Unsent` and `Ready`.
    pub fn set_header(&self, name: &str, value: impl Into<String>) -> Result<(), HttpError> {
        let state = self.state.lock();
        if state.ready_state > HttpReadyState::Ready {
            return Err(HttpError::HeadersLocked);
        }
        self.headers.lock().set(name, value);
        Ok(())
    }

    /// Current ready state.
    pub fn ready_state(&self) -> HttpReadyState {
        self.state.lock().ready_state
    }

    /// Move to `next`.
    pub fn advance(&self, next: HttpReadyState) -> Result<(), HttpError> {
        let mut state = self.state.lock();
        if !state.ready_state.can_advance_to(next) {
            return Err(HttpError::IllegalTransition {
                from: state.ready_state.as_str(),
                to: next.as_str(),
            });
        }
        state.ready_state = next;
        Ok(())
    }

    /// Move to `Error`.
    ///
    /// Returns `false` if the request had already finished. Aborting an
    /// unsent request is illegal.
    pub fn abort(&self) -> Result<bool, HttpError> {
        let mut state = self.state.lock();
        match state.ready_state {
            HttpReadyState::Unsent => Err(HttpError::IllegalTransition {
                from: HttpReadyState::Unsent.as_str(),
                to: HttpReadyState::Error.as_str(),
            }),
            current if current.is_terminal() => Ok(false),
            _ => {
                state.ready_state = HttpReadyState::Error;
                Ok(true)
            }
        }
    }

    /// Opaque handle assigned by the HTTP transport.
    pub fn transport_handle(&self) -> Option<u64> {
        self.state.lock().transport_handle
    }

    pub(crate) fn set_transport_handle(&self, handle: u64) {
        self.state.lock().transport_handle = Some(handle);
    }

    /// Response status line and headers, once opened.
    pub fn response_head(&self) -> Option<HttpResponse> {
        self.state.lock().head.clone()
    }

    pub(crate) fn set_response_head(&self, head: HttpResponse) {
        self.state.lock().head = Some(head);
    }

    /// Fresh unsent copy with the same method, URI, headers and body.
    pub fn clone_for_retry(&self) -> HttpRequest {
        HttpRequest {
            method: self.method,
            uri: self.uri.clone(),
            is_async: self.is_async,
            kind: self.kind,
            channel: self.channel.clone(),
            redirects: self.redirects,
            body: self.body.clone(),
            headers: Mutex::new(self.headers()),
            state: Mutex::new(RequestState {
                ready_state: HttpReadyState::Unsent,
                transport_handle: None,
                head: None,
            }),
        }
    }

    /// Fresh unsent copy aimed at `uri`, counting one more redirect.
    pub fn redirect_to(&self, uri: Url) -> HttpRequest {
        let mut next = self.clone_for_retry();
        next.uri = uri;
        next.redirects = self.redirects + 1;
        next
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("uri", &self.uri.as_str())
            .field("kind", &self.kind)
            .field("ready_state", &self.ready_state())
            .field("redirects", &self.redirects)
            .finish()
    }
}

/// HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub message: String,
    /// Response headers.
    pub headers: HttpHeaders,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Response with `status` and no headers or body.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Check for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Status line and headers only.
    pub fn head(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            message: self.message.clone(),
            headers: self.headers.clone(),
            body: Vec::new(),
        }
    }

    /// Parse an HTTP/1.x response carried as a message body.
    ///
    /// ```text
    /// HTTP/1.1 401 Unauthorized\r\n
    /// WWW-Authenticate: Basic realm="x"\r\n
    /// \r\n
    /// ```
    pub fn parse(data: &[u8]) -> Result<HttpResponse, HttpError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| HttpError::Malformed("response is not valid UTF-8".into()))?;
        let (head, body) = match text.find("\r\n\r\n") {
            Some(end) => (&text[..end], &text[end + 4..]),
            None => match text.find("\n\n") {
                Some(end) => (&text[..end], &text[end + 2..]),
                None => (text, ""),
            },
        };

        let mut lines = head.lines();
        let status_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or_else(|| HttpError::Malformed("missing status line".into()))?;
        let mut parts = status_line.trim().splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(HttpError::Malformed(format!("bad status line: {status_line}")));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| HttpError::Malformed(format!("bad status line: {status_line}")))?;
        let message = parts.next().unwrap_or_default().to_string();

        let mut headers = HttpHeaders::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HttpError::Malformed(format!("bad header line: {line}")))?;
            headers.append(name.trim(), value.trim());
        }

        Ok(HttpResponse {
            status,
            message,
            headers,
            body: body.as_bytes().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;

    fn request() -> HttpRequest {
        HttpRequest::new(
            HttpMethod::Post,
            Url::parse("http://example.com/;e/cb").unwrap(),
            RequestKind::Create,
            Channel::root(ChannelKind::Concrete),
        )
    }

    #[test]
    fn test_lifecycle() {
        let request = request();
        request.advance(HttpReadyState::Ready).unwrap();
        request.advance(HttpReadyState::Sending).unwrap();
        request.advance(HttpReadyState::Opened).unwrap();
        request.advance(HttpReadyState::Loading).unwrap();
        request.advance(HttpReadyState::Loading).unwrap();
        request.advance(HttpReadyState::Loaded).unwrap();
        assert_eq!(
            request.advance(HttpReadyState::Error),
            Err(HttpError::IllegalTransition {
                from: "LOADED",
                to: "ERROR"
            })
        );
    }

    #[test]
    fn test_no_backward_transitions() {
        let request = request();
        assert!(request.advance(HttpReadyState::Sending).is_err());
        request.advance(HttpReadyState::Ready).unwrap();
        request.advance(HttpReadyState::Sending).unwrap();
        request.advance(HttpReadyState::Opened).unwrap();
        assert!(request.advance(HttpReadyState::Sent).is_err());
    }

    #[test]
    fn test_headers_lock_after_ready() {
        let request = request();
        request.set_header("X-A", "1").unwrap();
        request.advance(HttpReadyState::Ready).unwrap();
        request.set_header("X-B", "2").unwrap();
        request.advance(HttpReadyState::Sending).unwrap();
        assert_eq!(request.set_header("X-C", "3"), Err(HttpError::HeadersLocked));
        assert_eq!(request.headers().len(), 2);
    }

    #[test]
    fn test_abort() {
        let request = request();
        assert!(request.abort().is_err());
        request.advance(HttpReadyState::Ready).unwrap();
        assert_eq!(request.abort(), Ok(true));
        assert_eq!(request.ready_state(), HttpReadyState::Error);
        assert_eq!(request.abort(), Ok(false));
    }

    #[test]
    fn test_clone_for_retry_keeps_request_line() {
        let request = request().with_header("X-WebSocket-Version", "wseb-1.0").with_body("x");
        request.advance(HttpReadyState::Ready).unwrap();
        request.advance(HttpReadyState::Sending).unwrap();

        let retry = request.clone_for_retry();
        assert_eq!(retry.ready_state(), HttpReadyState::Unsent);
        assert_eq!(retry.method(), HttpMethod::Post);
        assert_eq!(retry.uri(), request.uri());
        assert_eq!(retry.headers(), request.headers());
        assert_eq!(retry.body(), b"x");
        assert!(Arc::ptr_eq(retry.channel(), request.channel()));

        let moved = request.redirect_to(Url::parse("http://example.com/other").unwrap());
        assert_eq!(moved.redirects(), 1);
        assert_eq!(moved.uri().path(), "/other");
    }

    #[test]
    fn test_parse_wrapped_response() {
        let raw = b"HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Application realm=\"x\"\r\nContent-Length: 0\r\n\r\n";
        let response = HttpResponse::parse(raw).unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(response.message, "Unauthorized");
        assert_eq!(
            response.headers.get("www-authenticate"),
            Some("Application realm=\"x\"")
        );
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(HttpResponse::parse(b"").is_err());
        assert!(HttpResponse::parse(b"hello world").is_err());
        assert!(HttpResponse::parse(b"HTTP/1.1 abc Nope\r\n\r\n").is_err());
    }
}
