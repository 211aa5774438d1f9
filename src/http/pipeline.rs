//! Ordered request/response stage pipeline.
//!
//! Requests travel top to bottom through the stages and end at the
//! [`HttpTransport`]; responses travel bottom to top and end at the
//! [`PipelineListener`]. Each stage is handed a [`StageContext`] cursor that
//! knows its position, so it can forward, re-issue a request below itself,
//! or report upward without holding references to its neighbours.
//!
//! ```text
//!   PipelineListener   (emulated session)
//!         ▲
//!   stage 0            AuthStage
//!   stage 1            RedirectStage
//!         ▼
//!   HttpTransport      (external HTTP client)
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::auth::AuthStage;
use super::redirect::RedirectStage;
use super::request::{HttpReadyState, HttpRequest, HttpResponse};
use crate::core::{ChannelError, HttpError, TransportContext};
use crate::transport::StrategyId;

/// External HTTP client executing pipeline requests.
pub trait HttpTransport: Send + Sync {
    /// Start `request` and return an opaque handle for [`cancel`].
    ///
    /// Progress is reported through `events`, possibly before this returns.
    ///
    /// [`cancel`]: HttpTransport::cancel
    fn execute(&self, request: Arc<HttpRequest>, events: Arc<dyn HttpEvents>) -> Result<u64, HttpError>;

    /// Stop the request identified by `handle`.
    fn cancel(&self, handle: u64);
}

/// Callbacks from an [`HttpTransport`] for one request.
pub trait HttpEvents: Send + Sync {
    /// Status line and headers arrived.
    fn opened(&self, request: &Arc<HttpRequest>, head: HttpResponse);

    /// A chunk of the response body arrived.
    fn progressed(&self, request: &Arc<HttpRequest>, chunk: &[u8]);

    /// The response completed.
    fn loaded(&self, request: &Arc<HttpRequest>, response: HttpResponse);

    /// The request failed.
    fn errored(&self, request: &Arc<HttpRequest>, error: HttpError);
}

/// Receives what leaves the top of the pipeline.
pub trait PipelineListener: Send + Sync {
    /// Response head passed every stage.
    fn on_opened(&self, request: &Arc<HttpRequest>, head: &HttpResponse);

    /// Body chunk passed every stage.
    fn on_progress(&self, request: &Arc<HttpRequest>, chunk: &[u8]);

    /// Complete response passed every stage.
    fn on_loaded(&self, request: &Arc<HttpRequest>, response: HttpResponse);

    /// Request failed or a stage gave up on it.
    fn on_error(&self, request: &Arc<HttpRequest>, error: ChannelError);

    /// A stage received an authentication challenge.
    fn on_authentication_requested(&self, location: &str, challenge: &str) {
        let _ = (location, challenge);
    }

    /// A stage is following a redirect.
    fn on_redirected(&self, location: &str) {
        let _ = location;
    }

    /// Whether stages should still re-issue requests.
    fn is_active(&self) -> bool {
        true
    }
}

/// One processing step.
///
/// Every hook defaults to pass-through.
pub trait HttpStage: Send + Sync {
    /// Stage name, for logs.
    fn name(&self) -> &'static str;

    /// Request moving down.
    fn process_send(&self, ctx: &StageContext<'_>, request: Arc<HttpRequest>) -> Result<(), ChannelError> {
        ctx.send_down(request)
    }

    /// Response head moving up.
    fn on_opened(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, head: &HttpResponse) {
        ctx.opened_up(request, head);
    }

    /// Body chunk moving up.
    fn on_progress(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, chunk: &[u8]) {
        ctx.progress_up(request, chunk);
    }

    /// Complete response moving up.
    fn on_loaded(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, response: HttpResponse) {
        ctx.loaded_up(request, response);
    }

    /// Failure moving up.
    fn on_error(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, error: ChannelError) {
        ctx.fail_up(request, error);
    }
}

struct PipelineInner {
    stages: Vec<Arc<dyn HttpStage>>,
    transport: Arc<dyn HttpTransport>,
    listener: Arc<dyn PipelineListener>,
    context: TransportContext,
    in_flight: Mutex<Vec<Arc<HttpRequest>>>,
}

impl PipelineInner {
    fn ctx(self: &Arc<Self>, index: usize) -> StageContext<'_> {
        StageContext { inner: self, index }
    }

    /// Hand `request` to stage `index`, or to the transport past the last.
    fn send_from(self: &Arc<Self>, index: usize, request: Arc<HttpRequest>) -> Result<(), ChannelError> {
        match self.stages.get(index) {
            Some(stage) => stage.process_send(&self.ctx(index), request),
            None => self.execute(request),
        }
    }

    fn execute(self: &Arc<Self>, request: Arc<HttpRequest>) -> Result<(), ChannelError> {
        if request.ready_state() == HttpReadyState::Unsent {
            request.advance(HttpReadyState::Ready)?;
        }
        request.advance(HttpReadyState::Sending)?;
        self.in_flight.lock().push(request.clone());

        debug!(
            method = %request.method(),
            uri = %request.uri(),
            kind = ?request.kind(),
            "http request"
        );
        let events = Arc::new(PipelineEvents {
            inner: Arc::downgrade(self),
        });
        match self.transport.execute(request.clone(), events) {
            Ok(handle) => {
                request.set_transport_handle(handle);
                if request.ready_state() == HttpReadyState::Sending {
                    let _ = request.advance(HttpReadyState::Sent);
                }
                Ok(())
            }
            Err(e) => {
                self.forget(&request);
                let _ = request.abort();
                Err(e.into())
            }
        }
    }

    fn forget(&self, request: &Arc<HttpRequest>) {
        self.in_flight.lock().retain(|r| !Arc::ptr_eq(r, request));
    }

    // Upward delivery: `below` is the index of the stage the event leaves.

    fn opened_from(self: &Arc<Self>, below: usize, request: &Arc<HttpRequest>, head: &HttpResponse) {
        match below.checked_sub(1) {
            Some(index) => self.stages[index].on_opened(&self.ctx(index), request, head),
            None => self.listener.on_opened(request, head),
        }
    }

    fn progress_from(self: &Arc<Self>, below: usize, request: &Arc<HttpRequest>, chunk: &[u8]) {
        match below.checked_sub(1) {
            Some(index) => self.stages[index].on_progress(&self.ctx(index), request, chunk),
            None => self.listener.on_progress(request, chunk),
        }
    }

    fn loaded_from(self: &Arc<Self>, below: usize, request: &Arc<HttpRequest>, response: HttpResponse) {
        match below.checked_sub(1) {
            Some(index) => self.stages[index].on_loaded(&self.ctx(index), request, response),
            None => self.listener.on_loaded(request, response),
        }
    }

    fn error_from(self: &Arc<Self>, below: usize, request: &Arc<HttpRequest>, error: ChannelError) {
        match below.checked_sub(1) {
            Some(index) => self.stages[index].on_error(&self.ctx(index), request, error),
            None => self.listener.on_error(request, error),
        }
    }
}

/// A stage's position in the pipeline.
pub struct StageContext<'a> {
    inner: &'a Arc<PipelineInner>,
    index: usize,
}

impl StageContext<'_> {
    /// Pass `request` to the next stage down, or to the transport.
    ///
    /// Also used to re-issue a replacement request below this stage.
    pub fn send_down(&self, request: Arc<HttpRequest>) -> Result<(), ChannelError> {
        self.inner.send_from(self.index + 1, request)
    }

    /// Pass a response head to the next stage up.
    pub fn opened_up(&self, request: &Arc<HttpRequest>, head: &HttpResponse) {
        self.inner.opened_from(self.index, request, head);
    }

    /// Pass a body chunk to the next stage up.
    pub fn progress_up(&self, request: &Arc<HttpRequest>, chunk: &[u8]) {
        self.inner.progress_from(self.index, request, chunk);
    }

    /// Pass a complete response to the next stage up.
    pub fn loaded_up(&self, request: &Arc<HttpRequest>, response: HttpResponse) {
        self.inner.loaded_from(self.index, request, response);
    }

    /// Report a failure to the next stage up.
    pub fn fail_up(&self, request: &Arc<HttpRequest>, error: ChannelError) {
        self.inner.error_from(self.index, request, error);
    }

    /// Tell the listener an authentication challenge arrived.
    pub fn notify_auth(&self, location: &str, challenge: &str) {
        self.inner.listener.on_authentication_requested(location, challenge);
    }

    /// Tell the listener a redirect is being followed.
    pub fn notify_redirect(&self, location: &str) {
        self.inner.listener.on_redirected(location);
    }

    /// Check if the listener still wants requests re-issued.
    pub fn is_active(&self) -> bool {
        self.inner.listener.is_active()
    }

    /// Connect-attempt context of the owning transport.
    pub fn context(&self) -> &TransportContext {
        &self.inner.context
    }

    /// Position of this stage, top is 0.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Routes transport callbacks into the bottom of the pipeline.
struct PipelineEvents {
    inner: Weak<PipelineInner>,
}

impl PipelineEvents {
    /// Pipeline, unless `request` was aborted or already finished.
    fn live(&self, request: &Arc<HttpRequest>) -> Option<Arc<PipelineInner>> {
        if request.ready_state().is_terminal() {
            trace!(uri = %request.uri(), "event for finished request dropped");
            return None;
        }
        self.inner.upgrade()
    }
}

impl HttpEvents for PipelineEvents {
    fn opened(&self, request: &Arc<HttpRequest>, head: HttpResponse) {
        let Some(inner) = self.live(request) else {
            return;
        };
        if request.advance(HttpReadyState::Opened).is_err() {
            return;
        }
        trace!(uri = %request.uri(), status = head.status, "http response opened");
        request.set_response_head(head.clone());
        inner.opened_from(inner.stages.len(), request, &head);
    }

    fn progressed(&self, request: &Arc<HttpRequest>, chunk: &[u8]) {
        let Some(inner) = self.live(request) else {
            return;
        };
        if request.advance(HttpReadyState::Loading).is_err() {
            return;
        }
        inner.progress_from(inner.stages.len(), request, chunk);
    }

    fn loaded(&self, request: &Arc<HttpRequest>, response: HttpResponse) {
        let Some(inner) = self.live(request) else {
            return;
        };
        if request.advance(HttpReadyState::Loaded).is_err() {
            return;
        }
        inner.forget(request);
        if request.response_head().is_none() {
            request.set_response_head(response.head());
        }
        trace!(uri = %request.uri(), status = response.status, "http response loaded");
        inner.loaded_from(inner.stages.len(), request, response);
    }

    fn errored(&self, request: &Arc<HttpRequest>, error: HttpError) {
        let Some(inner) = self.live(request) else {
            return;
        };
        if request.advance(HttpReadyState::Error).is_err() {
            return;
        }
        inner.forget(request);
        debug!(uri = %request.uri(), error = %error, "http request failed");
        inner.error_from(inner.stages.len(), request, error.into());
    }
}

/// Request/response pipeline over an [`HttpTransport`].
#[derive(Clone)]
pub struct HttpPipeline {
    inner: Arc<PipelineInner>,
}

impl HttpPipeline {
    /// Start building a pipeline over `transport`.
    pub fn builder(transport: Arc<dyn HttpTransport>) -> HttpPipelineBuilder {
        HttpPipelineBuilder {
            transport,
            stages: Vec::new(),
            context: None,
        }
    }

    /// Send `request` from the top of the pipeline.
    pub fn send(&self, request: HttpRequest) -> Result<Arc<HttpRequest>, ChannelError> {
        let request = Arc::new(request);
        self.inner.send_from(0, request.clone())?;
        Ok(request)
    }

    /// Abort `request` and cancel it in the transport.
    pub fn abort(&self, request: &Arc<HttpRequest>) -> Result<(), ChannelError> {
        self.inner.forget(request);
        if request.abort()? {
            if let Some(handle) = request.transport_handle() {
                self.inner.transport.cancel(handle);
            }
        }
        Ok(())
    }

    /// Abort every in-flight request.
    pub fn abort_all(&self) {
        let requests = std::mem::take(&mut *self.inner.in_flight.lock());
        for request in &requests {
            if let Err(e) = self.abort(request) {
                debug!(uri = %request.uri(), error = %e, "abort failed");
            }
        }
    }

    /// Number of requests sent but not finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Stage names, top first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.inner.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl fmt::Debug for HttpPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPipeline")
            .field("stages", &self.stage_names())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Builder for [`HttpPipeline`].
pub struct HttpPipelineBuilder {
    transport: Arc<dyn HttpTransport>,
    stages: Vec<Arc<dyn HttpStage>>,
    context: Option<TransportContext>,
}

impl HttpPipelineBuilder {
    /// Append a stage below those already added.
    pub fn stage(mut self, stage: Arc<dyn HttpStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append the standard `[AuthStage, RedirectStage]` stages.
    pub fn default_stages(self) -> Self {
        self.stage(Arc::new(AuthStage)).stage(Arc::new(RedirectStage))
    }

    /// Connect-attempt context shared with every stage.
    pub fn context(mut self, context: TransportContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Finish with `listener` at the top.
    pub fn build(self, listener: Arc<dyn PipelineListener>) -> HttpPipeline {
        let context = self.context.unwrap_or_else(|| TransportContext {
            strategy: StrategyId::EMULATED,
            challenge_handler: None,
            connect_timer: None,
            redirect_policy: Default::default(),
        });
        HttpPipeline {
            inner: Arc::new(PipelineInner {
                stages: self.stages,
                transport: self.transport,
                listener,
                context,
                in_flight: Mutex::new(Vec::new()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelKind};
    use crate::http::{HttpMethod, RequestKind};
    use url::Url;

    /// Answers every request with a fixed response, synchronously.
    struct Fixed(HttpResponse);

    impl HttpTransport for Fixed {
        fn execute(&self, request: Arc<HttpRequest>, events: Arc<dyn HttpEvents>) -> Result<u64, HttpError> {
            events.opened(&request, self.0.head());
            if !self.0.body.is_empty() {
                events.progressed(&request, &self.0.body);
            }
            events.loaded(&request, self.0.clone());
            Ok(1)
        }

        fn cancel(&self, _handle: u64) {}
    }

    /// Never answers.
    #[derive(Default)]
    struct Silent {
        cancelled: Mutex<Vec<u64>>,
    }

    impl HttpTransport for Silent {
        fn execute(&self, _request: Arc<HttpRequest>, _events: Arc<dyn HttpEvents>) -> Result<u64, HttpError> {
            Ok(7)
        }

        fn cancel(&self, handle: u64) {
            self.cancelled.lock().push(handle);
        }
    }

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl PipelineListener for Log {
        fn on_opened(&self, _request: &Arc<HttpRequest>, head: &HttpResponse) {
            self.0.lock().push(format!("opened {}", head.status));
        }

        fn on_progress(&self, _request: &Arc<HttpRequest>, chunk: &[u8]) {
            self.0.lock().push(format!("progress {}", chunk.len()));
        }

        fn on_loaded(&self, _request: &Arc<HttpRequest>, response: HttpResponse) {
            self.0.lock().push(format!("loaded {}", response.status));
        }

        fn on_error(&self, _request: &Arc<HttpRequest>, error: ChannelError) {
            self.0.lock().push(format!("error {error}"));
        }
    }

    /// Tags requests on the way down.
    struct Tag(&'static str);

    impl HttpStage for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn process_send(&self, ctx: &StageContext<'_>, request: Arc<HttpRequest>) -> Result<(), ChannelError> {
            let seen = request.header("X-Stages").unwrap_or_default();
            request.set_header("X-Stages", format!("{seen}{}", self.0))?;
            ctx.send_down(request)
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::new(
            HttpMethod::Get,
            Url::parse("http://example.com/down").unwrap(),
            RequestKind::Downstream,
            Channel::root(ChannelKind::Concrete),
        )
    }

    #[test]
    fn test_requests_flow_top_to_bottom() {
        let log = Arc::new(Log::default());
        let pipeline = HttpPipeline::builder(Arc::new(Fixed(HttpResponse::new(200, "OK").with_body("hi"))))
            .stage(Arc::new(Tag("a")))
            .stage(Arc::new(Tag("b")))
            .build(log.clone());

        let request = pipeline.send(request()).unwrap();
        assert_eq!(request.header("X-Stages").as_deref(), Some("ab"));
        assert_eq!(request.ready_state(), HttpReadyState::Loaded);
        assert_eq!(request.transport_handle(), Some(1));
        assert_eq!(*log.0.lock(), vec!["opened 200", "progress 2", "loaded 200"]);
        assert_eq!(pipeline.in_flight(), 0);
    }

    #[test]
    fn test_default_stage_order() {
        let pipeline = HttpPipeline::builder(Arc::new(Silent::default()))
            .default_stages()
            .build(Arc::new(Log::default()));
        assert_eq!(pipeline.stage_names(), vec!["auth", "redirect"]);
    }

    #[test]
    fn test_abort_all_cancels_and_drops_late_events() {
        let silent = Arc::new(Silent::default());
        let log = Arc::new(Log::default());
        let pipeline = HttpPipeline::builder(silent.clone()).build(log.clone());

        let request = pipeline.send(request()).unwrap();
        assert_eq!(request.ready_state(), HttpReadyState::Sent);
        assert_eq!(pipeline.in_flight(), 1);

        pipeline.abort_all();
        assert_eq!(request.ready_state(), HttpReadyState::Error);
        assert_eq!(*silent.cancelled.lock(), vec![7]);
        assert_eq!(pipeline.in_flight(), 0);

        let events = PipelineEvents {
            inner: Arc::downgrade(&pipeline.inner),
        };
        events.loaded(&request, HttpResponse::new(200, "OK"));
        assert!(log.0.lock().is_empty());
    }
}
