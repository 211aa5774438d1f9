//! Scripted HTTP transport shared by the http module tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::pipeline::{HttpEvents, HttpTransport, PipelineListener};
use super::request::{HttpRequest, HttpResponse};
use crate::core::{ChannelError, HttpError};

/// Canned behaviour for one request.
#[derive(Clone)]
pub(crate) enum Reply {
    /// Open, deliver the body as one chunk, complete.
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

/// Replies by request path, in script order. Unscripted requests stay
/// pending.
#[derive(Default)]
pub(crate) struct ScriptedHttp {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<Arc<HttpRequest>>>,
    pending: Mutex<HashMap<u64, Pending>>,
    cancelled: Mutex<Vec<u64>>,
    next_handle: Mutex<u64>,
}

impl ScriptedHttp {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn on(&self, path: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub(crate) fn requests(&self) -> Vec<Arc<HttpRequest>> {
        self.requests.lock().clone()
    }

    pub(crate) fn cancelled(&self) -> usize {
        self.cancelled.lock().len()
    }

    /// Deliver a chunk on the pending request for `path`.
    pub(crate) fn push(&self, path: &str, chunk: &[u8]) {
        if let Some((request, events)) = self.pending_for(path) {
            events.progressed(&request, chunk);
        }
    }

    /// Complete the pending request for `path`.
    pub(crate) fn finish(&self, path: &str, response: HttpResponse) {
        if let Some((request, events)) = self.pending_for(path) {
            self.pending.lock().retain(|_, p| !Arc::ptr_eq(&p.request, &request));
            events.loaded(&request, response);
        }
    }

    fn pending_for(&self, path: &str) -> Option<(Arc<HttpRequest>, Arc<dyn HttpEvents>)> {
        self.pending
            .lock()
            .values()
            .find(|p| p.request.uri().path() == path)
            .map(|p| (p.request.clone(), p.events.clone()))
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
        self.cancelled.lock().push(handle);
        self.pending.lock().remove(&handle);
    }
}

/// Records what reaches the top of a pipeline.
#[derive(Default)]
pub(crate) struct TopLog {
    pub(crate) events: Mutex<Vec<String>>,
    pub(crate) errors: Mutex<Vec<ChannelError>>,
    pub(crate) inactive: Mutex<bool>,
}

impl TopLog {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl PipelineListener for TopLog {
    fn on_opened(&self, _request: &Arc<HttpRequest>, head: &HttpResponse) {
        self.events.lock().push(format!("opened {}", head.status));
    }

    fn on_progress(&self, _request: &Arc<HttpRequest>, chunk: &[u8]) {
        self.events
            .lock()
            .push(format!("progress {}", String::from_utf8_lossy(chunk)));
    }

    fn on_loaded(&self, _request: &Arc<HttpRequest>, response: HttpResponse) {
        self.events.lock().push(format!("loaded {}", response.status));
    }

    fn on_error(&self, _request: &Arc<HttpRequest>, error: ChannelError) {
        self.events.lock().push("error".to_string());
        self.errors.lock().push(error);
    }

    fn on_authentication_requested(&self, _location: &str, challenge: &str) {
        self.events.lock().push(format!("challenge {challenge}"));
    }

    fn on_redirected(&self, location: &str) {
        self.events.lock().push(format!("redirect {location}"));
    }

    fn is_active(&self) -> bool {
        !*self.inactive.lock()
    }
}
