//! Redirect-following stage.

use std::sync::Arc;

use tracing::info;

use super::pipeline::{HttpStage, StageContext};
use super::request::{HttpRequest, HttpResponse};
use crate::core::ChannelError;
use crate::core::constants::MAX_REDIRECTS;
use crate::core::constants::headers::LOCATION;

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 307)
}

/// Follows 301/302/307 responses allowed by the connection's
/// [`RedirectPolicy`](crate::channel::RedirectPolicy).
///
/// The redirected request keeps the method, headers and body of the
/// original. A denied redirect fails the request with
/// [`ChannelError::RedirectDenied`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RedirectStage;

impl RedirectStage {
    fn intercepts(request: &HttpRequest) -> bool {
        request
            .response_head()
            .is_some_and(|head| is_redirect(head.status))
    }

    fn follow(
        &self,
        ctx: &StageContext<'_>,
        request: &Arc<HttpRequest>,
        response: &HttpResponse,
    ) -> Result<(), ChannelError> {
        let location = response.headers.get(LOCATION).ok_or_else(|| {
            ChannelError::Config(format!("{} response without Location header", response.status))
        })?;
        let target = request.uri().join(location).map_err(|e| {
            ChannelError::Protocol(format!("invalid redirect location {location}: {e}"))
        })?;

        ctx.context().redirect_policy.check(request.uri(), &target)?;
        if request.redirects() as usize >= MAX_REDIRECTS {
            return Err(ChannelError::Protocol(format!(
                "more than {MAX_REDIRECTS} redirects"
            )));
        }
        if !ctx.is_active() {
            return Ok(());
        }

        info!(
            from = %request.uri(),
            to = %target,
            status = response.status,
            "following redirect"
        );
        let next = request.redirect_to(target);
        ctx.notify_redirect(next.uri().as_str());
        ctx.send_down(Arc::new(next))
    }
}

impl HttpStage for RedirectStage {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn on_opened(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, head: &HttpResponse) {
        if !is_redirect(head.status) {
            ctx.opened_up(request, head);
        }
    }

    fn on_progress(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, chunk: &[u8]) {
        if !Self::intercepts(request) {
            ctx.progress_up(request, chunk);
        }
    }

    fn on_loaded(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, response: HttpResponse) {
        if !is_redirect(response.status) {
            ctx.loaded_up(request, response);
            return;
        }
        if let Err(e) = self.follow(ctx, request, &response) {
            ctx.fail_up(request, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelKind, RedirectPolicy};
    use crate::core::TransportContext;
    use crate::http::testing::{Reply, ScriptedHttp, TopLog};
    use crate::http::{HttpMethod, HttpPipeline, RequestKind};
    use crate::transport::StrategyId;
    use url::Url;

    fn pipeline(http: &Arc<ScriptedHttp>, policy: RedirectPolicy) -> (HttpPipeline, Arc<TopLog>) {
        let log = Arc::new(TopLog::default());
        let pipeline = HttpPipeline::builder(http.clone())
            .stage(Arc::new(RedirectStage))
            .context(TransportContext {
                strategy: StrategyId::EMULATED,
                challenge_handler: None,
                connect_timer: None,
                redirect_policy: policy,
            })
            .build(log.clone());
        (pipeline, log)
    }

    fn create(uri: &str) -> HttpRequest {
        HttpRequest::new(
            HttpMethod::Post,
            Url::parse(uri).unwrap(),
            RequestKind::Create,
            Channel::root(ChannelKind::Concrete),
        )
        .with_header("X-WebSocket-Version", "wseb-1.0")
    }

    fn moved(status: u16, location: &str) -> Reply {
        Reply::Respond(HttpResponse::new(status, "Moved").with_header("Location", location))
    }

    #[test]
    fn test_relative_redirect_is_followed() {
        let http = ScriptedHttp::new();
        http.on("/a/;e/cb", moved(302, "../b/;e/cb"))
            .on("/b/;e/cb", Reply::Respond(HttpResponse::new(201, "Created")));
        let (pipeline, log) = pipeline(&http, RedirectPolicy::SameOrigin);

        pipeline.send(create("http://example.com/a/;e/cb")).unwrap();

        assert_eq!(
            log.events(),
            vec!["redirect http://example.com/b/;e/cb", "opened 201", "loaded 201"]
        );
        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method(), HttpMethod::Post);
        assert_eq!(requests[1].header("x-websocket-version").as_deref(), Some("wseb-1.0"));
        assert_eq!(requests[1].redirects(), 1);
    }

    #[test]
    fn test_denied_redirect() {
        let http = ScriptedHttp::new();
        http.on("/;e/cb", moved(301, "https://evil.example.org/;e/cb"));
        let (pipeline, log) = pipeline(&http, RedirectPolicy::SameOrigin);

        pipeline.send(create("http://example.com/;e/cb")).unwrap();

        assert_eq!(log.events(), vec!["error"]);
        let errors = log.errors.lock();
        assert!(errors[0].is_policy_violation());
        assert!(!errors[0].allows_fallback());
        assert_eq!(http.requests().len(), 1);
    }

    #[test]
    fn test_never_policy() {
        let http = ScriptedHttp::new();
        http.on("/;e/cb", moved(307, "/other"));
        let (pipeline, log) = pipeline(&http, RedirectPolicy::Never);
        pipeline.send(create("http://example.com/;e/cb")).unwrap();
        assert!(log.errors.lock()[0].is_policy_violation());
    }

    #[test]
    fn test_missing_location_is_config_error() {
        let http = ScriptedHttp::new();
        http.on("/;e/cb", Reply::Respond(HttpResponse::new(302, "Found")));
        let (pipeline, log) = pipeline(&http, RedirectPolicy::Always);
        pipeline.send(create("http://example.com/;e/cb")).unwrap();
        assert!(log.errors.lock()[0].is_config_error());
    }

    #[test]
    fn test_redirect_loop_is_bounded() {
        let http = ScriptedHttp::new();
        for _ in 0..=MAX_REDIRECTS {
            http.on("/loop", moved(302, "/loop"));
        }
        let (pipeline, log) = pipeline(&http, RedirectPolicy::SameOrigin);
        pipeline.send(create("http://example.com/loop")).unwrap();

        assert_eq!(http.requests().len(), MAX_REDIRECTS + 1);
        assert!(matches!(log.errors.lock()[0], ChannelError::Protocol(_)));
    }

    #[test]
    fn test_other_statuses_pass_through() {
        let http = ScriptedHttp::new();
        http.on("/;e/cb", Reply::Respond(HttpResponse::new(404, "Not Found").with_body("nope")));
        let (pipeline, log) = pipeline(&http, RedirectPolicy::SameOrigin);
        pipeline.send(create("http://example.com/;e/cb")).unwrap();
        assert_eq!(log.events(), vec!["opened 404", "progress nope", "loaded 404"]);
    }
}
