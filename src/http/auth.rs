//! Challenge/response authentication stage.
//!
//! A 401 carries a `WWW-Authenticate` challenge. The stage asks a
//! [`ChallengeHandler`] for credentials and re-issues the original request
//! with an `Authorization` header. The same path handles a 401 wrapped in
//! the body of a 200 `application/x-message-http` response.
//!
//! Handler resolution order: the handler chained on the credentials sent
//! last, then the connection's handler. The connect timer is paused while
//! the handler runs.

use std::sync::Arc;

use tracing::{debug, info};

use super::pipeline::{HttpStage, StageContext};
use super::request::{HttpRequest, HttpResponse};
use crate::auth::ChallengeRequest;
use crate::core::constants::WRAPPED_HTTP_CONTENT_TYPE;
use crate::core::constants::headers::{AUTHORIZATION, WWW_AUTHENTICATE};
use crate::core::{ChallengeHandler, ChannelError};

const UNAUTHORIZED: u16 = 401;

fn is_wrapped(head: &HttpResponse) -> bool {
    head.status == 200 && head.headers.media_type().as_deref() == Some(WRAPPED_HTTP_CONTENT_TYPE)
}

/// Answers authentication challenges and retries the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthStage;

impl AuthStage {
    fn intercepts(head: &HttpResponse) -> bool {
        head.status == UNAUTHORIZED || is_wrapped(head)
    }

    /// Status-carrying response, unwrapping a wrapped one.
    fn effective(response: HttpResponse) -> Result<HttpResponse, ChannelError> {
        if !is_wrapped(&response) {
            return Ok(response);
        }
        let inner = HttpResponse::parse(&response.body)
            .map_err(|e| ChannelError::Protocol(format!("bad wrapped response: {e}")))?;
        if inner.status != UNAUTHORIZED {
            return Err(ChannelError::Protocol(format!(
                "unexpected wrapped status {}",
                inner.status
            )));
        }
        Ok(inner)
    }

    fn resolve_handler(
        ctx: &StageContext<'_>,
        request: &HttpRequest,
    ) -> Result<Arc<dyn ChallengeHandler>, ChannelError> {
        request
            .channel()
            .next_challenge_handler()
            .or_else(|| ctx.context().challenge_handler.clone())
            .ok_or_else(|| ChannelError::Config("no challenge handler".into()))
    }

    fn answer(
        &self,
        ctx: &StageContext<'_>,
        request: &Arc<HttpRequest>,
        response: &HttpResponse,
    ) -> Result<(), ChannelError> {
        let challenge = response.headers.get(WWW_AUTHENTICATE).ok_or_else(|| {
            ChannelError::Protocol("401 response without WWW-Authenticate header".into())
        })?;
        let challenge_request = ChallengeRequest::new(request.uri().as_str(), challenge);
        if !challenge_request.is_recognized() {
            return Err(ChannelError::Protocol(format!(
                "unsupported challenge scheme: {}",
                challenge_request.scheme()
            )));
        }

        info!(
            uri = %request.uri(),
            scheme = challenge_request.scheme(),
            "authentication challenge"
        );
        ctx.notify_auth(challenge_request.location(), challenge_request.challenge());
        let handler = Self::resolve_handler(ctx, request)?;

        let timer = ctx.context().connect_timer.clone();
        if let Some(timer) = &timer {
            timer.pause();
        }
        let answer = handler.handle(&challenge_request);
        if let Some(timer) = &timer {
            timer.resume();
        }

        let answer = answer.ok_or_else(|| {
            ChannelError::AuthenticationFailed(format!(
                "no credentials for {}",
                challenge_request.location()
            ))
        })?;
        if !ctx.is_active() {
            debug!(uri = %request.uri(), "credentials arrived after close, discarded");
            return Ok(());
        }

        let retry = request.clone_for_retry();
        retry.set_header(AUTHORIZATION, answer.credentials())?;
        request.channel().set_challenge_response(answer);
        ctx.send_down(Arc::new(retry))
    }
}

impl HttpStage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn on_opened(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, head: &HttpResponse) {
        if !Self::intercepts(head) {
            request.channel().clear_challenge_response();
            ctx.opened_up(request, head);
        }
    }

    fn on_progress(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, chunk: &[u8]) {
        if !request.response_head().is_some_and(|head| Self::intercepts(&head)) {
            ctx.progress_up(request, chunk);
        }
    }

    fn on_loaded(&self, ctx: &StageContext<'_>, request: &Arc<HttpRequest>, response: HttpResponse) {
        if !Self::intercepts(&response) {
            request.channel().clear_challenge_response();
            ctx.loaded_up(request, response);
            return;
        }
        let result = Self::effective(response).and_then(|response| self.answer(ctx, request, &response));
        if let Err(e) = result {
            ctx.fail_up(request, e);
        }
    }
}
