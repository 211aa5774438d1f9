//! HTTP emulation driven through the composite channel and the client.

#![cfg(all(feature = "emulation", feature = "client"))]

mod common;

use std::sync::Arc;

use common::{Attempts, Recorder, Reply, ScriptedHttp, refused, script_session};
use composite_channel::auth::{BasicChallengeHandler, Credentials};
use composite_channel::channel::{ReadyState, RedirectPolicy};
use composite_channel::client::{DuplexClientBuilder, Message};
use composite_channel::core::constants::CLOSE_NORMAL;
use composite_channel::core::ChannelError;
use composite_channel::http::{EmulatedTransportFactory, HttpResponse};
use composite_channel::transport::{
    CompositeChannel, CompositeConfig, ConnectOutcome, StrategyId, StrategyRegistry,
};

/// Emulation first, then a manual native transport.
fn emulation_first(http: &Arc<ScriptedHttp>, native: &Attempts) -> StrategyRegistry {
    StrategyRegistry::new()
        .scheme("ws", &[StrategyId::EMULATED, StrategyId::NATIVE])
        .register(StrategyId::EMULATED, EmulatedTransportFactory::new(http.clone()))
        .register(StrategyId::NATIVE, native.clone())
}

fn composite(registry: StrategyRegistry, config: CompositeConfig) -> (CompositeChannel, Arc<Recorder>) {
    let recorder = Recorder::new();
    let channel = CompositeChannel::new(Arc::new(registry), config, recorder.clone());
    (channel, recorder)
}

#[test]
fn test_falls_back_to_emulation() {
    let http = ScriptedHttp::new();
    script_session(&http, &["hello"]);
    let registry = StrategyRegistry::with_defaults()
        .register(StrategyId::NATIVE, refused())
        .register(StrategyId::EMULATED, EmulatedTransportFactory::new(http.clone()));
    let (channel, recorder) = composite(registry, CompositeConfig::default());

    channel.connect("ws://example.com/echo", &["chat"]).unwrap();

    assert_eq!(recorder.events(), vec!["open chat", "text hello"]);
    assert_eq!(channel.selected_strategy(), Some(StrategyId::EMULATED));

    http.on("/echo/up", Reply::Respond(HttpResponse::new(200, "OK")));
    channel.send_text("ping").unwrap();
    let upstream = http.requests_to("/echo/up");
    assert_eq!(upstream.len(), 1);
    assert_eq!(upstream[0].body(), b"ping");
    assert!(upstream[0].header("X-Sequence-No").is_some());

    http.push("/echo/down", b"pong");
    assert_eq!(recorder.events().last().map(String::as_str), Some("text pong"));
}

#[test]
fn test_session_sequence_numbers_increase() {
    let http = ScriptedHttp::new();
    script_session(&http, &[]);
    http.on("/echo/up", Reply::Respond(HttpResponse::new(200, "OK")))
        .on("/echo/up", Reply::Respond(HttpResponse::new(200, "OK")));
    let registry = StrategyRegistry::with_defaults()
        .register(StrategyId::NATIVE, refused())
        .register(StrategyId::EMULATED, EmulatedTransportFactory::new(http.clone()));
    let (channel, _recorder) = composite(registry, CompositeConfig::default());

    channel.connect("ws://example.com/echo", &[]).unwrap();
    channel.send_text("a").unwrap();
    channel.send_text("b").unwrap();

    let requests = http.requests();
    let paths: Vec<_> = requests.iter().map(|r| r.uri().path().to_owned()).collect();
    assert_eq!(paths, vec!["/echo/;e/cb", "/echo/down", "/echo/up", "/echo/up"]);
    let sequence: Vec<u64> = requests
        .iter()
        .map(|r| r.header("X-Sequence-No").unwrap().parse().unwrap())
        .collect();
    assert!(sequence.windows(2).all(|pair| pair[0] < pair[1]), "{sequence:?}");
}

#[test]
fn test_application_challenge_is_answered() {
    let http = ScriptedHttp::new();
    http.on(
        "/echo/;e/cb",
        Reply::Respond(
            HttpResponse::new(401, "Unauthorized")
                .with_header("WWW-Authenticate", "Application Basic realm=\"x\""),
        ),
    );
    script_session(&http, &[]);
    let native = Attempts::default();
    let config = CompositeConfig::default().with_challenge_handler(Arc::new(
        BasicChallengeHandler::with_credentials(Credentials::new("Aladdin", "open sesame")),
    ));
    let (channel, recorder) = composite(emulation_first(&http, &native), config);

    channel.connect("ws://example.com/echo", &[]).unwrap();

    assert_eq!(
        recorder.events(),
        vec!["challenge Application Basic realm=\"x\"", "open chat"]
    );
    let creates = http.requests_to("/echo/;e/cb");
    assert_eq!(creates.len(), 2);
    assert_eq!(creates[0].header("Authorization"), None);
    assert_eq!(
        creates[1].header("Authorization").as_deref(),
        Some("Application Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==")
    );
    assert_eq!(creates[1].header("X-WebSocket-Version").as_deref(), Some("wseb-1.0"));
    assert_eq!(native.count(), 0);
}

#[test]
fn test_failed_auth_does_not_fall_back() {
    let http = ScriptedHttp::new();
    http.on(
        "/echo/;e/cb",
        Reply::Respond(HttpResponse::new(401, "Unauthorized").with_header("WWW-Authenticate", "Basic realm=\"x\"")),
    );
    let native = Attempts::default();
    let config = CompositeConfig::default()
        .with_challenge_handler(Arc::new(BasicChallengeHandler::new(|_| None)));
    let (channel, recorder) = composite(emulation_first(&http, &native), config);

    channel.connect("ws://example.com/echo", &[]).unwrap();

    assert_eq!(native.count(), 0);
    assert_eq!(channel.ready_state(), ReadyState::Closed);
    assert_eq!(channel.outcome(), Some(ConnectOutcome::FailedTerminal));
    let closes = recorder.closes();
    assert!(matches!(closes[0].error, Some(ChannelError::AuthenticationFailed(_))));
}

#[test]
fn test_denied_redirect_does_not_fall_back() {
    let http = ScriptedHttp::new();
    http.on(
        "/echo/;e/cb",
        Reply::Respond(
            HttpResponse::new(302, "Found").with_header("Location", "http://elsewhere.example.org/echo/;e/cb"),
        ),
    );
    let native = Attempts::default();
    let config = CompositeConfig::default().with_redirect_policy(RedirectPolicy::SameOrigin);
    let (channel, recorder) = composite(emulation_first(&http, &native), config);

    channel.connect("ws://example.com/echo", &[]).unwrap();

    assert_eq!(native.count(), 0);
    assert_eq!(http.requests().len(), 1);
    let closes = recorder.closes();
    assert_eq!(closes.len(), 1);
    assert!(closes[0].error.as_ref().is_some_and(ChannelError::is_policy_violation));
}

#[test]
fn test_allowed_redirect_is_reported() {
    let http = ScriptedHttp::new();
    http.on(
        "/old/;e/cb",
        Reply::Respond(HttpResponse::new(301, "Moved").with_header("Location", "/echo/;e/cb")),
    );
    script_session(&http, &[]);
    let native = Attempts::default();
    let (channel, recorder) = composite(emulation_first(&http, &native), CompositeConfig::default());

    channel.connect("ws://example.com/old", &[]).unwrap();

    assert_eq!(
        recorder.events(),
        vec!["redirect http://example.com/echo/;e/cb", "open chat"]
    );
    assert_eq!(channel.ready_state(), ReadyState::Open);
}

#[test]
fn test_rejected_session_falls_back() {
    let http = ScriptedHttp::new();
    http.on("/echo/;e/cb", Reply::Respond(HttpResponse::new(503, "Unavailable")));
    let native = Attempts::default();
    let (channel, recorder) = composite(emulation_first(&http, &native), CompositeConfig::default());

    channel.connect("ws://example.com/echo", &[]).unwrap();
    assert_eq!(native.count(), 1);
    native.last().open(None);
    assert_eq!(recorder.events(), vec!["open -"]);
    assert_eq!(channel.selected_strategy(), Some(StrategyId::NATIVE));
}

#[test]
fn test_close_ends_session() {
    let http = ScriptedHttp::new();
    script_session(&http, &[]);
    let native = Attempts::default();
    let (channel, recorder) = composite(emulation_first(&http, &native), CompositeConfig::default());
    channel.connect("ws://example.com/echo", &[]).unwrap();

    channel.close(CLOSE_NORMAL, "done").unwrap();
    http.push("/echo/down", b"after close");

    assert_eq!(recorder.events(), vec!["open chat", "close 1000"]);
    assert_eq!(recorder.closes()[0].reason, "done");
}

#[tokio::test]
async fn test_client_over_emulation() {
    let http = ScriptedHttp::new();
    script_session(&http, &["one", "two"]);
    let registry = StrategyRegistry::with_defaults()
        .register(StrategyId::NATIVE, refused())
        .register(StrategyId::EMULATED, EmulatedTransportFactory::new(http.clone()));
    let client = DuplexClientBuilder::new().registry(Arc::new(registry)).build();

    let protocol = client.connect("ws://example.com/echo", &["chat"]).await.unwrap();
    assert_eq!(protocol.as_deref(), Some("chat"));
    assert_eq!(client.recv().await.unwrap(), Some(Message::Text("one".into())));
    assert_eq!(client.recv().await.unwrap(), Some(Message::Text("two".into())));

    client.close(CLOSE_NORMAL, "").unwrap();
    assert_eq!(client.recv().await.unwrap(), None);
}
