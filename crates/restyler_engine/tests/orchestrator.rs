use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use restyler_core::Outcome;
use restyler_engine::{
    check_connection, AttemptError, ByteStream, CompletionRequest, CompletionTransport,
    DiagnosticsLog, EngineEvent, EngineSettings, GenerationSession, LogCategory,
    NotificationSink, Notification, Orchestrator, RequestConfig, ReqwestTransport,
};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COMPLETIONS: &str = "/v1/chat/completions";

#[derive(Default)]
struct TestSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl TestSink {
    fn notifications(&self) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.notification.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl NotificationSink for TestSink {
    fn notify(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn config_for(server: &MockServer, max_tokens: u32) -> RequestConfig {
    RequestConfig {
        endpoint: format!("{}{COMPLETIONS}", server.uri()),
        credential: "sk-test-credential".to_string(),
        max_tokens,
        ..RequestConfig::default()
    }
}

fn http_orchestrator() -> Orchestrator {
    let settings = EngineSettings::default();
    Orchestrator::new(
        Arc::new(ReqwestTransport::new(settings.clone())),
        DiagnosticsLog::default(),
        settings,
    )
}

fn impatient_orchestrator(idle: Duration) -> Orchestrator {
    let settings = EngineSettings {
        stream_idle_timeout: idle,
        ..EngineSettings::default()
    };
    Orchestrator::new(
        Arc::new(ReqwestTransport::new(settings.clone())),
        DiagnosticsLog::default(),
        settings,
    )
}

fn sse_frame(content: &str) -> String {
    let payload = json!({ "choices": [ { "delta": { "content": content } } ] });
    format!("data: {payload}\n\n")
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] })
}

fn categories(log: &DiagnosticsLog) -> Vec<LogCategory> {
    log.snapshot().iter().map(|entry| entry.category).collect()
}

#[tokio::test]
async fn streamed_reply_renders_partials_then_completes() {
    let server = MockServer::start().await;
    let body = format!(
        "{}{}data: {{oops\n\n{}data: [DONE]\n\n",
        sse_frame("```html\n<div onclick=\"x()\">Hi"),
        sse_frame(""),
        sse_frame("</div>\n```"),
    );
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(header("authorization", "Bearer sk-test-credential"))
        .and(body_partial_json(json!({ "stream": true, "max_tokens": 4096 })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = http_orchestrator();
    let sink = TestSink::default();
    let session = GenerationSession::new(1);
    let outcome = orchestrator
        .run(&session, &config_for(&server, 4096), "prompt", &sink)
        .await;

    let content = "```html\n<div onclick=\"x()\">Hi</div>\n```".to_string();
    assert_eq!(outcome, Outcome::Completed(content.clone()));
    assert_eq!(
        sink.notifications(),
        vec![
            Notification::Partial {
                rendered: "<div></div>".to_string()
            },
            Notification::Partial {
                rendered: "<div>Hi</div>".to_string()
            },
            Notification::Complete {
                content,
                rendered: "<div>Hi</div>".to_string()
            },
        ]
    );
    let seen = categories(orchestrator.diagnostics());
    assert!(seen.contains(&LogCategory::ParseError));
    assert_eq!(seen.last(), Some(&LogCategory::Complete));
}

#[tokio::test]
async fn stream_failure_falls_back_silently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(500).set_body_string("stream broke"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("<p>ok</p>")))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = http_orchestrator();
    let sink = TestSink::default();
    let outcome = orchestrator
        .run(
            &GenerationSession::new(2),
            &config_for(&server, 4096),
            "prompt",
            &sink,
        )
        .await;

    assert_eq!(outcome, Outcome::Completed("<p>ok</p>".to_string()));
    assert_eq!(
        sink.notifications(),
        vec![Notification::Complete {
            content: "<p>ok</p>".to_string(),
            rendered: "<p>ok</p>".to_string(),
        }]
    );
    let seen = categories(orchestrator.diagnostics());
    assert!(seen.contains(&LogCategory::StreamError));
    assert!(seen.contains(&LogCategory::Fallback));
    assert!(seen.contains(&LogCategory::NonStreamRequest));
}

#[tokio::test]
async fn oversized_budget_gets_one_clamped_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "stream": false, "max_tokens": 8000 })))
        .respond_with(ResponseTemplate::new(400).set_body_string("max_tokens too large"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "stream": false, "max_tokens": 4096 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("<div>x</div>")))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = http_orchestrator();
    let sink = TestSink::default();
    orchestrator
        .run(
            &GenerationSession::new(3),
            &config_for(&server, 8000),
            "prompt",
            &sink,
        )
        .await;

    let notifications = sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert!(matches!(
        &notifications[0],
        Notification::Complete { content, .. } if content == "<div>x</div>"
    ));
    assert!(categories(orchestrator.diagnostics()).contains(&LogCategory::FallbackTokens));
}

#[tokio::test]
async fn final_failure_is_classified_and_surfaced_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = http_orchestrator();
    let sink = TestSink::default();
    let outcome = orchestrator
        .run(
            &GenerationSession::new(4),
            &config_for(&server, 4096),
            "prompt",
            &sink,
        )
        .await;

    let message =
        "authentication failed (401): check that the API key is correct".to_string();
    assert_eq!(outcome, Outcome::Failed(message.clone()));
    assert_eq!(sink.notifications(), vec![Notification::Error { message }]);
}

#[tokio::test]
async fn connection_check_reports_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "max_tokens": 5, "stream": false })))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "error": { "message": "Incorrect API key provided" } })),
        )
        .mount(&server)
        .await;

    let log = DiagnosticsLog::default();
    let transport = ReqwestTransport::new(EngineSettings::default());
    let result = check_connection(&transport, &config_for(&server, 4096), &log).await;

    assert!(!result.success);
    assert_eq!(result.message, "connection failed: Incorrect API key provided");
    let entries = log.snapshot();
    assert_eq!(entries[0].category, LogCategory::TestRequest);
    assert_eq!(entries[0].payload["authorization"], "Bearer sk-test-***");
    assert_eq!(entries[1].category, LogCategory::TestResponse);
}

/// Stream whose chunks are pushed by the test; `complete` is never expected.
struct ScriptedTransport {
    chunks: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

#[async_trait::async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn open_stream(&self, _request: &CompletionRequest) -> Result<ByteStream, AttemptError> {
        let rx = self
            .chunks
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AttemptError::Transport("stream already opened".to_string()))?;
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<Bytes, AttemptError>(chunk), rx))
        });
        Ok(Box::pin(stream))
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, AttemptError> {
        Err(AttemptError::Transport("unexpected non-stream attempt".to_string()))
    }
}

#[tokio::test]
async fn abort_mid_stream_keeps_partials_and_reports_aborted_once() {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(ScriptedTransport {
        chunks: Mutex::new(Some(rx)),
    });
    let orchestrator = Orchestrator::new(
        transport,
        DiagnosticsLog::default(),
        EngineSettings::default(),
    );
    let sink = Arc::new(TestSink::default());
    let session = GenerationSession::new(5);
    let config = RequestConfig {
        credential: "sk".to_string(),
        ..RequestConfig::default()
    };

    let task = {
        let orchestrator = orchestrator.clone();
        let sink = sink.clone();
        let session = session.clone();
        tokio::spawn(async move {
            orchestrator
                .run(&session, &config, "prompt", sink.as_ref())
                .await
        })
    };

    tx.send(Bytes::from(sse_frame("<p>one</p>"))).unwrap();
    tx.send(Bytes::from(sse_frame("<p>two</p>"))).unwrap();
    for _ in 0..200 {
        if sink.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    session.cancel();
    session.cancel();

    let outcome = task.await.unwrap();
    assert_eq!(outcome, Outcome::Aborted);
    assert_eq!(
        sink.notifications(),
        vec![
            Notification::Partial {
                rendered: "<p>one</p>".to_string()
            },
            Notification::Partial {
                rendered: "<p>one</p><p>two</p>".to_string()
            },
            Notification::Aborted,
        ]
    );
    assert_eq!(
        categories(orchestrator.diagnostics()).last(),
        Some(&LogCategory::Aborted)
    );
}

#[tokio::test]
async fn silent_stream_headers_fall_back_to_single_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_frame("<p>late</p>"), "text/event-stream")
                .set_delay(Duration::from_secs(4)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("<p>ok</p>")))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = impatient_orchestrator(Duration::from_millis(300));
    let sink = TestSink::default();
    let started = Instant::now();
    let outcome = orchestrator
        .run(
            &GenerationSession::new(6),
            &config_for(&server, 4096),
            "prompt",
            &sink,
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome, Outcome::Completed("<p>ok</p>".to_string()));
    assert_eq!(sink.len(), 1);
    let seen = categories(orchestrator.diagnostics());
    assert!(seen.contains(&LogCategory::StreamError));
    assert!(seen.contains(&LogCategory::Fallback));
}

/// Sends one frame, then goes quiet without closing; the single request
/// answers immediately.
struct StallingTransport;

#[async_trait::async_trait]
impl CompletionTransport for StallingTransport {
    async fn open_stream(&self, _request: &CompletionRequest) -> Result<ByteStream, AttemptError> {
        let first = Ok::<Bytes, AttemptError>(Bytes::from(sse_frame("<p>half</p>")));
        let stream = futures_util::stream::iter([first])
            .chain(futures_util::stream::pending::<Result<Bytes, AttemptError>>());
        Ok(Box::pin(stream))
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, AttemptError> {
        Ok("<p>full</p>".to_string())
    }
}

#[tokio::test]
async fn stalled_stream_body_falls_back_to_single_request() {
    let settings = EngineSettings {
        stream_idle_timeout: Duration::from_millis(200),
        ..EngineSettings::default()
    };
    let orchestrator = Orchestrator::new(
        Arc::new(StallingTransport),
        DiagnosticsLog::default(),
        settings,
    );
    let sink = TestSink::default();
    let config = RequestConfig {
        credential: "sk".to_string(),
        ..RequestConfig::default()
    };

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(&GenerationSession::new(7), &config, "prompt", &sink),
    )
    .await
    .expect("stalled stream must time out");

    assert_eq!(outcome, Outcome::Completed("<p>full</p>".to_string()));
    assert_eq!(
        sink.notifications(),
        vec![
            Notification::Partial {
                rendered: "<p>half</p>".to_string()
            },
            Notification::Complete {
                content: "<p>full</p>".to_string(),
                rendered: "<p>full</p>".to_string(),
            },
        ]
    );
    let entries = orchestrator.diagnostics().snapshot();
    let stream_error = entries
        .iter()
        .find(|entry| entry.category == LogCategory::StreamError)
        .expect("stream error recorded");
    assert_eq!(
        stream_error.payload["error"],
        "transport error: timeout: no stream data for 200ms"
    );
}
