use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pipeline_logging::{pipeline_debug, pipeline_info, pipeline_trace, pipeline_warn};
use restyler_core::{
    update, DiagnosticEvent, Effect, GenerationState, Msg, Outcome, SessionId, Strategy,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::client::{CompletionRequest, CompletionTransport};
use crate::sse::{SseEvent, SseReader, StreamFrame};
use crate::{
    AttemptError, DiagnosticsLog, EngineEvent, EngineSettings, Extractor, HtmlExtractor,
    LogCategory, Notification, RequestConfig, Sanitizer,
};

/// Receives consumer notifications in delivery order.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: EngineEvent);
}

pub struct ChannelSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Handle to one generation: its id plus the token that aborts it.
#[derive(Debug, Clone)]
pub struct GenerationSession {
    id: SessionId,
    token: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl GenerationSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once a run of this session has delivered its terminal notification.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Executes the effects of [`restyler_core::update`] against a transport.
#[derive(Clone)]
pub struct Orchestrator {
    transport: Arc<dyn CompletionTransport>,
    extractor: Arc<dyn Extractor>,
    sanitizer: Sanitizer,
    diagnostics: DiagnosticsLog,
    settings: EngineSettings,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        diagnostics: DiagnosticsLog,
        settings: EngineSettings,
    ) -> Self {
        Self {
            transport,
            extractor: Arc::new(HtmlExtractor::default()),
            sanitizer: Sanitizer::default(),
            diagnostics,
            settings,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn diagnostics(&self) -> &DiagnosticsLog {
        &self.diagnostics
    }

    pub fn transport(&self) -> &dyn CompletionTransport {
        self.transport.as_ref()
    }

    /// Runs one generation to its terminal notification and returns how it
    /// ended. Exactly one of `Complete`, `Error` or `Aborted` reaches `sink`.
    pub async fn run(
        &self,
        session: &GenerationSession,
        config: &RequestConfig,
        prompt: &str,
        sink: &dyn NotificationSink,
    ) -> Outcome {
        let mut run = Run {
            orchestrator: self,
            session,
            config,
            prompt,
            sink,
            state: GenerationState::new(),
        };
        self.diagnostics.record(
            LogCategory::Config,
            json!({ "session": session.id(), "config": config.redacted() }),
        );

        let mut pending = run.dispatch(Msg::Start {
            session_id: session.id(),
            max_tokens: config.max_tokens,
        });
        while let Some((strategy, max_tokens)) = pending {
            pending = if session.is_cancelled() {
                run.dispatch(Msg::Cancelled {
                    session_id: session.id(),
                })
            } else if strategy.is_streaming() {
                run.stream_attempt(max_tokens).await
            } else {
                run.single_attempt(strategy, max_tokens).await
            };
        }

        session.mark_finished();
        // The loop only stops once update() stops issuing attempts, which
        // happens in a terminal phase.
        run.state.outcome().cloned().unwrap_or(Outcome::Aborted)
    }
}

struct Run<'a> {
    orchestrator: &'a Orchestrator,
    session: &'a GenerationSession,
    config: &'a RequestConfig,
    prompt: &'a str,
    sink: &'a dyn NotificationSink,
    state: GenerationState,
}

type PendingAttempt = Option<(Strategy, u32)>;

fn stream_idle(idle: Duration) -> AttemptError {
    AttemptError::Timeout(format!("no stream data for {idle:?}"))
}

impl Run<'_> {
    /// Feeds one message through the state machine, executes every effect
    /// except `Issue`, and hands back the next attempt to make (if any).
    fn dispatch(&mut self, msg: Msg) -> PendingAttempt {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = update(state, msg);
        self.state = state;
        if self.state.consume_dirty() {
            pipeline_trace!("Session {}: {}", self.session.id(), self.state.view().status_line());
        }

        let mut pending = None;
        for effect in effects {
            match effect {
                Effect::Issue {
                    strategy,
                    max_tokens,
                    ..
                } => pending = Some((strategy, max_tokens)),
                Effect::Preview { accumulated, .. } => self.preview(&accumulated),
                Effect::Complete { content, .. } => {
                    let rendered = self.render(&content);
                    self.notify(Notification::Complete { content, rendered });
                }
                Effect::Fail { message, .. } => {
                    pipeline_warn!("Session {} failed: {}", self.session.id(), message);
                    self.notify(Notification::Error { message });
                }
                Effect::Abort { .. } => {
                    pipeline_info!("Session {} aborted", self.session.id());
                    self.notify(Notification::Aborted);
                }
                Effect::Record(event) => self.record(event),
            }
        }
        pending
    }

    fn notify(&self, notification: Notification) {
        self.sink.notify(EngineEvent {
            session_id: self.session.id(),
            notification,
        });
    }

    fn preview(&self, accumulated: &str) {
        let Some(candidate) = self.orchestrator.extractor.extract(accumulated).into_candidate()
        else {
            return;
        };
        let rendered = self.orchestrator.sanitizer.sanitize(&candidate).compose();
        if !rendered.is_empty() {
            self.notify(Notification::Partial { rendered });
        }
    }

    fn render(&self, content: &str) -> String {
        let candidate = self
            .orchestrator
            .extractor
            .extract(content)
            .into_candidate()
            .unwrap_or_else(|| content.to_string());
        self.orchestrator.sanitizer.sanitize(&candidate).compose()
    }

    fn record(&self, event: DiagnosticEvent) {
        let session = self.session.id();
        let (category, payload) = match event {
            DiagnosticEvent::Request {
                strategy,
                max_tokens,
            } => (
                LogCategory::Request,
                json!({
                    "session": session,
                    "strategy": strategy.to_string(),
                    "maxTokens": max_tokens,
                    "promptLength": self.prompt.chars().count(),
                    "config": self.config.redacted(),
                }),
            ),
            DiagnosticEvent::ResponseOpened { strategy } => (
                LogCategory::Response,
                json!({ "session": session, "strategy": strategy.to_string(), "ok": true }),
            ),
            DiagnosticEvent::AttemptFailed { strategy, failure } => {
                let category = if strategy.is_streaming() {
                    LogCategory::StreamError
                } else {
                    LogCategory::Error
                };
                (
                    category,
                    json!({
                        "session": session,
                        "strategy": strategy.to_string(),
                        "status": failure.status_code(),
                        "error": failure.to_string(),
                    }),
                )
            }
            DiagnosticEvent::ParseError { line, error } => (
                LogCategory::ParseError,
                json!({ "session": session, "line": line, "error": error }),
            ),
            DiagnosticEvent::Fallback {
                from,
                to,
                max_tokens,
                requested_max_tokens,
            } => {
                let category = if max_tokens < requested_max_tokens {
                    LogCategory::FallbackTokens
                } else {
                    LogCategory::Fallback
                };
                (
                    category,
                    json!({
                        "session": session,
                        "from": from.to_string(),
                        "to": to.to_string(),
                        "maxTokens": max_tokens,
                        "requestedMaxTokens": requested_max_tokens,
                    }),
                )
            }
            DiagnosticEvent::Completed { strategy, content } => (
                LogCategory::Complete,
                json!({
                    "session": session,
                    "strategy": strategy.to_string(),
                    "contentLength": content.chars().count(),
                }),
            ),
            DiagnosticEvent::Surfaced { message } => (
                LogCategory::Error,
                json!({ "session": session, "message": message, "surfaced": true }),
            ),
            DiagnosticEvent::Aborted { phase } => (
                LogCategory::Aborted,
                json!({ "session": session, "phase": format!("{phase:?}") }),
            ),
        };
        self.orchestrator.diagnostics.record(category, payload);
    }

    fn fail_attempt(&mut self, error: AttemptError) -> PendingAttempt {
        self.dispatch(Msg::AttemptFailed {
            session_id: self.session.id(),
            failure: error.into_failure(),
        })
    }

    async fn stream_attempt(&mut self, max_tokens: u32) -> PendingAttempt {
        let session_id = self.session.id();
        let token = self.session.token().clone();
        let request = CompletionRequest::new(self.config, self.prompt, max_tokens, true);
        let transport = self.orchestrator.transport.clone();

        let idle = self.orchestrator.settings.stream_idle_timeout;

        // Headers count as stream data: a server that accepts the connection
        // and then goes quiet trips the same idle limit as a stalled body.
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return self.dispatch(Msg::Cancelled { session_id }),
            opened = tokio::time::timeout(idle, transport.open_stream(&request)) => opened,
        };
        let mut body = match opened {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => return self.fail_attempt(err),
            Err(_) => return self.fail_attempt(stream_idle(idle)),
        };
        self.dispatch(Msg::StreamOpened { session_id });

        let mut reader = SseReader::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return self.dispatch(Msg::Cancelled { session_id }),
                next = tokio::time::timeout(idle, body.next()) => next,
            };
            let events = match next {
                Err(_) => return self.fail_attempt(stream_idle(idle)),
                Ok(Some(Err(err))) => return self.fail_attempt(err),
                Ok(Some(Ok(chunk))) => reader.feed(&chunk),
                Ok(None) => reader.finish(),
            };
            for event in events {
                let msg = match event {
                    SseEvent::Frame(StreamFrame::Delta(text)) => {
                        Msg::DeltaReceived { session_id, text }
                    }
                    SseEvent::Frame(StreamFrame::Terminator) => Msg::StreamEnded { session_id },
                    SseEvent::Malformed(err) => {
                        pipeline_debug!("Skipping frame: {}", err);
                        Msg::FrameSkipped {
                            session_id,
                            line: err.line,
                            error: err.message,
                        }
                    }
                };
                let pending = self.dispatch(msg);
                if self.state.phase().is_terminal() || pending.is_some() {
                    return pending;
                }
            }
        }
    }

    async fn single_attempt(&mut self, strategy: Strategy, max_tokens: u32) -> PendingAttempt {
        let session_id = self.session.id();
        let token = self.session.token().clone();
        let request = CompletionRequest::new(self.config, self.prompt, max_tokens, false);
        let transport = self.orchestrator.transport.clone();
        self.orchestrator.diagnostics.record(
            LogCategory::NonStreamRequest,
            json!({
                "session": session_id,
                "strategy": strategy.to_string(),
                "maxTokens": max_tokens,
            }),
        );

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return self.dispatch(Msg::Cancelled { session_id }),
            result = transport.complete(&request) => result,
        };
        match result {
            Ok(content) => self.dispatch(Msg::ResponseReceived {
                session_id,
                content,
            }),
            Err(err) => self.fail_attempt(err),
        }
    }
}
