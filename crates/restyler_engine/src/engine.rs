use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use pipeline_logging::{pipeline_debug, pipeline_info};
use restyler_core::{Outcome, SessionId};
use serde_json::json;

use crate::client::{check_connection, CompletionTransport, ConnectionCheck, ReqwestTransport};
use crate::orchestrator::{ChannelSink, GenerationSession, Orchestrator};
use crate::{ConfigError, DiagnosticsLog, EngineEvent, EngineSettings, LogCategory, RequestConfig};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("engine worker has stopped")]
    Stopped,
}

enum EngineCommand {
    Generate {
        session: GenerationSession,
        config: RequestConfig,
        prompt: String,
    },
    Check {
        config: RequestConfig,
        reply: mpsc::Sender<ConnectionCheck>,
    },
}

/// Owns the worker runtime and the single live generation session.
///
/// Starting a generation cancels the previous one first; events belonging to
/// any session other than the current one are dropped on receive.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
    current: Option<GenerationSession>,
    next_id: SessionId,
    diagnostics: DiagnosticsLog,
}

impl EngineHandle {
    pub fn new(settings: EngineSettings) -> Result<Self, EngineError> {
        let transport = Arc::new(ReqwestTransport::new(settings.clone()));
        Self::with_transport(settings, transport)
    }

    pub fn with_transport(
        settings: EngineSettings,
        transport: Arc<dyn CompletionTransport>,
    ) -> Result<Self, EngineError> {
        let diagnostics = DiagnosticsLog::new(settings.diagnostics_capacity);
        let orchestrator = Orchestrator::new(transport, diagnostics.clone(), settings);
        Self::with_orchestrator(orchestrator)
    }

    pub fn with_orchestrator(orchestrator: Orchestrator) -> Result<Self, EngineError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let diagnostics = orchestrator.diagnostics().clone();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        thread::spawn(move || {
            while let Ok(command) = cmd_rx.recv() {
                let orchestrator = orchestrator.clone();
                let event_tx = event_tx.clone();
                runtime.spawn(async move {
                    handle_command(&orchestrator, command, event_tx).await;
                });
            }
            pipeline_debug!("Engine command channel closed");
        });

        Ok(Self {
            cmd_tx,
            event_rx,
            current: None,
            next_id: 1,
            diagnostics,
        })
    }

    /// Validates `config`, cancels any live session and starts a new one.
    pub fn start(
        &mut self,
        config: RequestConfig,
        prompt: impl Into<String>,
    ) -> Result<SessionId, EngineError> {
        if let Err(err) = config.validate() {
            self.diagnostics.record(
                LogCategory::Config,
                json!({ "valid": false, "error": err.to_string() }),
            );
            return Err(err.into());
        }
        let session = GenerationSession::new(self.next_id);
        if let Some(previous) = self.current.take() {
            if !previous.is_finished() {
                self.diagnostics.record(
                    LogCategory::Aborted,
                    json!({ "session": previous.id(), "supersededBy": session.id() }),
                );
                pipeline_info!("Session {} superseded by {}", previous.id(), session.id());
            }
            previous.cancel();
        }

        self.next_id += 1;
        let session_id = session.id();
        self.cmd_tx
            .send(EngineCommand::Generate {
                session: session.clone(),
                config,
                prompt: prompt.into(),
            })
            .map_err(|_| EngineError::Stopped)?;
        self.current = Some(session);
        pipeline_info!("Started generation session {}", session_id);
        Ok(session_id)
    }

    /// Aborts the live generation. No-op when nothing is running.
    pub fn abort(&self) {
        if let Some(session) = &self.current {
            session.cancel();
        }
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.current.as_ref().map(GenerationSession::id)
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        while let Ok(event) = self.event_rx.try_recv() {
            if self.is_current(&event) {
                return Some(event);
            }
        }
        None
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.event_rx.recv_timeout(remaining) {
                Ok(event) if self.is_current(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    fn is_current(&self, event: &EngineEvent) -> bool {
        let current = self.current_session() == Some(event.session_id);
        if !current {
            pipeline_debug!("Dropping event from stale session {}", event.session_id);
        }
        current
    }

    /// Blocks until the connection test finishes.
    pub fn check_connection(&self, config: RequestConfig) -> Result<ConnectionCheck, EngineError> {
        let (reply, rx) = mpsc::channel();
        self.cmd_tx
            .send(EngineCommand::Check { config, reply })
            .map_err(|_| EngineError::Stopped)?;
        rx.recv().map_err(|_| EngineError::Stopped)
    }

    pub fn diagnostics(&self) -> &DiagnosticsLog {
        &self.diagnostics
    }
}

async fn handle_command(
    orchestrator: &Orchestrator,
    command: EngineCommand,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    match command {
        EngineCommand::Generate {
            session,
            config,
            prompt,
        } => {
            let sink = ChannelSink::new(event_tx);
            let outcome = orchestrator.run(&session, &config, &prompt, &sink).await;
            let label = match outcome {
                Outcome::Completed(_) => "completed",
                Outcome::Failed(_) => "failed",
                Outcome::Aborted => "aborted",
            };
            pipeline_debug!("Session {} {}", session.id(), label);
        }
        EngineCommand::Check { config, reply } => {
            let result =
                check_connection(orchestrator.transport(), &config, orchestrator.diagnostics())
                    .await;
            let _ = reply.send(result);
        }
    }
}
