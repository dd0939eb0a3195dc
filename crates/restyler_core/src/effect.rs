use crate::{AttemptFailure, Phase, SessionId, Strategy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Issue one request attempt.
    Issue {
        session_id: SessionId,
        strategy: Strategy,
        max_tokens: u32,
    },
    /// Re-run extraction and sanitization over the whole buffer so far.
    Preview {
        session_id: SessionId,
        accumulated: String,
    },
    /// Terminal: generation finished with `content`.
    Complete {
        session_id: SessionId,
        content: String,
    },
    /// Terminal: surface `message` to the consumer.
    Fail {
        session_id: SessionId,
        message: String,
    },
    /// Terminal: the session was cancelled.
    Abort { session_id: SessionId },
    /// Append an entry to the diagnostics log.
    Record(DiagnosticEvent),
}

impl Effect {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Effect::Complete { .. } | Effect::Fail { .. } | Effect::Abort { .. }
        )
    }
}

/// Typed description of one orchestration decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    Request {
        strategy: Strategy,
        max_tokens: u32,
    },
    ResponseOpened {
        strategy: Strategy,
    },
    AttemptFailed {
        strategy: Strategy,
        failure: AttemptFailure,
    },
    ParseError {
        line: String,
        error: String,
    },
    Fallback {
        from: Strategy,
        to: Strategy,
        max_tokens: u32,
        requested_max_tokens: u32,
    },
    Completed {
        strategy: Strategy,
        content: String,
    },
    Surfaced {
        message: String,
    },
    Aborted {
        phase: Phase,
    },
}
