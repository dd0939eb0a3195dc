use std::fmt;

use crate::view_model::SessionView;

pub type SessionId = u64;

/// Requested token budgets above this ceiling get one more non-streaming
/// attempt with the budget clamped to it.
pub const TOKEN_CEILING: u32 = 4096;

/// Request strategy, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Stream,
    NonStream,
    NonStreamReducedTokens,
}

impl Strategy {
    /// Position in the fallback cascade (0 = stream).
    pub fn index(self) -> u8 {
        match self {
            Strategy::Stream => 0,
            Strategy::NonStream => 1,
            Strategy::NonStreamReducedTokens => 2,
        }
    }

    pub fn is_streaming(self) -> bool {
        matches!(self, Strategy::Stream)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Stream => write!(f, "stream"),
            Strategy::NonStream => write!(f, "non-stream"),
            Strategy::NonStreamReducedTokens => write!(f, "non-stream (reduced tokens)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Streaming,
    NonStreaming,
    NonStreamingReducedTokens,
    Succeeded,
    Failed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed | Phase::Aborted)
    }

    /// A session is live while one of its attempts is in flight.
    pub fn is_live(self) -> bool {
        self.strategy().is_some()
    }

    pub fn strategy(self) -> Option<Strategy> {
        match self {
            Phase::Streaming => Some(Strategy::Stream),
            Phase::NonStreaming => Some(Strategy::NonStream),
            Phase::NonStreamingReducedTokens => Some(Strategy::NonStreamReducedTokens),
            Phase::Idle | Phase::Succeeded | Phase::Failed | Phase::Aborted => None,
        }
    }

    pub(crate) fn for_strategy(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Stream => Phase::Streaming,
            Strategy::NonStream => Phase::NonStreaming,
            Strategy::NonStreamReducedTokens => Phase::NonStreamingReducedTokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(String),
    Failed(String),
    Aborted,
}

/// One generation session: the orchestrator's whole mutable world.
///
/// The text buffer only grows while a session lives; [`GenerationState::begin`]
/// is the only place it is reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationState {
    session_id: SessionId,
    phase: Phase,
    requested_max_tokens: u32,
    buffer: String,
    outcome: Option<Outcome>,
    dirty: bool,
}

impl GenerationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.phase.strategy()
    }

    pub fn requested_max_tokens(&self) -> u32 {
        self.requested_max_tokens
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id,
            phase: self.phase,
            strategy: self.strategy(),
            buffered_chars: self.buffer.chars().count(),
            outcome: self.outcome.clone(),
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Whether a message tagged with `session_id` belongs to the live session.
    pub(crate) fn accepts(&self, session_id: SessionId) -> bool {
        self.session_id == session_id && self.phase.is_live()
    }

    pub(crate) fn begin(&mut self, session_id: SessionId, max_tokens: u32) {
        self.session_id = session_id;
        self.phase = Phase::Streaming;
        self.requested_max_tokens = max_tokens;
        self.buffer.clear();
        self.outcome = None;
        self.dirty = true;
    }

    pub(crate) fn append(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.dirty = true;
    }

    pub(crate) fn enter(&mut self, strategy: Strategy) {
        self.phase = Phase::for_strategy(strategy);
        self.dirty = true;
    }

    pub(crate) fn finish(&mut self, outcome: Outcome) {
        self.phase = match outcome {
            Outcome::Completed(_) => Phase::Succeeded,
            Outcome::Failed(_) => Phase::Failed,
            Outcome::Aborted => Phase::Aborted,
        };
        self.outcome = Some(outcome);
        self.dirty = true;
    }
}
