use crate::{Outcome, Phase, SessionId, Strategy};

/// Read-only snapshot of a session for hosts that display progress.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionView {
    pub session_id: SessionId,
    pub phase: Phase,
    pub strategy: Option<Strategy>,
    pub buffered_chars: usize,
    pub outcome: Option<Outcome>,
    pub dirty: bool,
}

impl SessionView {
    pub fn status_line(&self) -> String {
        match (&self.outcome, self.strategy) {
            (Some(Outcome::Completed(_)), _) => "done".to_string(),
            (Some(Outcome::Failed(message)), _) => format!("failed: {message}"),
            (Some(Outcome::Aborted), _) => "aborted".to_string(),
            (None, Some(strategy)) => {
                format!("{strategy}: {} chars received", self.buffered_chars)
            }
            (None, None) => "idle".to_string(),
        }
    }
}
