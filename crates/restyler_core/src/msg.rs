use crate::{AttemptFailure, SessionId};

/// Observations fed into [`crate::update`]. Every variant except `Start` is
/// tagged with the session it belongs to; messages for any other session are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Host asked for a new generation.
    Start { session_id: SessionId, max_tokens: u32 },
    /// The streaming attempt got a success status and its body is flowing.
    StreamOpened { session_id: SessionId },
    /// One content delta decoded from the stream.
    DeltaReceived { session_id: SessionId, text: String },
    /// An event frame could not be decoded and was skipped.
    FrameSkipped {
        session_id: SessionId,
        line: String,
        error: String,
    },
    /// The streaming attempt reached end-of-stream cleanly.
    StreamEnded { session_id: SessionId },
    /// A non-streaming attempt returned its full content.
    ResponseReceived { session_id: SessionId, content: String },
    /// The current attempt failed at the transport or with an upstream status.
    AttemptFailed {
        session_id: SessionId,
        failure: AttemptFailure,
    },
    /// Cancellation was observed at a suspension point.
    Cancelled { session_id: SessionId },
}

impl Msg {
    pub fn session_id(&self) -> SessionId {
        match self {
            Msg::Start { session_id, .. }
            | Msg::StreamOpened { session_id }
            | Msg::DeltaReceived { session_id, .. }
            | Msg::FrameSkipped { session_id, .. }
            | Msg::StreamEnded { session_id }
            | Msg::ResponseReceived { session_id, .. }
            | Msg::AttemptFailed { session_id, .. }
            | Msg::Cancelled { session_id } => *session_id,
        }
    }
}
