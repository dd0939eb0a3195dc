use std::fmt;

use restyler_core::{AttemptFailure, SessionId};

/// What the pipeline tells its consumer. `Complete`, `Error` and `Aborted`
/// are terminal and mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Sanitized fragment for the text received so far.
    Partial { rendered: String },
    /// Raw model content plus its sanitized fragment.
    Complete { content: String, rendered: String },
    Error { message: String },
    Aborted,
}

impl Notification {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Partial { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub session_id: SessionId,
    pub notification: Notification,
}

/// Failure of one request attempt as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("upstream returned HTTP {code}")]
    UpstreamStatus { code: u16, body: String },
    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

impl AttemptError {
    pub fn into_failure(self) -> AttemptFailure {
        match self {
            AttemptError::UpstreamStatus { code, body } => AttemptFailure::status(code, &body),
            AttemptError::Timeout(message) => AttemptFailure::transport(format!("timeout: {message}")),
            AttemptError::Transport(message) | AttemptError::InvalidBody(message) => {
                AttemptFailure::transport(message)
            }
        }
    }
}

/// Category tag of a diagnostics entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    Request,
    Response,
    StreamError,
    ParseError,
    Fallback,
    FallbackTokens,
    NonStreamRequest,
    Complete,
    Error,
    Aborted,
    Config,
    TestRequest,
    TestResponse,
    TestError,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            LogCategory::Request => "REQUEST",
            LogCategory::Response => "RESPONSE",
            LogCategory::StreamError => "STREAM_ERROR",
            LogCategory::ParseError => "PARSE_ERROR",
            LogCategory::Fallback => "FALLBACK",
            LogCategory::FallbackTokens => "FALLBACK_TOKENS",
            LogCategory::NonStreamRequest => "NON_STREAM_REQUEST",
            LogCategory::Complete => "COMPLETE",
            LogCategory::Error => "ERROR",
            LogCategory::Aborted => "ABORTED",
            LogCategory::Config => "CONFIG",
            LogCategory::TestRequest => "TEST_REQUEST",
            LogCategory::TestResponse => "TEST_RESPONSE",
            LogCategory::TestError => "TEST_ERROR",
        };
        f.write_str(tag)
    }
}
