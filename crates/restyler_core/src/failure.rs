use std::fmt;

/// Upstream error bodies are cut to this many characters before they are
/// stored or logged.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Bodies shorter than this are echoed in the generic user-facing message.
const INLINE_BODY_CHARS: usize = 200;

/// Why a single request attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Connection reset, timeout, undecodable response body.
    Transport { message: String },
    /// Non-2xx HTTP status with a truncated body.
    Status { code: u16, body: String },
}

impl AttemptFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        AttemptFailure::Transport {
            message: message.into(),
        }
    }

    pub fn status(code: u16, body: &str) -> Self {
        AttemptFailure::Status {
            code,
            body: truncate_body(body),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            AttemptFailure::Status { code, .. } => Some(*code),
            AttemptFailure::Transport { .. } => None,
        }
    }

    /// Human-readable message surfaced to the consumer when this failure is terminal.
    pub fn describe(&self) -> String {
        match self {
            AttemptFailure::Transport { message } => message.clone(),
            AttemptFailure::Status { code: 401, .. } => {
                "authentication failed (401): check that the API key is correct".to_string()
            }
            AttemptFailure::Status { code: 429, .. } => {
                "rate limited (429): too many requests, retry later".to_string()
            }
            AttemptFailure::Status {
                code: code @ (502 | 503 | 504),
                ..
            } => format!(
                "upstream unavailable ({code}): retry later, switch provider, or check the endpoint"
            ),
            AttemptFailure::Status { code, body } => {
                let body = body.trim();
                if !body.is_empty() && body.chars().count() < INLINE_BODY_CHARS {
                    format!("API error ({code}): {body}")
                } else {
                    format!("API error ({code})")
                }
            }
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Transport { message } => write!(f, "transport error: {message}"),
            AttemptFailure::Status { code, .. } => write!(f, "upstream status {code}"),
        }
    }
}

/// Cuts `body` to [`MAX_ERROR_BODY_CHARS`] characters.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((end, _)) => body[..end].to_string(),
        None => body.to_string(),
    }
}
