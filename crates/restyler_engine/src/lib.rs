//! Restyler engine: IO pipeline and effect execution.
//!
//! Bytes from the completion endpoint flow through [`SseReader`], the
//! accumulated text through an [`Extractor`] and a [`Sanitizer`], and the
//! [`Orchestrator`] turns the decisions of [`restyler_core::update`] into
//! requests, notifications and diagnostics entries.
mod client;
mod config;
mod decode;
mod diagnostics;
mod engine;
mod extract;
mod filename;
mod orchestrator;
mod persist;
mod prompt;
mod render;
mod sanitize;
mod sse;
mod types;

pub use client::{
    check_connection, parse_completion, ByteStream, ChatBody, ChatMessage, CompletionRequest,
    CompletionTransport, ConnectionCheck, ReqwestTransport,
};
pub use config::{
    is_sensitive_site, ConfigError, EngineSettings, RequestConfig, DEFAULT_ENDPOINT,
    DEFAULT_MODEL, SENSITIVE_SITES,
};
pub use decode::{decode_input, DecodeError, DecodedText};
pub use diagnostics::{Clock, DiagnosticsLog, LogEntry, DEFAULT_CAPACITY};
pub use engine::{EngineError, EngineHandle};
pub use extract::{ExtractionPolicy, ExtractionResult, Extractor, HtmlExtractor};
pub use filename::artifact_filename;
pub use orchestrator::{ChannelSink, GenerationSession, NotificationSink, Orchestrator};
pub use persist::{ensure_output_dir, ArtifactWriter, PersistError};
pub use prompt::{fill_template, DEFAULT_TEMPLATE};
pub use render::render_page;
pub use sanitize::{sanitize, SanitizationPolicy, SanitizedDocument, Sanitizer};
pub use sse::{FrameError, SseEvent, SseReader, StreamFrame};
pub use types::{AttemptError, EngineEvent, LogCategory, Notification};
