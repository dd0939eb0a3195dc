use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use pipeline_logging::{mask_secret, pipeline_debug};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{AttemptError, DiagnosticsLog, EngineSettings, LogCategory, RequestConfig};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, AttemptError>> + Send>>;

const PROBE_PROMPT: &str = "Hi";
const PROBE_MAX_TOKENS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// JSON body of one chat-completions call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatBody {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Everything one attempt needs to hit the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub endpoint: String,
    pub credential: String,
    pub body: ChatBody,
}

impl CompletionRequest {
    pub fn new(config: &RequestConfig, prompt: &str, max_tokens: u32, stream: bool) -> Self {
        Self {
            endpoint: config.endpoint.trim().to_string(),
            credential: config.credential.clone(),
            body: ChatBody {
                model: config.model.clone(),
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                }],
                temperature: config.temperature,
                max_tokens,
                stream,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Option<Vec<CompletionChoice>>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Extracts `choices[0].message.content`; a missing field means empty content.
pub fn parse_completion(body: &str) -> Result<String, AttemptError> {
    let parsed: CompletionBody =
        serde_json::from_str(body).map_err(|err| AttemptError::InvalidBody(err.to_string()))?;
    Ok(parsed
        .choices
        .and_then(|choices| choices.into_iter().next())
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .unwrap_or_default())
}

#[async_trait::async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Sends a streaming request; resolves once a success status arrived.
    async fn open_stream(&self, request: &CompletionRequest) -> Result<ByteStream, AttemptError>;

    /// Sends a non-streaming request and returns the message content.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AttemptError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    settings: EngineSettings,
}

impl ReqwestTransport {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    fn build_client(&self) -> Result<reqwest::Client, AttemptError> {
        reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .build()
            .map_err(|err| AttemptError::Transport(err.to_string()))
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        whole_request_timeout: bool,
    ) -> Result<reqwest::Response, AttemptError> {
        let url = reqwest::Url::parse(&request.endpoint)
            .map_err(|err| AttemptError::Transport(format!("invalid endpoint: {err}")))?;
        let body =
            serde_json::to_vec(&request.body).map_err(|err| AttemptError::Transport(err.to_string()))?;
        let accept = if request.body.stream {
            "text/event-stream"
        } else {
            "application/json"
        };

        let mut builder = self
            .build_client()?
            .post(url)
            .bearer_auth(&request.credential)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept)
            .body(body);
        if whole_request_timeout {
            builder = builder.timeout(self.settings.request_timeout);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        pipeline_debug!(
            "POST {} stream={} -> {}",
            request.endpoint,
            request.body.stream,
            status
        );
        if !status.is_success() {
            let body = error_body(status, response.text().await);
            return Err(AttemptError::UpstreamStatus {
                code: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl CompletionTransport for ReqwestTransport {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<ByteStream, AttemptError> {
        let response = self.send(request, false).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error));
        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AttemptError> {
        let response = self.send(request, true).await?;
        let body = response.text().await.map_err(map_reqwest_error)?;
        parse_completion(&body)
    }
}

/// Keeps a failed read visible instead of reporting an empty body.
fn error_body<E: std::fmt::Display>(
    status: reqwest::StatusCode,
    read: Result<String, E>,
) -> String {
    match read {
        Ok(body) => body,
        Err(err) => {
            pipeline_debug!("Could not read {} error body: {}", status, err);
            format!("<unreadable error body: {err}>")
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> AttemptError {
    if err.is_timeout() {
        return AttemptError::Timeout(err.to_string());
    }
    AttemptError::Transport(err.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCheck {
    pub success: bool,
    pub message: String,
}

/// Sends a tiny non-streaming request to confirm endpoint, model and key.
pub async fn check_connection(
    transport: &dyn CompletionTransport,
    config: &RequestConfig,
    log: &DiagnosticsLog,
) -> ConnectionCheck {
    let request = CompletionRequest::new(config, PROBE_PROMPT, PROBE_MAX_TOKENS, false);
    log.record(
        LogCategory::TestRequest,
        json!({
            "endpoint": request.endpoint,
            "model": request.body.model,
            "authorization": format!("Bearer {}", mask_secret(&config.credential, 8)),
            "body": request.body,
        }),
    );

    match transport.complete(&request).await {
        Ok(content) => {
            log.record(
                LogCategory::TestResponse,
                json!({ "status": 200, "contentLength": content.chars().count() }),
            );
            ConnectionCheck {
                success: true,
                message: "connection succeeded".to_string(),
            }
        }
        Err(AttemptError::UpstreamStatus { code, body }) => {
            log.record(
                LogCategory::TestResponse,
                json!({ "status": code, "body": restyler_core::truncate_body(&body) }),
            );
            ConnectionCheck {
                success: false,
                message: format!("connection failed: {}", describe_probe_failure(code, &body)),
            }
        }
        Err(err) => {
            log.record(LogCategory::TestError, json!({ "message": err.to_string() }));
            ConnectionCheck {
                success: false,
                message: format!("connection failed: {err}"),
            }
        }
    }
}

fn describe_probe_failure(code: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = value
            .get("error")
            .and_then(|error| error.get("message"))
            .or_else(|| value.get("message"))
            .and_then(|message| message.as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }
    if body.is_empty() {
        return code.to_string();
    }
    let excerpt: String = body.chars().take(100).collect();
    format!("{code} - {excerpt}")
}
