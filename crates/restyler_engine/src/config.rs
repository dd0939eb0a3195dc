use std::time::Duration;

use pipeline_logging::mask_secret;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// URL fragments that mark a page as too sensitive to send to a model.
pub const SENSITIVE_SITES: &[&str] = &[
    "bank",
    "login",
    "signin",
    "payment",
    "checkout",
    "mail.google.com",
    "outlook.live.com",
    "mail.qq.com",
];

/// Per-generation model configuration. Immutable for the lifetime of one
/// orchestrated attempt chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub endpoint: String,
    pub model: String,
    pub credential: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            credential: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },
    #[error("model identifier is empty")]
    MissingModel,
    #[error("API key is not configured")]
    MissingCredential,
    #[error("temperature {0} is outside [0, 2]")]
    TemperatureOutOfRange(f32),
    #[error("max_tokens must be positive")]
    ZeroMaxTokens,
}

impl RequestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = url::Url::parse(self.endpoint.trim()).map_err(|err| {
            ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                message: err.to_string(),
            }
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                message: format!("unsupported scheme {}", endpoint.scheme()),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::MissingModel);
        }
        if self.credential.trim().is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::TemperatureOutOfRange(self.temperature));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ZeroMaxTokens);
        }
        Ok(())
    }

    /// Copy of this config that is safe to log.
    pub fn redacted(&self) -> Self {
        Self {
            credential: mask_secret(&self.credential, 0),
            ..self.clone()
        }
    }
}

/// Transport tuning shared by every session an engine runs.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub connect_timeout: Duration,
    /// Whole-request limit for non-streaming attempts.
    pub request_timeout: Duration,
    /// A stream that delivers no bytes for this long counts as a transport failure.
    pub stream_idle_timeout: Duration,
    pub diagnostics_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            stream_idle_timeout: Duration::from_secs(60),
            diagnostics_capacity: crate::diagnostics::DEFAULT_CAPACITY,
        }
    }
}

pub fn is_sensitive_site(url: &str) -> bool {
    let lower = url.to_lowercase();
    SENSITIVE_SITES.iter().any(|keyword| lower.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RequestConfig {
        RequestConfig {
            credential: "sk-test".to_string(),
            ..RequestConfig::default()
        }
    }

    #[test]
    fn default_config_needs_only_a_key() {
        assert_eq!(
            RequestConfig::default().validate(),
            Err(ConfigError::MissingCredential)
        );
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = RequestConfig {
            temperature: 2.5,
            ..valid()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TemperatureOutOfRange(2.5))
        );

        let config = RequestConfig {
            max_tokens: 0,
            ..valid()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxTokens));

        let config = RequestConfig {
            endpoint: "ftp://example.com/v1".to_string(),
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn redacted_hides_credential() {
        let redacted = valid().redacted();
        assert_eq!(redacted.credential, "***");
        assert_eq!(redacted.model, DEFAULT_MODEL);
    }

    #[test]
    fn sensitive_sites_match_case_insensitively() {
        assert!(is_sensitive_site("https://MyBank.example.com/account"));
        assert!(is_sensitive_site("https://mail.google.com/mail/u/0"));
        assert!(!is_sensitive_site("https://blog.example.com/post"));
    }
}
