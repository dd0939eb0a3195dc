use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{anyhow, Context};
use chrono::{NaiveDate, Utc};
use pipeline_logging::{pipeline_info, pipeline_warn};
use restyler_engine::{ArtifactWriter, DiagnosticsLog, LogEntry, RequestConfig};

pub(crate) const API_KEY_ENV: &str = "RESTYLER_API_KEY";
const DIAGNOSTICS_FILENAME: &str = "diagnostics.json";

/// Reads the RON config at `path`; a missing file yields defaults. A
/// non-empty `env_key` overrides the stored credential.
pub(crate) fn load_config(path: &Path, env_key: Option<String>) -> anyhow::Result<RequestConfig> {
    let mut config = match fs::read_to_string(path) {
        Ok(text) => ron::from_str::<RequestConfig>(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            pipeline_warn!("No config at {:?}; using defaults", path);
            RequestConfig::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read config {}", path.display()))
        }
    };
    if let Some(key) = env_key.filter(|key| !key.trim().is_empty()) {
        config.credential = key;
    }
    pipeline_info!("Loaded config {:?}", config.redacted());
    Ok(config)
}

pub(crate) fn save_config(path: &Path, config: &RequestConfig) -> anyhow::Result<()> {
    let content = ron::ser::to_string_pretty(config, ron::ser::PrettyConfig::new())
        .context("failed to serialize config")?;
    write_atomically(path, &content)
}

/// Entries persisted for `today`; entries from other days are discarded.
pub(crate) fn load_diagnostics(dir: &Path, today: NaiveDate) -> Vec<LogEntry> {
    let path = dir.join(DIAGNOSTICS_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            pipeline_warn!("Failed to read diagnostics from {:?}: {}", path, err);
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<LogEntry>>(&content) {
        Ok(entries) => entries
            .into_iter()
            .filter(|entry| entry.timestamp.date_naive() == today)
            .collect(),
        Err(err) => {
            pipeline_warn!("Failed to parse diagnostics from {:?}: {}", path, err);
            Vec::new()
        }
    }
}

pub(crate) fn save_diagnostics(dir: &Path, log: &DiagnosticsLog) -> anyhow::Result<()> {
    log.retain_day(Utc::now().date_naive());
    let content =
        serde_json::to_string_pretty(&log.snapshot()).context("failed to serialize diagnostics")?;
    write_atomically(&dir.join(DIAGNOSTICS_FILENAME), &content)
}

fn write_atomically(path: &Path, content: &str) -> anyhow::Result<()> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("invalid file path {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ArtifactWriter::new(dir).write(filename, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use restyler_engine::LogCategory;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn config_round_trips_and_env_key_wins() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("restyler.ron");
        let config = RequestConfig {
            model: "gpt-4.1".to_string(),
            credential: "from-file".to_string(),
            max_tokens: 8000,
            ..RequestConfig::default()
        };
        save_config(&path, &config).unwrap();

        assert_eq!(load_config(&path, None).unwrap(), config);
        let overridden = load_config(&path, Some("from-env".to_string())).unwrap();
        assert_eq!(overridden.credential, "from-env");
        assert_eq!(overridden.max_tokens, 8000);
        assert_eq!(load_config(&path, Some("  ".to_string())).unwrap(), config);
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join("absent.ron"), None).unwrap();
        assert_eq!(config, RequestConfig::default());
    }

    #[test]
    fn broken_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("restyler.ron");
        fs::write(&path, "(model: ").unwrap();
        assert!(load_config(&path, None).is_err());
    }

    #[test]
    fn only_todays_diagnostics_are_loaded() {
        let temp = TempDir::new().unwrap();
        let today = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2026, 5, 3, 12, 0, 0).unwrap();
        let entries = vec![
            LogEntry {
                id: 1,
                timestamp: yesterday,
                category: LogCategory::Request,
                payload: json!({}),
            },
            LogEntry {
                id: 2,
                timestamp: today,
                category: LogCategory::Complete,
                payload: json!({ "contentLength": 3 }),
            },
        ];
        fs::write(
            temp.path().join(DIAGNOSTICS_FILENAME),
            serde_json::to_string(&entries).unwrap(),
        )
        .unwrap();

        let loaded = load_diagnostics(temp.path(), today.date_naive());
        assert_eq!(loaded, vec![entries[1].clone()]);
    }

    #[test]
    fn saved_diagnostics_can_be_reloaded() {
        let temp = TempDir::new().unwrap();
        let log = DiagnosticsLog::new(10);
        log.record(LogCategory::TestRequest, json!({ "model": "m" }));
        save_diagnostics(temp.path(), &log).unwrap();

        let loaded = load_diagnostics(temp.path(), Utc::now().date_naive());
        assert_eq!(loaded, log.snapshot());
    }
}
