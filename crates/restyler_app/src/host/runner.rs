use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use pipeline_logging::{pipeline_info, pipeline_warn};
use restyler_engine::{
    artifact_filename, decode_input, fill_template, is_sensitive_site, render_page,
    ArtifactWriter, EngineHandle, Notification, RequestConfig, Sanitizer, DEFAULT_TEMPLATE,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Everything `restyler generate` needs besides the model config.
#[derive(Debug, Clone)]
pub(crate) struct GenerateJob {
    pub input: PathBuf,
    pub charset: Option<String>,
    pub title: Option<String>,
    pub template: Option<PathBuf>,
    pub source_url: Option<String>,
    pub force: bool,
    pub max_tokens: Option<u32>,
    pub output_dir: PathBuf,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunResult {
    Written(PathBuf),
    Aborted,
}

pub(crate) fn build_prompt(job: &GenerateJob) -> anyhow::Result<String> {
    if let Some(url) = &job.source_url {
        if is_sensitive_site(url) && !job.force {
            bail!("{url} looks like a sensitive page; pass --force to restyle it anyway");
        }
    }

    let bytes = fs::read(&job.input)
        .with_context(|| format!("failed to read {}", job.input.display()))?;
    let decoded = decode_input(&bytes, job.charset.as_deref())?;
    pipeline_info!(
        "Decoded {} as {}",
        job.input.display(),
        decoded.encoding_label
    );

    let template = match &job.template {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read template {}", path.display()))?,
        None => DEFAULT_TEMPLATE.to_string(),
    };
    let title = job.title.as_deref().unwrap_or("");
    let url = job.source_url.as_deref().unwrap_or("");
    Ok(fill_template(
        &template,
        &[("title", title), ("content", &decoded.text), ("url", url)],
    ))
}

/// Drives one generation on `engine` until its terminal notification.
pub(crate) fn run_generation(
    engine: &mut EngineHandle,
    mut config: RequestConfig,
    job: &GenerateJob,
) -> anyhow::Result<RunResult> {
    let prompt = build_prompt(job)?;
    if let Some(max_tokens) = job.max_tokens {
        config.max_tokens = max_tokens;
    }
    let session = engine.start(config, prompt)?;
    pipeline_info!("Generating with session {}", session);

    let started = Instant::now();
    let mut abort_sent = false;
    let mut partials = 0usize;
    loop {
        if let Some(limit) = job.timeout {
            if !abort_sent && started.elapsed() >= limit {
                pipeline_warn!("Generation exceeded {:?}; aborting", limit);
                engine.abort();
                abort_sent = true;
            }
        }
        let Some(event) = engine.recv_timeout(POLL_INTERVAL) else {
            continue;
        };
        match event.notification {
            Notification::Partial { rendered } => {
                partials += 1;
                eprint!("\rpreview #{partials}: {} chars", rendered.chars().count());
                let _ = std::io::stderr().flush();
            }
            Notification::Complete { content, rendered } => {
                if partials > 0 {
                    eprintln!();
                }
                let path = write_artifact(&job.output_dir, job.title.as_deref(), &content, &rendered)?;
                return Ok(RunResult::Written(path));
            }
            Notification::Error { message } => {
                if partials > 0 {
                    eprintln!();
                }
                bail!(message);
            }
            Notification::Aborted => {
                if partials > 0 {
                    eprintln!();
                }
                return Ok(RunResult::Aborted);
            }
        }
    }
}

/// The composed fragment is already sanitized, so sanitizing it again only
/// splits it back into its style and body parts.
pub(crate) fn write_artifact(
    output_dir: &Path,
    title: Option<&str>,
    content: &str,
    rendered: &str,
) -> anyhow::Result<PathBuf> {
    let document = Sanitizer::default().sanitize(rendered);
    let page = render_page(&document);
    let filename = artifact_filename(title, content);
    let path = ArtifactWriter::new(output_dir).write(&filename, &page)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn job(input: PathBuf) -> GenerateJob {
        GenerateJob {
            input,
            charset: None,
            title: Some("Notes".to_string()),
            template: None,
            source_url: None,
            force: false,
            max_tokens: None,
            output_dir: PathBuf::from("out"),
            timeout: None,
        }
    }

    #[test]
    fn prompt_embeds_decoded_page_text() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("page.txt");
        fs::write(&input, "Quarterly numbers went up.").unwrap();

        let prompt = build_prompt(&job(input)).unwrap();
        assert!(prompt.contains("Quarterly numbers went up."));
        assert!(prompt.contains("Title: Notes"));
    }

    #[test]
    fn sensitive_source_needs_force() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("page.txt");
        fs::write(&input, "balance").unwrap();

        let mut guarded = job(input);
        guarded.source_url = Some("https://mybank.example.com/accounts".to_string());
        assert!(build_prompt(&guarded).is_err());

        guarded.force = true;
        assert!(build_prompt(&guarded).is_ok());
    }

    #[test]
    fn custom_template_is_filled() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("page.txt");
        let template = temp.path().join("prompt.txt");
        fs::write(&input, "body").unwrap();
        fs::write(&template, "Style {{url}}: {{content}}").unwrap();

        let mut custom = job(input);
        custom.template = Some(template);
        custom.source_url = Some("https://blog.example.com".to_string());
        assert_eq!(
            build_prompt(&custom).unwrap(),
            "Style https://blog.example.com: body"
        );
    }

    #[test]
    fn artifact_is_a_full_page() {
        let temp = TempDir::new().unwrap();
        let path = write_artifact(
            temp.path(),
            Some("Notes"),
            "```html\n<p>hi</p>\n```",
            "<style>p{}</style><p>hi</p>",
        )
        .unwrap();

        let page = fs::read_to_string(&path).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("Notes--"));
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<style>\np{}\n</style>"));
        assert!(page.contains("<body><p>hi</p></body>"));
    }
}
