use std::borrow::Cow;
use std::sync::LazyLock;

use pipeline_logging::pipeline_warn;
use regex::Regex;

/// Best guess at the HTML document inside model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    /// Not enough structure yet; more text may change that.
    NoCandidateYet,
    Candidate(String),
}

impl ExtractionResult {
    pub fn candidate(&self) -> Option<&str> {
        match self {
            ExtractionResult::Candidate(html) => Some(html),
            ExtractionResult::NoCandidateYet => None,
        }
    }

    pub fn into_candidate(self) -> Option<String> {
        match self {
            ExtractionResult::Candidate(html) => Some(html),
            ExtractionResult::NoCandidateYet => None,
        }
    }
}

pub trait Extractor: Send + Sync {
    /// Pure function of the whole accumulated text.
    fn extract(&self, text: &str) -> ExtractionResult;
}

/// Conversational lead-ins and sign-offs to strip around the markup.
///
/// Entries are regex fragments matched case-insensitively at the start of the
/// text (preambles) or at the start of its last line (postambles). They are
/// tuned to particular assistants' phrasing and are expected to be adjusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPolicy {
    pub preambles: Vec<String>,
    pub postambles: Vec<String>,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        let preambles = [
            r"here\s+is",
            r"here's",
            r"here\s+are",
            r"the\s+following\s+is",
            r"below\s+is",
            r"sure\b",
            r"ok\b",
            r"okay\b",
            r"certainly\b",
            r"of\s+course\b",
            "以下是",
            "这是",
            "好的[，,]",
            "当然[，,]",
            "我[已来为]",
            "下面是",
            "这里是",
            "请[看查]",
            "现在",
            "为您",
            "根据",
            "接下来",
        ];
        let postambles = [
            r"hope\s+th(?:is|at)",
            r"i\s+hope",
            r"let\s+me\s+know",
            r"feel\s+free",
            r"if\s+you",
            r"please\s+note",
            r"enjoy\b",
            "希望这",
            "如果[您你]",
            "请注意",
            "如[有需]要",
            "以上是",
            "这个",
            "如果",
            "让我知道",
            "请[让告]",
        ];
        Self {
            preambles: preambles.iter().map(|p| p.to_string()).collect(),
            postambles: postambles.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// A pattern that fails to compile disables its extraction step.
fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            pipeline_warn!("Disabling extraction pattern {}: {}", pattern, err);
            None
        }
    }
}

static CLOSED_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?s)```(?:html|HTML)?\s*?(.*?)```"));
static OPEN_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?s)```(?:html|HTML)?\s*?(.*)$"));
static DOCTYPE_SPAN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?is)<!DOCTYPE\s+html.*?</html>"));
static HTML_SPAN: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"(?is)<html.*?</html>"));
static ANY_ROOT: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?is)<(?:!DOCTYPE|html|head|body|div|style)[^>]*>.*$"));

fn find_in<'t>(pattern: &LazyLock<Option<Regex>>, text: &'t str) -> Option<regex::Match<'t>> {
    LazyLock::force(pattern)
        .as_ref()
        .and_then(|regex| regex.find(text))
}

fn inner_group<'t>(pattern: &LazyLock<Option<Regex>>, text: &'t str) -> Option<regex::Match<'t>> {
    LazyLock::force(pattern)
        .as_ref()
        .and_then(|regex| regex.captures(text))
        .and_then(|captures| captures.get(1))
}

/// Upper bound on sign-off lines removed from one text.
const MAX_POSTAMBLE_LINES: usize = 8;

/// Heuristic extractor for prose-wrapped, possibly unfinished markup.
#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    preamble: Option<Regex>,
    postamble: Option<Regex>,
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new(&ExtractionPolicy::default())
    }
}

impl HtmlExtractor {
    /// Builds an extractor; a phrase set that fails to compile disables that
    /// stripping step instead of failing.
    pub fn new(policy: &ExtractionPolicy) -> Self {
        let preamble = build_alternation(&policy.preambles, |alts| {
            format!(r"(?i)^\s*(?:{alts})[^\n<]*\n*")
        });
        let postamble = build_alternation(&policy.postambles, |alts| {
            format!(r"(?i)\n+\s*(?:{alts})[^\n]*\s*$")
        });
        Self {
            preamble,
            postamble,
        }
    }

    fn strip_chatter<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut working = Cow::Borrowed(text);
        if let Some(preamble) = &self.preamble {
            if let Some(found) = preamble.find(&working) {
                working = Cow::Owned(working[found.end()..].to_string());
            }
        }
        if let Some(postamble) = &self.postamble {
            for _ in 0..MAX_POSTAMBLE_LINES {
                let Some(found) = postamble.find(&working) else {
                    break;
                };
                working = Cow::Owned(working[..found.start()].to_string());
            }
        }
        working
    }
}

fn build_alternation(phrases: &[String], wrap: impl Fn(&str) -> String) -> Option<Regex> {
    if phrases.is_empty() {
        return None;
    }
    let alts = phrases.join("|");
    match Regex::new(&wrap(&alts)) {
        Ok(regex) => Some(regex),
        Err(err) => {
            pipeline_warn!("Ignoring invalid extraction phrase set: {}", err);
            None
        }
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, text: &str) -> ExtractionResult {
        let mut working = text;
        if let Some(inner) = inner_group(&CLOSED_FENCE, text) {
            working = inner.as_str().trim();
        } else if let Some(inner) = inner_group(&OPEN_FENCE, text) {
            // Unfinished fence while streaming; only trust it once markup shows up.
            if inner.as_str().contains('<') {
                working = inner.as_str().trim();
            }
        }

        let stripped = self.strip_chatter(working);

        if let Some(found) =
            find_in(&DOCTYPE_SPAN, &stripped).or_else(|| find_in(&HTML_SPAN, &stripped))
        {
            return ExtractionResult::Candidate(found.as_str().trim().to_string());
        }

        let trimmed = stripped.trim();
        if trimmed.starts_with('<') {
            if let Some(last_tag_end) = trimmed.rfind('>').filter(|idx| *idx > 0) {
                let after = trimmed[last_tag_end + 1..].trim();
                if !after.is_empty() && !after.starts_with('<') {
                    return ExtractionResult::Candidate(trimmed[..=last_tag_end].to_string());
                }
            }
            return ExtractionResult::Candidate(trimmed.to_string());
        }

        if let Some(found) = find_in(&ANY_ROOT, &stripped) {
            return ExtractionResult::Candidate(found.as_str().trim().to_string());
        }

        ExtractionResult::NoCandidateYet
    }
}
