use pretty_assertions::assert_eq;
use restyler_engine::{ExtractionResult, Extractor, HtmlExtractor};

fn candidate(text: &str) -> Option<String> {
    HtmlExtractor::default().extract(text).into_candidate()
}

#[test]
fn fenced_reply_with_chatter_yields_inner_markup() {
    let text = "Sure, here you go:\n```html\n<div onclick=\"evil()\">Hi<script>bad()</script></div>\n```\nHope that helps!";
    assert_eq!(
        candidate(text).as_deref(),
        Some("<div onclick=\"evil()\">Hi<script>bad()</script></div>")
    );
}

#[test]
fn unfenced_document_loses_preamble_and_sign_off() {
    let text = "Here is your page:\n<html><body><p>x</p></body></html>\nHope this helps!";
    assert_eq!(
        candidate(text).as_deref(),
        Some("<html><body><p>x</p></body></html>")
    );
}

#[test]
fn doctype_span_is_preferred() {
    let text = "Sure! <!DOCTYPE html><html><head></head><body>x</body></html> enjoy";
    assert_eq!(
        candidate(text).as_deref(),
        Some("<!DOCTYPE html><html><head></head><body>x</body></html>")
    );
}

#[test]
fn unfinished_fence_is_cut_after_last_complete_tag() {
    let text = "```html\n<div class=\"card\"><h1>Ti";
    assert_eq!(
        candidate(text).as_deref(),
        Some("<div class=\"card\"><h1>")
    );
}

#[test]
fn fence_without_markup_yet_has_no_candidate() {
    let extractor = HtmlExtractor::default();
    assert_eq!(extractor.extract("```html\n"), ExtractionResult::NoCandidateYet);
    assert_eq!(
        extractor.extract("Let me think about the layout"),
        ExtractionResult::NoCandidateYet
    );
}

#[test]
fn chinese_lead_in_is_stripped() {
    assert_eq!(
        candidate("好的，这是页面：\n<div>内容</div>").as_deref(),
        Some("<div>内容</div>")
    );
}

#[test]
fn root_tag_inside_prose_starts_the_candidate() {
    assert_eq!(
        candidate("The result <style>p{}</style><div>x</div>").as_deref(),
        Some("<style>p{}</style><div>x</div>")
    );
}

#[test]
fn extraction_is_pure() {
    let extractor = HtmlExtractor::default();
    let text = "Okay.\n```html\n<section><p>one</p>\n";
    assert_eq!(extractor.extract(text), extractor.extract(text));
}
