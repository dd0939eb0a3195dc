/// Template used when the host supplies none.
pub const DEFAULT_TEMPLATE: &str = "\
You are a visual designer. Turn the page text below into one self-contained, \
well-styled HTML card that summarizes it clearly.

Rules:
- Reply with a single ```html code block and nothing else.
- Put all CSS in one <style> element; do not use JavaScript, forms, or iframes.
- Keep the original language of the content.

Title: {{title}}

Content:
{{content}}
";

/// Replaces every `{{name}}` placeholder with its value. Unknown placeholders
/// are left in place.
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = after_open[..close].trim();
        match vars.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }
    out.push_str(rest);
    out
}
