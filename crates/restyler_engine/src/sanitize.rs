use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::{ElementRef, Html};

/// Element used in place of a disallowed element whose content is kept.
const NEUTRAL_CONTAINER: &str = "span";
const WILDCARD: &str = "*";
const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";
/// Parents whose content model forbids a neutral container; disallowed
/// elements there are dropped so a reparse keeps the table intact.
const TABLE_CONTEXT: &[&str] = &["table", "thead", "tbody", "tfoot", "tr", "colgroup"];
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Whitelist configuration shared read-only by every sanitize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizationPolicy {
    pub allowed_elements: HashSet<String>,
    /// Per-element allowed attributes; the `"*"` entry applies to every element.
    pub allowed_attributes: HashMap<String, HashSet<String>>,
    /// Attribute names removed from every element.
    pub denied_attributes: HashSet<String>,
    /// Attribute name prefixes removed from every element (event handlers).
    pub denied_attribute_prefixes: Vec<String>,
    /// Elements removed together with their whole subtree.
    pub dropped_elements: HashSet<String>,
    /// Attributes whose values are checked against `denied_schemes`.
    pub uri_attributes: HashSet<String>,
    /// Lower-case value prefixes that make a URI attribute unsafe.
    pub denied_schemes: Vec<String>,
}

fn set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl Default for SanitizationPolicy {
    fn default() -> Self {
        let allowed_elements = set(&[
            "div", "span", "p", "br", "hr", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol",
            "li", "dl", "dt", "dd", "table", "thead", "tbody", "tfoot", "tr", "th", "td",
            "blockquote", "pre", "code", "strong", "b", "em", "i", "u", "s", "del", "ins",
            "mark", "a", "img", "figure", "figcaption", "article", "section", "header",
            "footer", "main", "aside", "nav",
        ]);
        let allowed_attributes = HashMap::from([
            (WILDCARD.to_string(), set(&["class", "id", "style"])),
            ("a".to_string(), set(&["href", "title", "target", "rel"])),
            (
                "img".to_string(),
                set(&["src", "alt", "width", "height", "loading"]),
            ),
            ("td".to_string(), set(&["colspan", "rowspan"])),
            ("th".to_string(), set(&["colspan", "rowspan", "scope"])),
        ]);
        let denied_attributes = set(&[
            "onclick",
            "onerror",
            "onload",
            "onmouseover",
            "onfocus",
            "onblur",
            "onsubmit",
            "onreset",
            "onchange",
            "oninput",
            "onkeydown",
            "onkeyup",
        ]);
        Self {
            allowed_elements,
            allowed_attributes,
            denied_attributes,
            denied_attribute_prefixes: vec!["on".to_string()],
            dropped_elements: set(&[
                "script", "iframe", "object", "embed", "form", "input", "button",
            ]),
            uri_attributes: set(&["href", "src"]),
            denied_schemes: vec![
                "javascript:".to_string(),
                "vbscript:".to_string(),
                "data:text/html".to_string(),
            ],
        }
    }
}

impl SanitizationPolicy {
    pub fn allows_element(&self, name: &str) -> bool {
        self.allowed_elements.contains(name)
    }

    pub fn drops_element(&self, name: &str) -> bool {
        self.dropped_elements.contains(name)
    }

    pub fn is_denied_attribute(&self, name: &str) -> bool {
        self.denied_attributes.contains(name)
            || self
                .denied_attribute_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
    }

    pub fn allows_attribute(&self, element: &str, name: &str) -> bool {
        [element, WILDCARD].iter().any(|key| {
            self.allowed_attributes
                .get(*key)
                .is_some_and(|names| names.contains(name))
        })
    }

    /// Compares after lower-casing and dropping whitespace and control
    /// characters, which browsers ignore inside a scheme.
    pub fn has_denied_scheme(&self, value: &str) -> bool {
        let normalized: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .flat_map(char::to_lowercase)
            .collect();
        self.denied_schemes
            .iter()
            .any(|scheme| normalized.starts_with(scheme.as_str()))
    }

    fn keeps_attribute(&self, element: &str, name: &str, value: &str) -> bool {
        if self.is_denied_attribute(name) || !self.allows_attribute(element, name) {
            return false;
        }
        !(self.uri_attributes.contains(name) && self.has_denied_scheme(value))
    }
}

/// Safe-to-render output of one sanitize call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SanitizedDocument {
    /// Bodies of every `<style>` element, in document order.
    pub style_markup: String,
    /// Whitelisted body fragment.
    pub body_markup: String,
}

impl SanitizedDocument {
    pub fn is_empty(&self) -> bool {
        self.style_markup.is_empty() && self.body_markup.is_empty()
    }

    /// Fragment form: a single `<style>` element (when any CSS exists) followed by the body.
    pub fn compose(&self) -> String {
        if self.style_markup.is_empty() {
            return self.body_markup.clone();
        }
        format!(
            "<style>{}</style>{}",
            neutralize_style_close(&self.style_markup),
            self.body_markup
        )
    }
}

/// Sanitizer bound to one shared policy.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    policy: Arc<SanitizationPolicy>,
}

impl Sanitizer {
    pub fn new(policy: Arc<SanitizationPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SanitizationPolicy {
        &self.policy
    }

    pub fn sanitize(&self, candidate: &str) -> SanitizedDocument {
        sanitize(candidate, &self.policy)
    }
}

enum Step<'a> {
    Visit(NodeRef<'a, Node>),
    Close(String),
}

/// Never fails: input the parser cannot make sense of yields an empty document.
pub fn sanitize(candidate: &str, policy: &SanitizationPolicy) -> SanitizedDocument {
    if candidate.trim().is_empty() {
        return SanitizedDocument::default();
    }
    let document = Html::parse_document(candidate);

    let style_markup = document
        .tree
        .root()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|element| is_html_style(element))
        .map(|element| neutralize_style_close(&element.text().collect::<String>()))
        .collect::<Vec<_>>()
        .join("\n");

    let Some(body) = document
        .root_element()
        .children()
        .filter_map(ElementRef::wrap)
        .find(|element| element.value().name() == "body")
    else {
        return SanitizedDocument {
            style_markup,
            body_markup: String::new(),
        };
    };

    let mut out = String::with_capacity(candidate.len());
    let mut stack: Vec<Step> = Vec::new();
    push_children(&mut stack, *body);

    while let Some(step) = stack.pop() {
        let node = match step {
            Step::Close(name) => {
                out.push_str("</");
                out.push_str(&name);
                out.push('>');
                continue;
            }
            Step::Visit(node) => node,
        };
        match node.value() {
            Node::Text(text) => escape_text(text, &mut out),
            Node::Element(element) => {
                let name = element.name().to_ascii_lowercase();
                if name == "style" || policy.drops_element(&name) {
                    continue;
                }
                if !policy.allows_element(&name) {
                    if in_table_context(node) {
                        continue;
                    }
                    out.push('<');
                    out.push_str(NEUTRAL_CONTAINER);
                    out.push('>');
                    stack.push(Step::Close(NEUTRAL_CONTAINER.to_string()));
                    push_children(&mut stack, node);
                    continue;
                }
                out.push('<');
                out.push_str(&name);
                for (attr, value) in element.attrs() {
                    let attr = attr.to_ascii_lowercase();
                    if policy.keeps_attribute(&name, &attr, value) {
                        out.push(' ');
                        out.push_str(&attr);
                        out.push_str("=\"");
                        escape_attribute(value, &mut out);
                        out.push('"');
                    }
                }
                out.push('>');
                if name == "pre" && starts_with_newline(node) {
                    // The parser eats one newline right after `<pre>`.
                    out.push('\n');
                }
                if !VOID_ELEMENTS.contains(&name.as_str()) {
                    stack.push(Step::Close(name));
                    push_children(&mut stack, node);
                }
            }
            // Comments, doctypes and processing instructions never survive.
            _ => {}
        }
    }

    SanitizedDocument {
        style_markup,
        body_markup: out.trim().to_string(),
    }
}

/// SVG and MathML `<style>` are not raw text, so their decoded text could
/// carry markup; only HTML style sheets are kept.
fn is_html_style(element: &ElementRef) -> bool {
    let name = &element.value().name;
    (*name.local).eq_ignore_ascii_case("style") && &*name.ns == HTML_NAMESPACE
}

/// Escapes every `</style` so collected CSS cannot close the element it is
/// composed into.
pub(crate) fn neutralize_style_close(css: &str) -> String {
    const CLOSE: &str = "</style";
    let lowered = css.to_ascii_lowercase();
    let mut out = String::with_capacity(css.len());
    let mut last = 0;
    for (idx, _) in lowered.match_indices(CLOSE) {
        out.push_str(&css[last..idx]);
        out.push_str("<\\/");
        last = idx + 2;
    }
    out.push_str(&css[last..]);
    out
}

fn in_table_context(node: NodeRef<'_, Node>) -> bool {
    node.parent()
        .and_then(|parent| parent.value().as_element().map(|element| element.name()))
        .is_some_and(|parent| {
            TABLE_CONTEXT
                .iter()
                .any(|name| parent.eq_ignore_ascii_case(name))
        })
}

fn starts_with_newline(node: NodeRef<'_, Node>) -> bool {
    node.first_child()
        .and_then(|child| child.value().as_text().map(|text| text.starts_with('\n')))
        .unwrap_or(false)
}

fn push_children<'a>(stack: &mut Vec<Step<'a>>, node: NodeRef<'a, Node>) {
    let children: Vec<_> = node.children().collect();
    stack.extend(children.into_iter().rev().map(Step::Visit));
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
