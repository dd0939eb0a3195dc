use crate::sanitize::neutralize_style_close;
use crate::SanitizedDocument;

const BASE_STYLESHEET: &str = "\
* { box-sizing: border-box; }
body {
  margin: 0;
  padding: 24px;
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
  line-height: 1.6;
  color: #212529;
  background: #ffffff;
}";

/// Wraps sanitized output in the complete page shown on the render surface.
pub fn render_page(document: &SanitizedDocument) -> String {
    let mut page = String::with_capacity(
        BASE_STYLESHEET.len() + document.style_markup.len() + document.body_markup.len() + 256,
    );
    page.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    page.push_str("<meta charset=\"UTF-8\">\n");
    page.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n");
    page.push_str("<style>\n");
    page.push_str(BASE_STYLESHEET);
    page.push_str("\n</style>\n");
    if !document.style_markup.is_empty() {
        page.push_str("<style>\n");
        page.push_str(&neutralize_style_close(&document.style_markup));
        page.push_str("\n</style>\n");
    }
    page.push_str("</head>\n<body>");
    page.push_str(&document.body_markup);
    page.push_str("</body>\n</html>\n");
    page
}
