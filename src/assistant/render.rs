//! Markdown rendering and HTML sanitization for message display.
//!
//! Model output is untrusted: everything that reaches the UI goes through
//! [`sanitize_html`], which strips scripts, inline event handlers and
//! `javascript:` URIs.

use std::sync::LazyLock;

use ammonia::Builder;
use pulldown_cmark::{Options, Parser, html};

/// Glyph appended to the display text while a response is streaming.
pub const CURSOR_GLYPH: char = '█';

static SANITIZER: LazyLock<Builder<'static>> = LazyLock::new(|| {
    let mut builder = Builder::default();
    builder.link_rel(Some("noopener noreferrer"));
    builder
});

/// Convert markdown to (unsanitized) HTML.
#[must_use]
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Remove executable content from HTML.
#[must_use]
pub fn sanitize_html(html: &str) -> String {
    SANITIZER.clean(html).to_string()
}

/// Render markdown to sanitized HTML.
#[must_use]
pub fn render_markdown(markdown: &str) -> String {
    sanitize_html(&markdown_to_html(markdown))
}

/// Render an in-progress display text with the trailing cursor.
#[must_use]
pub fn render_streaming(display_text: &str) -> String {
    let mut text = String::with_capacity(display_text.len() + CURSOR_GLYPH.len_utf8());
    text.push_str(display_text);
    text.push(CURSOR_GLYPH);
    render_markdown(&text)
}

/// Render text typed by the user: escaped, with line breaks kept.
#[must_use]
pub fn render_user_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' => out.push_str("<br />"),
            '\r' => {}
            _ => out.push(ch),
        }
    }
    out
}
