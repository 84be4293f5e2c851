//! Markdown rendering for chat bubbles.

use pulldown_cmark::{html, Options, Parser};

/// Render chat text as sanitized HTML. Raw HTML in the input is kept only
/// where the sanitizer allows it, so scripts and event handlers never reach
/// the page.
pub fn render(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(text, options);
    let mut unsafe_html = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut unsafe_html, parser);

    ammonia::clean(&unsafe_html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emphasis_and_code_become_html() {
        let html = render("Run ended with status: **failed**. See `last_error`.");

        assert!(html.contains("<strong>failed</strong>"));
        assert!(html.contains("<code>last_error</code>"));
    }

    #[test]
    fn lists_and_headings_render() {
        let html = render("# Steps\n\n- raise\n- approve\n");

        assert!(html.contains("<h1>Steps</h1>"));
        assert!(html.contains("<li>approve</li>"));
    }

    #[test]
    fn scripts_and_handlers_are_stripped() {
        let html = render("hi <script>alert(1)</script><img src=x onerror=alert(2)>");

        assert!(!html.contains("<script"));
        assert!(!html.contains("onerror"));
        assert!(html.contains("hi"));
    }

    #[test]
    fn plain_text_is_escaped() {
        let html = render("a < b & c");
        assert!(html.contains("a &lt; b &amp; c"));
    }
}
