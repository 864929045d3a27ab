//! Markdown to markup transform for markdown cells.
//!
//! Rendering is a stateless synchronous transform behind [`MarkupRenderer`],
//! so front ends can plug in their own renderer. The built-in
//! [`BasicMarkupRenderer`] renders CommonMark with `comrak`.

/// Converts markdown source into display markup.
pub trait MarkupRenderer: Send + Sync {
    fn render(&self, source: &str) -> String;
}

/// CommonMark renderer with the table, strikethrough and autolink
/// extensions.
///
/// Raw HTML in the source is escaped, never passed through, and links with
/// unsafe schemes lose their target.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMarkupRenderer;

impl MarkupRenderer for BasicMarkupRenderer {
    fn render(&self, source: &str) -> String {
        let mut options = comrak::Options::default();
        options.extension.table = true;
        options.extension.strikethrough = true;
        options.extension.autolink = true;
        options.render.escape = true;

        let html = comrak::markdown_to_html(source, &options);
        html.trim_end().to_string()
    }
}
