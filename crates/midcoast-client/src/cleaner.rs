use std::sync::Arc;

use htmd::HtmlToMarkdown;
use midcoast_core::error::AppError;
use midcoast_core::traits::Cleaner;

/// Turns the `div.notice-body` markup of a county foreclosure notice into
/// plain text for the date extractor.
///
/// Registry notices wrap the sale terms in headings, `<strong>` runs and
/// paragraph breaks. htmd renders those as Markdown; the markers are then
/// stripped and blank lines dropped so that phrases like "sold at public
/// auction on" reach the extractor unbroken. Page chrome is skipped.
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for HtmdCleaner {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form", "button",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner for HtmdCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map(|markdown| plain_text(&markdown))
            .map_err(|e| AppError::ParseError(format!("Failed to clean notice HTML: {e}")))
    }
}

fn plain_text(markdown: &str) -> String {
    markdown
        .lines()
        .map(|line| line.trim_start_matches('#').replace("**", "").replace("__", ""))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
