//! Built-in markdown converter backed by `pulldown-cmark`.

use super::{ConvertError, ConvertInput, Converter};
use crate::types::Dialect;
use async_trait::async_trait;
use pulldown_cmark::{Options, Parser, html};

pub struct MarkdownConverter {
    dialect: Dialect,
    extensions: Vec<String>,
}

impl MarkdownConverter {
    pub fn new() -> Self {
        Self {
            dialect: Dialect::markdown(),
            extensions: vec!["md".into(), "markdown".into()],
        }
    }
}

impl Default for MarkdownConverter {
    fn default() -> Self {
        Self::new()
    }
}

fn options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
}

/// Render markdown to an HTML fragment. Rejects malformed input.
pub fn render(text: &str) -> Result<String, ConvertError> {
    if let Some(line) = unclosed_fence(text) {
        return Err(ConvertError::Conversion(format!(
            "code fence opened on line {line} is never closed"
        )));
    }
    let parser = Parser::new_ext(text, options());
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, parser);
    Ok(out)
}

/// Line number (1-based) of a fenced code block that never closes.
///
/// CommonMark silently runs such a block to the end of the document, which
/// swallows the rest of the post; for a blog that is always an authoring
/// mistake.
fn unclosed_fence(text: &str) -> Option<usize> {
    let mut open: Option<(char, usize, usize)> = None;
    for (idx, line) in text.lines().enumerate() {
        let indent = line.len() - line.trim_start_matches(' ').len();
        if indent > 3 {
            continue;
        }
        let trimmed = &line[indent..];
        let Some(fence_char) = trimmed.chars().next().filter(|c| *c == '`' || *c == '~') else {
            continue;
        };
        let run = trimmed.chars().take_while(|c| *c == fence_char).count();
        if run < 3 {
            continue;
        }
        match open {
            None => open = Some((fence_char, run, idx + 1)),
            Some((c, len, _)) if c == fence_char && run >= len && trimmed[run..].trim().is_empty() => {
                open = None;
            }
            Some(_) => {}
        }
    }
    open.map(|(_, _, line)| line)
}

#[async_trait]
impl Converter for MarkdownConverter {
    fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn identity(&self) -> String {
        format!("markdown/pulldown-cmark-0.13/plume-{}", env!("CARGO_PKG_VERSION"))
    }

    async fn convert(&self, input: &ConvertInput) -> Result<String, ConvertError> {
        render(&input.text).map_err(|e| match e {
            ConvertError::Conversion(msg) => ConvertError::Conversion(format!("{}: {msg}", input.path)),
            other => other,
        })
    }
}
