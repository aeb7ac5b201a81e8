//! Shared types used across all pipeline stages.

use crate::frontmatter::Metadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// A markup dialect, identified by its lowercase name (`markdown`, `asciidoc`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dialect(String);

impl Dialect {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn markdown() -> Self {
        Self::new("markdown")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source document discovered by the content reader.
///
/// Identity is the root-relative, `/`-separated `path`. A document is
/// immutable for the duration of a build.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: String,
    /// Raw bytes as read from disk, front matter included.
    pub content: Vec<u8>,
    pub dialect: Dialect,
    pub metadata: Metadata,
    pub modified: SystemTime,
    /// Byte offset where the body starts (0 when there is no front matter).
    pub body_offset: usize,
    /// Set when the front matter block could not be parsed. The document is
    /// still part of the build so dependents are reported as skipped.
    pub front_matter_error: Option<String>,
}

impl Document {
    /// The body text after front matter. Invalid UTF-8 is replaced lossily;
    /// converters that care check [`Document::is_valid_utf8`].
    pub fn body(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content[self.body_offset.min(self.content.len())..])
    }

    pub fn is_valid_utf8(&self) -> bool {
        std::str::from_utf8(&self.content).is_ok()
    }

    /// Root-relative directory containing this document (`""` at the root).
    pub fn dir(&self) -> &str {
        self.path.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
    }

    /// Whether a page can be published for this document. A file name with
    /// nothing sluggable in it (`!!!.md`) and no `slug` override has none.
    pub fn has_slug(&self) -> bool {
        !self.metadata.slug.is_empty()
    }

    /// Public permalink: `/<slug>/`.
    pub fn permalink(&self) -> String {
        format!("/{}/", self.metadata.slug)
    }

    /// Output path of the rendered page inside the site tree.
    pub fn output_path(&self) -> String {
        format!("{}/index.html", self.metadata.slug)
    }
}
