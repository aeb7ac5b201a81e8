//! Content source reader.
//!
//! Stage 1 of the build. Enumerates source documents under a content root,
//! lazily: each file is read only when the iterator reaches it, and calling
//! [`ContentSource::documents`] again restarts the walk from scratch.
//!
//! ## Directory Structure
//!
//! ```text
//! content/
//! ├── config.toml                    # Site configuration (optional)
//! ├── assets/                        # Copied verbatim to dist/assets/
//! │   └── style.css
//! ├── _partials/                     # Includable, never rendered on its own
//! │   └── footer.html
//! ├── 2024-05-01-fibers.md           # Post (date prefix → publish date)
//! ├── runtime/
//! │   ├── 010-actors.md              # Post (number prefix stripped from slug)
//! │   └── diagrams/mailbox.svg       # Referenced via {{ diagram "..." }}
//! └── sandboxing.adoc                # AsciiDoc post
//! ```
//!
//! Hidden entries, `_`-prefixed directories, the root `assets/` directory and
//! files whose extension no converter claims are skipped.

use crate::frontmatter;
use crate::types::{Dialect, Document};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("content root not found: {0}")]
    RootMissing(PathBuf),
    #[error("content root is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Name of the root-level directory copied verbatim to the output.
pub const ASSETS_DIR: &str = "assets";

/// A content root plus the extension → dialect allowlist.
#[derive(Debug, Clone)]
pub struct ContentSource {
    root: PathBuf,
    extensions: BTreeMap<String, Dialect>,
    include_drafts: bool,
}

impl ContentSource {
    /// Open a content root. Fails if the root is missing or unreadable.
    pub fn open(
        root: &Path,
        extensions: BTreeMap<String, Dialect>,
        include_drafts: bool,
    ) -> Result<Self, ScanError> {
        let meta = fs::metadata(root).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanError::RootMissing(root.to_path_buf())
            } else {
                ScanError::Io {
                    path: root.to_path_buf(),
                    source: e,
                }
            }
        })?;
        if !meta.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }
        // Probe readability up front so an unreadable root fails before the build.
        fs::read_dir(root).map_err(|e| ScanError::Io {
            path: root.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            extensions: extensions
                .into_iter()
                .map(|(ext, d)| (ext.to_ascii_lowercase(), d))
                .collect(),
            include_drafts,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazy sequence of documents in path order.
    pub fn documents(&self) -> Documents<'_> {
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Documents {
            source: self,
            walker,
        }
    }

    /// Files under `<root>/assets/`, as `(relative path inside assets, absolute path)`.
    pub fn static_assets(&self) -> Result<Vec<(String, PathBuf)>, ScanError> {
        let dir = self.root.join(ASSETS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut assets = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || is_hidden(entry.file_name()) {
                continue;
            }
            let rel = to_slash_path(entry.path().strip_prefix(&dir).unwrap_or(entry.path()));
            assets.push((rel, entry.into_path()));
        }
        Ok(assets)
    }

    /// Whether the reader would treat the root-relative path `rel` as a
    /// document, whether or not it was actually produced (drafts are not).
    pub fn claims(&self, rel: &str) -> bool {
        let mut parts: Vec<&str> = rel.split('/').collect();
        let Some(name) = parts.pop() else {
            return false;
        };
        if parts.first() == Some(&ASSETS_DIR)
            || parts.iter().any(|d| d.starts_with('.') || d.starts_with('_'))
            || name.starts_with('.')
            || name == "config.toml"
        {
            return false;
        }
        self.dialect_for(Path::new(name)).is_some()
    }

    fn dialect_for(&self, path: &Path) -> Option<&Dialect> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        self.extensions.get(&ext)
    }

    fn read_document(&self, path: &Path) -> Result<Option<Document>, ScanError> {
        let io_err = |e| ScanError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let Some(dialect) = self.dialect_for(path) else {
            return Ok(None);
        };
        let content = fs::read(path).map_err(io_err)?;
        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(io_err)?;
        let rel = to_slash_path(path.strip_prefix(&self.root).unwrap_or(path));
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let text = String::from_utf8_lossy(&content);
        let parsed = frontmatter::parse(&text, &stem);
        if parsed.metadata.draft && !self.include_drafts {
            tracing::debug!(path = %rel, "skipping draft");
            return Ok(None);
        }
        // Offsets into the lossy string only match raw bytes for valid UTF-8;
        // invalid documents are rejected by their converter anyway.
        let body_offset = if text.len() == content.len() {
            parsed.body_offset
        } else {
            0
        };
        let dialect = parsed
            .metadata
            .dialect
            .clone()
            .unwrap_or_else(|| dialect.clone());

        Ok(Some(Document {
            path: rel,
            content,
            dialect,
            metadata: parsed.metadata,
            modified,
            body_offset,
            front_matter_error: parsed.error,
        }))
    }
}

/// Iterator returned by [`ContentSource::documents`].
pub struct Documents<'a> {
    source: &'a ContentSource,
    walker: walkdir::IntoIter,
}

impl Iterator for Documents<'_> {
    type Item = Result<Document, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(ScanError::Walk(e))),
            };
            if entry.depth() == 0 {
                continue;
            }
            let name = entry.file_name();
            if entry.file_type().is_dir() {
                let skip = is_hidden(name)
                    || name.to_string_lossy().starts_with('_')
                    || (entry.depth() == 1 && name == ASSETS_DIR);
                if skip {
                    self.walker.skip_current_dir();
                }
                continue;
            }
            if !entry.file_type().is_file() || is_hidden(name) || name == "config.toml" {
                continue;
            }
            match self.source.read_document(entry.path()) {
                Ok(Some(doc)) => return Some(Ok(doc)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
