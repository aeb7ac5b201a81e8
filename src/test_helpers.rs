//! Shared test utilities for the plume test suite.
//!
//! Builds in-memory [`Document`]s and throwaway content trees so stage tests
//! can run without a fixtures directory.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = content_tree(&[
//!     ("a.md", "# A\n\n{{ include \"b.md\" }}"),
//!     ("b.md", "# B"),
//! ]);
//! let d = doc("a.md", "# A");
//! assert_eq!(d.metadata.title, "A");
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;
use tempfile::TempDir;

use crate::frontmatter;
use crate::source::ContentSource;
use crate::types::{Dialect, Document};

// =========================================================================
// Content trees
// =========================================================================

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// A temp directory populated with `files` (path, contents).
pub fn content_tree(files: &[(&str, &str)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for (rel, contents) in files {
        write_file(tmp.path(), rel, contents);
    }
    tmp
}

/// A content source over `root` that claims `.md` files.
pub fn markdown_source(root: &Path) -> ContentSource {
    let extensions = BTreeMap::from([("md".to_string(), Dialect::markdown())]);
    ContentSource::open(root, extensions, false).unwrap()
}

// =========================================================================
// Documents
// =========================================================================

/// A markdown document parsed the way the source reader would parse it.
pub fn doc(path: &str, content: &str) -> Document {
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parsed = frontmatter::parse(content, &stem);
    Document {
        path: path.to_string(),
        content: content.as_bytes().to_vec(),
        dialect: Dialect::markdown(),
        metadata: parsed.metadata,
        modified: SystemTime::now(),
        body_offset: parsed.body_offset,
        front_matter_error: parsed.error,
    }
}

/// Like [`doc`], with tags set directly instead of through front matter.
pub fn doc_with_tags(path: &str, content: &str, tags: &[&str]) -> Document {
    let mut d = doc(path, content);
    d.metadata.tags = tags.iter().map(|t| t.to_string()).collect();
    d.metadata.tags.sort();
    d.metadata.tags.dedup();
    d
}
