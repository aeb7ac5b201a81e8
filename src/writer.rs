//! Atomic publication of the site tree.
//!
//! The published path is never written in place. Each build is staged into a
//! fresh directory next to it, and publishing is one `rename`:
//!
//! ```text
//! ./
//! ├── dist -> .dist.builds/3f9a0c1d2e4b5a69     # symlink, swapped by rename
//! └── .dist.builds/
//!     ├── 3f9a0c1d2e4b5a69/                     # current build
//!     └── .staging-XXXX/                        # in progress (deleted on drop)
//! ```
//!
//! On unix a new symlink is created beside the output path and renamed over
//! it, which replaces the old link atomically. Readers see either the old
//! tree or the new one, never a mix.
//!
//! Build directories are named by a digest of the tree, so rebuilding an
//! unchanged site is detected and reported as [`PublishOutcome::Unchanged`].
//!
//! ## Non-atomic swaps
//!
//! A rename cannot replace a non-empty directory, so two cases take two
//! renames (old tree aside, new tree in) and the output path is briefly
//! absent between them:
//!
//! - on unix, the one-time migration of a real directory left at the output
//!   path by an older layout; every later publish is a link swap;
//! - on other platforms, every publish.
//!
//! Everything that can fail is prepared before the first rename, and a
//! failed second rename moves the old tree back.

use crate::assemble::SiteTree;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid output path {0}")]
    InvalidPath(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A new tree is live; `build` is the directory it lives in.
    Published { build: PathBuf, files: usize },
    /// The live tree already has identical content.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    output: PathBuf,
    parent: PathBuf,
    name: String,
    builds: PathBuf,
}

impl OutputWriter {
    pub fn new(output_dir: &Path) -> Result<Self, WriteError> {
        let name = output_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| WriteError::InvalidPath(output_dir.display().to_string()))?;
        let parent = match output_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let builds = parent.join(format!(".{name}.builds"));
        Ok(Self {
            output: output_dir.to_path_buf(),
            parent,
            name,
            builds,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Directory holding staged and published builds.
    pub fn builds_dir(&self) -> &Path {
        &self.builds
    }

    /// Write `tree` into a private staging directory. Nothing visible changes.
    pub fn stage(&self, tree: &SiteTree) -> Result<StagedOutput, WriteError> {
        let digest = tree_digest(tree);
        if self.current_build().as_deref() == Some(digest.as_str()) {
            tracing::debug!(%digest, "site tree unchanged");
            return Ok(StagedOutput {
                writer: self.clone(),
                digest,
                staging: None,
                files: tree.len(),
            });
        }

        fs::create_dir_all(&self.builds).map_err(io_err(&self.builds))?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.builds)
            .map_err(io_err(&self.builds))?;

        for (rel, bytes) in tree {
            if rel.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
                return Err(WriteError::InvalidPath(rel.clone()));
            }
            let path = staging.path().join(rel);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).map_err(io_err(dir))?;
            }
            fs::write(&path, bytes).map_err(io_err(&path))?;
        }
        tracing::debug!(%digest, files = tree.len(), "staged site tree");

        Ok(StagedOutput {
            writer: self.clone(),
            digest,
            staging: Some(staging),
            files: tree.len(),
        })
    }

    /// Digest of the live build, when the output path is one of our links.
    fn current_build(&self) -> Option<String> {
        let link = fs::read_link(&self.output).ok()?;
        let resolved = self.parent.join(&link);
        let digest = resolved.file_name()?.to_string_lossy().into_owned();
        (resolved.parent() == Some(self.builds.as_path()) && resolved.is_dir()).then_some(digest)
    }

    #[cfg(unix)]
    fn publish(&self, staging: TempDir, digest: &str) -> Result<PathBuf, WriteError> {
        let target = self.builds.join(digest);
        if target.is_dir() {
            // Same content built before; the staged copy is redundant.
            drop(staging);
        } else {
            let staged = staging.keep();
            fs::rename(&staged, &target).map_err(io_err(&target))?;
        }

        let relative = Path::new(&format!(".{}.builds", self.name)).join(digest);
        let tmp_link = self.parent.join(format!(".{}.link-{}", self.name, std::process::id()));
        let _ = fs::remove_file(&tmp_link);
        std::os::unix::fs::symlink(&relative, &tmp_link).map_err(io_err(&tmp_link))?;

        let aside = match self.move_legacy_dir(digest) {
            Ok(aside) => aside,
            Err(e) => {
                let _ = fs::remove_file(&tmp_link);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp_link, &self.output) {
            let _ = fs::remove_file(&tmp_link);
            if let Some(aside) = &aside {
                restore(aside, &self.output);
            }
            return Err(io_err(&self.output)(e));
        }

        if let Some(aside) = aside {
            let _ = fs::remove_dir_all(aside);
        }
        Ok(target)
    }

    /// A real directory at the output path cannot be replaced by a rename of
    /// a symlink, so move it into the builds directory first. The output path
    /// is absent until the link is renamed in.
    #[cfg(unix)]
    fn move_legacy_dir(&self, digest: &str) -> Result<Option<PathBuf>, WriteError> {
        match fs::symlink_metadata(&self.output) {
            Ok(meta) if meta.is_dir() => {
                let aside = self.builds.join(format!(".legacy-{digest}"));
                tracing::info!(path = %self.output.display(), "moving legacy output directory aside");
                fs::rename(&self.output, &aside).map_err(io_err(&self.output))?;
                Ok(Some(aside))
            }
            _ => Ok(None),
        }
    }

    #[cfg(not(unix))]
    fn publish(&self, staging: TempDir, digest: &str) -> Result<PathBuf, WriteError> {
        let staged = staging.keep();
        let aside = self.builds.join(format!(".previous-{digest}"));
        let had_previous = self.output.exists();
        if had_previous {
            let _ = fs::remove_dir_all(&aside);
            fs::rename(&self.output, &aside).map_err(io_err(&self.output))?;
        }
        if let Err(e) = fs::rename(&staged, &self.output) {
            if had_previous {
                restore(&aside, &self.output);
            }
            let _ = fs::remove_dir_all(&staged);
            return Err(io_err(&self.output)(e));
        }
        if had_previous {
            let _ = fs::remove_dir_all(&aside);
        }
        Ok(self.output.clone())
    }

    /// Remove every build except `keep`. Staging dirs of other runs are left alone.
    fn prune(&self, keep: &str) {
        let Ok(entries) = fs::read_dir(&self.builds) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == keep || name.starts_with(".staging-") {
                continue;
            }
            let path = entry.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = removed {
                tracing::warn!(path = %path.display(), error = %e, "cannot remove superseded build");
            }
        }
    }
}

/// A fully written tree waiting to be published.
///
/// Dropping it without calling [`StagedOutput::commit`] deletes the staging
/// directory and leaves the published site untouched.
pub struct StagedOutput {
    writer: OutputWriter,
    digest: String,
    /// `None` when the live tree already matches.
    staging: Option<TempDir>,
    files: usize,
}

impl StagedOutput {
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn path(&self) -> Option<&Path> {
        self.staging.as_ref().map(TempDir::path)
    }

    /// Make the staged tree live with a single rename.
    pub fn commit(mut self) -> Result<PublishOutcome, WriteError> {
        let Some(staging) = self.staging.take() else {
            tracing::info!(digest = %self.digest, "output unchanged");
            return Ok(PublishOutcome::Unchanged);
        };
        let build = self.writer.publish(staging, &self.digest)?;
        self.writer.prune(&self.digest);
        tracing::info!(
            output = %self.writer.output.display(),
            digest = %self.digest,
            files = self.files,
            "published site"
        );
        Ok(PublishOutcome::Published {
            build,
            files: self.files,
        })
    }
}

/// Put a tree moved aside back at the output path after a failed swap.
fn restore(aside: &Path, output: &Path) {
    if let Err(e) = fs::rename(aside, output) {
        tracing::error!(
            aside = %aside.display(),
            output = %output.display(),
            error = %e,
            "cannot restore previous output"
        );
    }
}

/// Content digest of a site tree: paths and bytes, in path order.
pub fn tree_digest(tree: &SiteTree) -> String {
    let mut hasher = Sha256::new();
    for (path, bytes) in tree {
        hasher.update((path.len() as u64).to_le_bytes());
        hasher.update(path.as_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
