//! Content-addressed artifact cache for incremental builds.
//!
//! Converting a document is the expensive step of the pipeline: an external
//! converter can take seconds per post. This module lets the orchestrator
//! skip conversion when nothing that affects the fragment has changed since
//! the last build.
//!
//! # Design
//!
//! ## Keys
//!
//! The cache is keyed by [`Fingerprint`] only. Paths, slugs and mtimes are
//! not part of the key, so renaming or moving a post is free; only an actual
//! change to its content, metadata, converter or dependencies produces a new
//! key. Two documents with identical inputs share one artifact.
//!
//! ## Single flight
//!
//! For any one fingerprint at most one conversion runs at a time. The first
//! caller installs a [`Shared`] future in the in-flight table; every later
//! caller clones it and awaits the same result. Lookup order is
//! memory → disk → build. A failed build is never stored, so the next
//! request for that fingerprint retries.
//!
//! ## Storage
//!
//! ```text
//! <cache_dir>/
//!   v1/
//!     index.json                       # LRU bookkeeping
//!     objects/<fp[0..2]>/<fp>.json     # one artifact per file
//! ```
//!
//! Every write goes through a temp file and a rename. An object that fails to
//! parse, carries the wrong version or fingerprint, or whose checksum does not
//! match its HTML is logged, deleted and treated as a miss. Directories for
//! other format versions are removed on open.
//!
//! ## Eviction
//!
//! Recency is a logical clock persisted in the index, not wall time, so it
//! survives clock skew and `git checkout`. [`BuildCache::evict`] drops the
//! least-recently-used entries until the store fits in `max_bytes`, never
//! touching the fingerprints of the current build.
//!
//! ## Bypassing the cache
//!
//! `--no-cache` opens the cache with disk reads disabled. Every document is
//! converted, and the fresh artifacts are still written for the next run.

use crate::convert::ConvertError;
use crate::fingerprint::Fingerprint;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Version of the on-disk format. Bump to invalidate every existing cache.
pub const FORMAT_VERSION: u32 = 1;

const INDEX_FILENAME: &str = "index.json";
const OBJECTS_DIR: &str = "objects";

/// A converted fragment, ready for assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub fingerprint: Fingerprint,
    pub html: String,
    /// Identity of the converter that produced `html`.
    pub converter: String,
    /// Cross-references whose placeholder tokens remain in `html`.
    pub refs: Vec<RefPlaceholder>,
}

/// An unresolved `ref` left in a fragment for the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefPlaceholder {
    pub token: String,
    /// Target as written.
    pub target: String,
    /// Source path of the document the ref was written in, when it arrived
    /// through an include. `None` means the artifact's own document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// How a [`BuildCache::get_or_build`] call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetOutcome {
    /// Served from memory, disk, or another caller's in-flight build.
    Hit,
    /// This caller ran the build function.
    Built,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredObject {
    version: u32,
    fingerprint: Fingerprint,
    /// SHA-256 hex of `artifact.html`.
    checksum: String,
    artifact: Artifact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct IndexEntry {
    size: u64,
    last_used: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Index {
    version: u32,
    clock: u64,
    entries: BTreeMap<Fingerprint, IndexEntry>,
}

impl Index {
    fn empty() -> Self {
        Self {
            version: FORMAT_VERSION,
            clock: 0,
            entries: BTreeMap::new(),
        }
    }

    fn touch(&mut self, fingerprint: Fingerprint, size: Option<u64>) {
        self.clock += 1;
        let clock = self.clock;
        match (self.entries.get_mut(&fingerprint), size) {
            (Some(entry), size) => {
                entry.last_used = clock;
                if let Some(size) = size {
                    entry.size = size;
                }
            }
            (None, Some(size)) => {
                self.entries.insert(
                    fingerprint,
                    IndexEntry {
                        size,
                        last_used: clock,
                    },
                );
            }
            (None, None) => {}
        }
    }

    fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}

type BuildResult = Result<(Arc<Artifact>, GetOutcome), ConvertError>;
type InFlight = Shared<BoxFuture<'static, BuildResult>>;

#[derive(Default)]
struct State {
    memory: HashMap<Fingerprint, Arc<Artifact>>,
    in_flight: HashMap<Fingerprint, InFlight>,
}

/// Summary of cache performance for a build run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} converted ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} converted", self.misses)
        }
    }
}

/// Result of an eviction pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub removed: usize,
    pub freed_bytes: u64,
}

/// Size of the persistent store, for `plume cache-stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub entries: usize,
    pub bytes: u64,
    pub max_bytes: u64,
}

pub struct BuildCache {
    root: PathBuf,
    max_bytes: u64,
    read_disk: bool,
    state: Mutex<State>,
    index: Mutex<Index>,
    stats: Mutex<CacheStats>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BuildCache {
    /// Open (or create) the store under `dir`.
    pub fn open(dir: &Path, max_bytes: u64) -> Result<Self, CacheError> {
        Self::open_with(dir, max_bytes, true)
    }

    /// Open with disk reads disabled (`--no-cache`). Artifacts are still stored.
    pub fn open_fresh(dir: &Path, max_bytes: u64) -> Result<Self, CacheError> {
        Self::open_with(dir, max_bytes, false)
    }

    fn open_with(dir: &Path, max_bytes: u64, read_disk: bool) -> Result<Self, CacheError> {
        let root = dir.join(format!("v{FORMAT_VERSION}"));
        std::fs::create_dir_all(root.join(OBJECTS_DIR)).map_err(io_err(&root))?;
        remove_other_versions(dir);
        let index = load_index(&root);
        Ok(Self {
            root,
            max_bytes,
            read_disk,
            state: Mutex::new(State::default()),
            index: Mutex::new(index),
            stats: Mutex::new(CacheStats::default()),
        })
    }

    /// Return the artifact for `fingerprint`, running `build` only if no
    /// cached copy exists and no other caller is already building it.
    ///
    /// `build` is called at most once per call and only by the first caller;
    /// the future it returns owns any timeout or cancellation.
    pub async fn get_or_build<F, Fut>(
        self: &Arc<Self>,
        fingerprint: Fingerprint,
        build: F,
    ) -> Result<(Arc<Artifact>, GetOutcome), ConvertError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Artifact, ConvertError>> + Send + 'static,
    {
        let (shared, leader) = {
            let mut state = lock(&self.state);
            if let Some(artifact) = state.memory.get(&fingerprint).cloned() {
                drop(state);
                lock(&self.index).touch(fingerprint, None);
                self.record(GetOutcome::Hit);
                tracing::debug!(fingerprint = %fingerprint.short(), "cache hit (memory)");
                return Ok((artifact, GetOutcome::Hit));
            }
            match state.in_flight.get(&fingerprint) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let cache = Arc::clone(self);
                    let pending = build();
                    let shared = async move { cache.resolve(fingerprint, pending).await }
                        .boxed()
                        .shared();
                    state.in_flight.insert(fingerprint, shared.clone());
                    (shared, true)
                }
            }
        };

        let (artifact, outcome) = shared.await?;
        let outcome = if leader { outcome } else { GetOutcome::Hit };
        self.record(outcome);
        Ok((artifact, outcome))
    }

    async fn resolve(
        self: Arc<Self>,
        fingerprint: Fingerprint,
        pending: impl Future<Output = Result<Artifact, ConvertError>>,
    ) -> BuildResult {
        let result = match self.load(fingerprint) {
            Some(artifact) => {
                tracing::debug!(fingerprint = %fingerprint.short(), "cache hit (disk)");
                Ok((Arc::new(artifact), GetOutcome::Hit))
            }
            None => {
                tracing::debug!(fingerprint = %fingerprint.short(), "cache miss");
                pending.await.map(|artifact| {
                    if let Err(e) = self.store(&artifact) {
                        tracing::warn!(fingerprint = %fingerprint.short(), error = %e, "failed to persist artifact");
                    }
                    (Arc::new(artifact), GetOutcome::Built)
                })
            }
        };
        let mut state = lock(&self.state);
        if let Ok((artifact, _)) = &result {
            state.memory.insert(fingerprint, Arc::clone(artifact));
        }
        state.in_flight.remove(&fingerprint);
        result
    }

    fn record(&self, outcome: GetOutcome) {
        let mut stats = lock(&self.stats);
        match outcome {
            GetOutcome::Hit => stats.hits += 1,
            GetOutcome::Built => stats.misses += 1,
        }
    }

    fn object_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let hex = fingerprint.to_hex();
        self.root
            .join(OBJECTS_DIR)
            .join(&hex[..2])
            .join(format!("{hex}.json"))
    }

    /// Read and verify a stored artifact. Anything wrong with it is a miss.
    fn load(&self, fingerprint: Fingerprint) -> Option<Artifact> {
        if !self.read_disk {
            return None;
        }
        let path = self.object_path(&fingerprint);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable cache entry");
                return None;
            }
        };
        match verify(&bytes, fingerprint) {
            Ok(artifact) => {
                lock(&self.index).touch(fingerprint, Some(bytes.len() as u64));
                Some(artifact)
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "discarding corrupt cache entry");
                let _ = std::fs::remove_file(&path);
                lock(&self.index).entries.remove(&fingerprint);
                None
            }
        }
    }

    fn store(&self, artifact: &Artifact) -> Result<(), CacheError> {
        let object = StoredObject {
            version: FORMAT_VERSION,
            fingerprint: artifact.fingerprint,
            checksum: checksum(&artifact.html),
            artifact: artifact.clone(),
        };
        let json = serde_json::to_vec(&object)?;
        let path = self.object_path(&artifact.fingerprint);
        write_atomic(&path, &json)?;
        lock(&self.index).touch(artifact.fingerprint, Some(json.len() as u64));
        Ok(())
    }

    /// Drop least-recently-used entries until the store fits in `max_bytes`.
    pub fn evict(&self, pinned: &HashSet<Fingerprint>) -> Eviction {
        let mut index = lock(&self.index);
        let mut total = index.total_bytes();
        let mut report = Eviction::default();
        if total <= self.max_bytes {
            return report;
        }
        let mut candidates: Vec<(u64, Fingerprint, u64)> = index
            .entries
            .iter()
            .filter(|(fp, _)| !pinned.contains(fp))
            .map(|(fp, e)| (e.last_used, *fp, e.size))
            .collect();
        candidates.sort();
        for (_, fp, size) in candidates {
            if total <= self.max_bytes {
                break;
            }
            let path = self.object_path(&fp);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot evict cache entry");
                    continue;
                }
            }
            index.entries.remove(&fp);
            total -= size;
            report.removed += 1;
            report.freed_bytes += size;
        }
        if report.removed > 0 {
            tracing::info!(
                removed = report.removed,
                freed_bytes = report.freed_bytes,
                "evicted cache entries"
            );
        }
        report
    }

    /// Persist the index.
    pub fn flush(&self) -> Result<(), CacheError> {
        let json = {
            let index = lock(&self.index);
            serde_json::to_vec_pretty(&*index)?
        };
        write_atomic(&self.root.join(INDEX_FILENAME), &json)
    }

    pub fn stats(&self) -> CacheStats {
        *lock(&self.stats)
    }

    pub fn usage(&self) -> Usage {
        let index = lock(&self.index);
        Usage {
            entries: index.entries.len(),
            bytes: index.total_bytes(),
            max_bytes: self.max_bytes,
        }
    }

    /// Usage of the store under `dir` without opening it. Creates nothing and
    /// leaves other format versions alone.
    pub fn usage_on_disk(dir: &Path, max_bytes: u64) -> Usage {
        let index = load_index(&store_path(dir));
        Usage {
            entries: index.entries.len(),
            bytes: index.total_bytes(),
            max_bytes,
        }
    }

    /// Whether an artifact for `fingerprint` is known without building it.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        lock(&self.state).memory.contains_key(fingerprint)
            || (self.read_disk && lock(&self.index).entries.contains_key(fingerprint))
    }
}

fn checksum(html: &str) -> String {
    format!("{:x}", Sha256::digest(html.as_bytes()))
}

fn verify(bytes: &[u8], expected: Fingerprint) -> Result<Artifact, String> {
    let object: StoredObject = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if object.version != FORMAT_VERSION {
        return Err(format!("format version {}", object.version));
    }
    if object.fingerprint != expected || object.artifact.fingerprint != expected {
        return Err("fingerprint mismatch".into());
    }
    if object.checksum != checksum(&object.artifact.html) {
        return Err("checksum mismatch".into());
    }
    Ok(object.artifact)
}

fn load_index(root: &Path) -> Index {
    let path = root.join(INDEX_FILENAME);
    let content = match std::fs::read(&path) {
        Ok(c) => c,
        Err(_) => return Index::empty(),
    };
    match serde_json::from_slice::<Index>(&content) {
        Ok(index) if index.version == FORMAT_VERSION => index,
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable cache index");
            Index::empty()
        }
    }
}

fn remove_other_versions(dir: &Path) {
    let current = format!("v{FORMAT_VERSION}");
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_version = name
            .strip_prefix('v')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
        if is_version && name != current && entry.path().is_dir() {
            tracing::info!(version = %name, "removing stale cache format");
            let _ = std::fs::remove_dir_all(entry.path());
        }
    }
}

/// Write `bytes` to a temp file beside `path`, then rename it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err(parent))?;
    tmp.write_all(bytes).map_err(io_err(path))?;
    tmp.persist(path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Resolve the versioned store directory for a cache dir.
pub fn store_path(dir: &Path) -> PathBuf {
    dir.join(format!("v{FORMAT_VERSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::combine;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn fp(n: u8) -> Fingerprint {
        combine(&[n; 32], "test", [])
    }

    fn artifact(fingerprint: Fingerprint, html: &str) -> Artifact {
        Artifact {
            fingerprint,
            html: html.into(),
            converter: "test".into(),
            refs: vec![],
        }
    }

    fn open(tmp: &TempDir) -> Arc<BuildCache> {
        Arc::new(BuildCache::open(tmp.path(), u64::MAX).unwrap())
    }

    async fn build_once(
        cache: &Arc<BuildCache>,
        key: Fingerprint,
        html: &str,
    ) -> Result<(Arc<Artifact>, GetOutcome), ConvertError> {
        let a = artifact(key, html);
        cache.get_or_build(key, || async move { Ok(a) }).await
    }

    // =========================================================================
    // Lookup order
    // =========================================================================

    #[tokio::test]
    async fn miss_then_memory_hit() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);

        let (a, outcome) = build_once(&cache, fp(1), "<p>a</p>").await.unwrap();
        assert_eq!(outcome, GetOutcome::Built);
        assert_eq!(a.html, "<p>a</p>");

        let (_, outcome) = cache
            .get_or_build(fp(1), || async { Err(ConvertError::Conversion("must not rebuild".into())) })
            .await
            .unwrap();
        assert_eq!(outcome, GetOutcome::Hit);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn disk_hit_after_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let cache = open(&tmp);
            build_once(&cache, fp(1), "<p>persisted</p>").await.unwrap();
            cache.flush().unwrap();
        }
        let cache = open(&tmp);
        assert!(cache.contains(&fp(1)));
        let (a, outcome) = cache
            .get_or_build(fp(1), || async { Err(ConvertError::Conversion("must not rebuild".into())) })
            .await
            .unwrap();
        assert_eq!(outcome, GetOutcome::Hit);
        assert_eq!(a.html, "<p>persisted</p>");
    }

    #[tokio::test]
    async fn fresh_view_skips_disk_but_stores() {
        let tmp = TempDir::new().unwrap();
        build_once(&open(&tmp), fp(1), "old").await.unwrap();

        let fresh = Arc::new(BuildCache::open_fresh(tmp.path(), u64::MAX).unwrap());
        let (a, outcome) = build_once(&fresh, fp(1), "new").await.unwrap();
        assert_eq!(outcome, GetOutcome::Built);
        assert_eq!(a.html, "new");

        let (a, _) = open(&tmp)
            .get_or_build(fp(1), || async { Err(ConvertError::Conversion("must not rebuild".into())) })
            .await
            .unwrap();
        assert_eq!(a.html, "new");
    }

    // =========================================================================
    // Single flight
    // =========================================================================

    #[tokio::test]
    async fn concurrent_requests_build_once() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let builds = Arc::new(AtomicUsize::new(0));

        let request = || {
            let cache = Arc::clone(&cache);
            let builds = Arc::clone(&builds);
            async move {
                cache
                    .get_or_build(fp(7), move || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(artifact(fp(7), "shared"))
                    })
                    .await
            }
        };
        let results = futures::future::join_all((0..5).map(|_| tokio::spawn(request()))).await;

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        let outcomes: Vec<GetOutcome> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap().1)
            .collect();
        assert_eq!(outcomes.iter().filter(|o| **o == GetOutcome::Built).count(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 4, misses: 1 });
    }

    #[tokio::test]
    async fn failure_is_shared_and_not_stored() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let err = cache
            .get_or_build(fp(2), || async { Err(ConvertError::Conversion("boom".into())) })
            .await
            .unwrap_err();
        assert_eq!(err, ConvertError::Conversion("boom".into()));
        assert!(!cache.contains(&fp(2)));

        let (_, outcome) = build_once(&cache, fp(2), "second try").await.unwrap();
        assert_eq!(outcome, GetOutcome::Built);
    }

    // =========================================================================
    // Corruption
    // =========================================================================

    #[tokio::test]
    async fn corrupt_object_is_removed_and_rebuilt() {
        let tmp = TempDir::new().unwrap();
        build_once(&open(&tmp), fp(3), "fine").await.unwrap();
        let cache = open(&tmp);
        let path = cache.object_path(&fp(3));
        fs::write(&path, "{ truncated").unwrap();

        let (a, outcome) = build_once(&cache, fp(3), "rebuilt").await.unwrap();
        assert_eq!(outcome, GetOutcome::Built);
        assert_eq!(a.html, "rebuilt");
    }

    #[tokio::test]
    async fn checksum_mismatch_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        build_once(&open(&tmp), fp(4), "original").await.unwrap();
        let cache = open(&tmp);
        let path = cache.object_path(&fp(4));
        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("original", "tampered");
        fs::write(&path, tampered).unwrap();

        assert!(cache.load(fp(4)).is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn object_under_wrong_fingerprint_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        build_once(&cache, fp(5), "five").await.unwrap();
        fs::create_dir_all(cache.object_path(&fp(6)).parent().unwrap()).unwrap();
        fs::copy(cache.object_path(&fp(5)), cache.object_path(&fp(6))).unwrap();
        assert!(cache.load(fp(6)).is_none());
    }

    #[test]
    fn other_format_versions_are_removed() {
        let tmp = TempDir::new().unwrap();
        let stale = tmp.path().join(format!("v{}", FORMAT_VERSION + 1));
        fs::create_dir_all(&stale).unwrap();
        fs::create_dir_all(tmp.path().join("vendor")).unwrap();
        BuildCache::open(tmp.path(), 1024).unwrap();
        assert!(!stale.exists());
        assert!(tmp.path().join("vendor").exists());
        assert!(store_path(tmp.path()).join(OBJECTS_DIR).is_dir());
    }

    #[tokio::test]
    async fn usage_on_disk_reads_without_touching() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("never-built");
        assert_eq!(BuildCache::usage_on_disk(&missing, 10).entries, 0);
        assert!(!missing.exists());

        let cache = open(&tmp);
        build_once(&cache, fp(1), "<p>a</p>").await.unwrap();
        cache.flush().unwrap();
        let stale = tmp.path().join(format!("v{}", FORMAT_VERSION + 1));
        fs::create_dir_all(&stale).unwrap();

        let usage = BuildCache::usage_on_disk(tmp.path(), 1024);
        assert_eq!(usage.entries, 1);
        assert_eq!(usage.bytes, cache.usage().bytes);
        assert!(stale.exists());
    }

    #[test]
    fn corrupt_index_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let root = store_path(tmp.path());
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(INDEX_FILENAME), "not json").unwrap();
        let cache = BuildCache::open(tmp.path(), 1024).unwrap();
        assert_eq!(cache.usage().entries, 0);
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    #[tokio::test]
    async fn evicts_least_recently_used_first() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        for n in 1..=3 {
            build_once(&cache, fp(n), &"x".repeat(100)).await.unwrap();
        }
        // Touch 1 so 2 becomes the oldest.
        build_once(&cache, fp(1), "").await.unwrap();
        let one_entry = cache.usage().bytes / 3;

        let limited = BuildCache {
            max_bytes: one_entry * 2,
            ..Arc::try_unwrap(cache).ok().unwrap()
        };
        let report = limited.evict(&HashSet::new());
        assert_eq!(report.removed, 1);
        assert!(!limited.object_path(&fp(2)).exists());
        assert!(limited.object_path(&fp(1)).exists());
        assert!(limited.object_path(&fp(3)).exists());
    }

    #[tokio::test]
    async fn pinned_entries_survive_eviction() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(BuildCache::open(tmp.path(), 0).unwrap());
        build_once(&cache, fp(1), "a").await.unwrap();
        build_once(&cache, fp(2), "b").await.unwrap();

        let pinned: HashSet<Fingerprint> = [fp(2)].into_iter().collect();
        let report = cache.evict(&pinned);
        assert_eq!(report.removed, 1);
        assert!(cache.object_path(&fp(2)).exists());
        assert_eq!(cache.usage().entries, 1);
    }

    #[tokio::test]
    async fn flush_persists_clock_and_entries() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        build_once(&cache, fp(1), "a").await.unwrap();
        build_once(&cache, fp(2), "b").await.unwrap();
        cache.flush().unwrap();

        let index = load_index(&store_path(tmp.path()));
        assert_eq!(index.entries.len(), 2);
        assert!(index.clock >= 2);
        assert!(index.entries[&fp(2)].last_used > index.entries[&fp(1)].last_used);
    }

    // =========================================================================
    // CacheStats
    // =========================================================================

    #[test]
    fn cache_stats_display_with_hits() {
        let s = CacheStats { hits: 3, misses: 1 };
        assert_eq!(format!("{}", s), "3 cached, 1 converted (4 total)");
    }

    #[test]
    fn cache_stats_display_no_hits() {
        let s = CacheStats { hits: 0, misses: 3 };
        assert_eq!(format!("{}", s), "3 converted");
    }
}
