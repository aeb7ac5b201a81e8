//! Build orchestration.
//!
//! Drives one build from content root to published output:
//!
//! ```text
//! scan → graph → fingerprint → convert (concurrent, cached) → assemble → write
//! ```
//!
//! Everything a build needs travels in a [`BuildContext`]; there is no global
//! state. Each document gets a shared future that waits for the documents it
//! includes, takes a permit from the concurrency limiter, and asks the
//! [`BuildCache`] for its artifact. The cache runs the conversion at most once
//! per fingerprint; a conversion runs under the configured timeout and the
//! build's cancellation token.
//!
//! ## Document lifecycle
//!
//! ```text
//! Discovered → Fingerprinted → CacheHit
//!                            → Converting → Converted
//!                                         → Failed
//! Discovered | Fingerprinted → Failed | Skipped
//! ```
//!
//! A document is `Skipped` when something it includes failed; it is `Failed`
//! when its own front matter, dialect, dependencies or conversion are at fault.
//!
//! ## Failure policy
//!
//! Document failures never stop other documents. The output is still
//! assembled and published, and [`BuildReport::exit_code`] decides whether
//! the run counts as a failure. A converter that cannot be started at all, a
//! dependency cycle, an unreadable content root, an output path collision and
//! write failures are fatal and surface as [`BuildError`].

use crate::assemble::{self, AssembleError, Assembly, AssemblyInput, AssemblyWarning, asset_output_path};
use crate::cache::{Artifact, BuildCache, CacheError, CacheStats, GetOutcome, RefPlaceholder};
use crate::config::{Config, ConfigError, SiteConfig};
use crate::convert::{ConvertError, ConvertInput, Converter, ConverterRegistry};
use crate::directive::{self, DirectiveKind};
use crate::fingerprint::{self, Fingerprint};
use crate::graph::{DependencyGraph, GraphError, Node};
use crate::source::{ContentSource, ScanError};
use crate::types::Document;
use crate::writer::{OutputWriter, PublishOutcome, WriteError};
use futures::future::{BoxFuture, FutureExt, Shared};
use maud::html;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("{path}: {source}")]
    ConverterUnavailable {
        path: String,
        #[source]
        source: ConvertError,
    },
    #[error("assembly failed: {0}")]
    Assemble(#[from] AssembleError),
    #[error("write failed: {0}")]
    Write(#[from] WriteError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("cannot start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    /// Process exit code for a build that could not complete.
    pub fn exit_code(&self) -> u8 {
        match self {
            BuildError::Cancelled => 130,
            _ => 2,
        }
    }
}

// ============================================================================
// Settings and context
// ============================================================================

/// The resolved options one build runs with.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub site: SiteConfig,
    pub timeout: Duration,
    pub continue_on_error: bool,
    pub include_drafts: bool,
}

impl BuildSettings {
    pub fn new(source_dir: &Path, config: &Config) -> Self {
        Self {
            source_dir: source_dir.to_path_buf(),
            output_dir: PathBuf::from(&config.build.output_dir),
            site: config.site.clone(),
            timeout: config.build.timeout(),
            continue_on_error: config.build.continue_on_error,
            include_drafts: config.build.drafts,
        }
    }
}

/// Everything a build shares between its tasks.
pub struct BuildContext {
    pub config: BuildSettings,
    pub cache: Arc<BuildCache>,
    pub limiter: Arc<Semaphore>,
    pub converters: Arc<ConverterRegistry>,
    pub report: Arc<Mutex<ReportBuilder>>,
    pub cancel: CancellationToken,
}

impl BuildContext {
    pub fn new(
        config: BuildSettings,
        cache: BuildCache,
        converters: ConverterRegistry,
        concurrency: usize,
    ) -> Self {
        Self {
            config,
            cache: Arc::new(cache),
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
            converters: Arc::new(converters),
            report: Arc::new(Mutex::new(ReportBuilder::default())),
            cancel: CancellationToken::new(),
        }
    }

    /// Document states recorded so far. Complete once [`run`] returns, and
    /// the only record of progress when it returns an error.
    pub fn outcomes(&self) -> Vec<DocumentOutcome> {
        lock(&self.report).outcomes()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Document state and report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Discovered,
    Fingerprinted,
    CacheHit,
    Converting,
    Converted,
    Failed,
    Skipped,
}

impl DocumentState {
    pub fn can_transition_to(self, next: DocumentState) -> bool {
        use DocumentState::*;
        match (self, next) {
            (Discovered, Fingerprinted | Failed | Skipped) => true,
            (Fingerprinted, CacheHit | Converting | Failed | Skipped) => true,
            (Converting, Converted | Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DocumentState::CacheHit
                | DocumentState::Converted
                | DocumentState::Failed
                | DocumentState::Skipped
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, DocumentState::CacheHit | DocumentState::Converted)
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentState::Discovered => "discovered",
            DocumentState::Fingerprinted => "fingerprinted",
            DocumentState::CacheHit => "cached",
            DocumentState::Converting => "converting",
            DocumentState::Converted => "converted",
            DocumentState::Failed => "failed",
            DocumentState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Final state of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOutcome {
    pub path: String,
    pub title: String,
    /// Where the page lands in the output tree.
    pub output: String,
    pub state: DocumentState,
    pub fingerprint: Option<Fingerprint>,
    /// Why the document failed.
    pub cause: Option<String>,
    /// Failed dependencies, for skipped documents.
    pub blocked_by: Vec<String>,
}

/// Collects document states while a build runs.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    documents: BTreeMap<String, DocumentOutcome>,
}

impl ReportBuilder {
    pub fn discover(&mut self, doc: &Document) {
        self.documents.insert(
            doc.path.clone(),
            DocumentOutcome {
                path: doc.path.clone(),
                title: doc.metadata.title.clone(),
                output: doc.output_path(),
                state: DocumentState::Discovered,
                fingerprint: None,
                cause: None,
                blocked_by: Vec::new(),
            },
        );
    }

    /// Move `path` to `next`. Illegal moves are logged and ignored.
    pub fn transition(&mut self, path: &str, next: DocumentState) -> bool {
        let Some(outcome) = self.documents.get_mut(path) else {
            tracing::error!(path, state = %next, "state change for unknown document");
            return false;
        };
        if !outcome.state.can_transition_to(next) {
            tracing::error!(path, from = %outcome.state, to = %next, "illegal state transition");
            return false;
        }
        tracing::debug!(path, from = %outcome.state, to = %next, "document state");
        outcome.state = next;
        true
    }

    pub fn fingerprinted(&mut self, path: &str, fingerprint: Fingerprint) {
        if self.transition(path, DocumentState::Fingerprinted)
            && let Some(outcome) = self.documents.get_mut(path)
        {
            outcome.fingerprint = Some(fingerprint);
        }
    }

    pub fn fail(&mut self, path: &str, cause: impl ToString) {
        if self.transition(path, DocumentState::Failed)
            && let Some(outcome) = self.documents.get_mut(path)
        {
            outcome.cause = Some(cause.to_string());
        }
    }

    pub fn skip(&mut self, path: &str, blocked_by: Vec<String>) {
        if self.transition(path, DocumentState::Skipped)
            && let Some(outcome) = self.documents.get_mut(path)
        {
            outcome.blocked_by = blocked_by;
        }
    }

    pub fn state(&self, path: &str) -> Option<DocumentState> {
        self.documents.get(path).map(|o| o.state)
    }

    fn outcomes(&self) -> Vec<DocumentOutcome> {
        self.documents.values().cloned().collect()
    }
}

/// What a finished build did.
#[derive(Debug)]
pub struct BuildReport {
    /// One entry per scanned document, in path order.
    pub documents: Vec<DocumentOutcome>,
    /// Index pages that were rendered, by output path.
    pub pages: Vec<String>,
    /// Index pages left out, with the documents that blocked them.
    pub skipped_pages: Vec<(String, Vec<String>)>,
    pub warnings: Vec<AssemblyWarning>,
    pub cache: CacheStats,
    pub publish: PublishOutcome,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.documents.iter().filter(|d| d.state.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.documents
            .iter()
            .filter(|d| d.state == DocumentState::Failed)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.documents
            .iter()
            .filter(|d| d.state == DocumentState::Skipped)
    }

    pub fn has_failures(&self) -> bool {
        self.documents.iter().any(|d| !d.state.is_success())
    }

    /// 0 on success, 1 when any document failed and errors are not tolerated.
    /// Fatal errors and cancellation never produce a report; see
    /// [`BuildError::exit_code`].
    pub fn exit_code(&self, continue_on_error: bool) -> u8 {
        if self.has_failures() && !continue_on_error {
            1
        } else {
            0
        }
    }
}

// ============================================================================
// Build
// ============================================================================

#[derive(Clone)]
enum NodeResult {
    Ready(Arc<Artifact>),
    NotReady,
}

type NodeFuture = Shared<BoxFuture<'static, NodeResult>>;

/// What a document needs to be converted, decided while fingerprinting.
struct Plan {
    fingerprint: Fingerprint,
    converter: Arc<dyn Converter>,
}

/// Run one build.
pub async fn run(ctx: &BuildContext) -> Result<BuildReport, BuildError> {
    let started = Instant::now();
    let settings = &ctx.config;

    let source = ContentSource::open(
        &settings.source_dir,
        ctx.converters.extension_map(),
        settings.include_drafts,
    )?;
    let documents: Vec<Document> = source.documents().collect::<Result<_, _>>()?;
    let static_assets = source.static_assets()?;
    tracing::debug!(documents = documents.len(), assets = static_assets.len(), "scanned");
    {
        let mut report = lock(&ctx.report);
        for doc in &documents {
            report.discover(doc);
        }
    }

    let graph = Arc::new(DependencyGraph::build(&documents, &source)?);
    let plans = fingerprint_documents(ctx, &documents, &graph);

    let artifacts = convert_documents(ctx, &documents, &graph, &plans).await?;

    let assembly: Assembly = assemble::assemble(&AssemblyInput {
        documents: &documents,
        graph: &graph,
        artifacts: &artifacts,
        site: &settings.site,
        static_assets: &static_assets,
        root: source.root(),
    })?;
    for warning in &assembly.warnings {
        tracing::warn!(document = %warning.document, "{}", warning.message);
    }

    let writer = OutputWriter::new(&settings.output_dir)?;
    let publish = writer.stage(&assembly.tree)?.commit()?;

    let pinned: HashSet<Fingerprint> = plans.values().map(|p| p.fingerprint).collect();
    ctx.cache.evict(&pinned);
    ctx.cache.flush()?;

    Ok(BuildReport {
        documents: lock(&ctx.report).outcomes(),
        pages: assembly.pages.iter().map(|n| n.to_string()).collect(),
        skipped_pages: assembly
            .skipped
            .into_iter()
            .map(|(n, blockers)| (n.to_string(), blockers))
            .collect(),
        warnings: assembly.warnings,
        cache: ctx.cache.stats(),
        publish,
        elapsed: started.elapsed(),
    })
}

const NO_SLUG: &str = "file name yields an empty slug; set `slug` in front matter";

/// Compute fingerprints in dependency order.
///
/// Documents that cannot be converted at all fail here; documents that
/// include one of them are skipped. Neither gets a plan.
fn fingerprint_documents(
    ctx: &BuildContext,
    documents: &[Document],
    graph: &DependencyGraph,
) -> BTreeMap<String, Plan> {
    let content_hashes: BTreeMap<&str, [u8; 32]> = documents
        .par_iter()
        .map(|d| (d.path.as_str(), fingerprint::content_hash(d)))
        .collect();
    let by_path: BTreeMap<&str, &Document> =
        documents.iter().map(|d| (d.path.as_str(), d)).collect();

    let mut plans: BTreeMap<String, Plan> = BTreeMap::new();
    let mut report = lock(&ctx.report);

    for node in graph.order() {
        let Node::Document(path) = node else { continue };
        let (Some(doc), Some(content)) = (by_path.get(path.as_str()), content_hashes.get(path.as_str()))
        else {
            continue;
        };

        if let Some(error) = &doc.front_matter_error {
            report.fail(path, format!("front matter: {error}"));
            continue;
        }
        if !doc.is_valid_utf8() {
            report.fail(path, "source is not valid UTF-8");
            continue;
        }
        if !doc.has_slug() {
            report.fail(path, NO_SLUG);
            continue;
        }
        let missing = graph.missing_for(path);
        if !missing.is_empty() {
            report.fail(path, format!("missing dependency: {}", missing.join(", ")));
            continue;
        }
        let converter = match ctx.converters.for_dialect(&doc.dialect) {
            Ok(c) => c,
            Err(e) => {
                report.fail(path, e);
                continue;
            }
        };

        let mut deps: Vec<(String, [u8; 32])> = Vec::new();
        let mut blocked = Vec::new();
        for dep in graph.dependencies(node) {
            match dep {
                Node::Asset(p) => {
                    if let Some(digest) = graph.asset_hash(p) {
                        deps.push((dep.to_string(), *digest));
                    }
                }
                Node::Document(p) => match plans.get(p) {
                    Some(plan) => deps.push((dep.to_string(), *plan.fingerprint.as_bytes())),
                    None => blocked.push(p.clone()),
                },
                Node::Index(_) => {}
            }
        }
        if !blocked.is_empty() {
            report.skip(path, blocked);
            continue;
        }

        // Diagram links embed the base URL, so it is part of the identity.
        let identity = format!("{}|base={}", converter.identity(), ctx.config.site.base_url);
        let fp = fingerprint::combine(
            content,
            &identity,
            deps.iter().map(|(name, digest)| (name.as_str(), digest)),
        );
        report.fingerprinted(path, fp);
        plans.insert(
            path.clone(),
            Plan {
                fingerprint: fp,
                converter,
            },
        );
    }
    plans
}

/// Convert every planned document and collect the artifacts that succeeded.
async fn convert_documents(
    ctx: &BuildContext,
    documents: &[Document],
    graph: &Arc<DependencyGraph>,
    plans: &BTreeMap<String, Plan>,
) -> Result<BTreeMap<String, Arc<Artifact>>, BuildError> {
    let by_path: BTreeMap<&str, &Document> =
        documents.iter().map(|d| (d.path.as_str(), d)).collect();
    let fatal: Arc<Mutex<Option<(String, ConvertError)>>> = Arc::new(Mutex::new(None));
    let mut futures: BTreeMap<String, NodeFuture> = BTreeMap::new();

    for node in graph.order() {
        let Node::Document(path) = node else { continue };
        let (Some(plan), Some(doc)) = (plans.get(path), by_path.get(path.as_str())) else {
            continue;
        };
        let waits: Vec<(String, NodeFuture)> = graph
            .dependencies(node)
            .filter_map(|dep| match dep {
                Node::Document(p) => futures.get(p).map(|f| (p.clone(), f.clone())),
                _ => None,
            })
            .collect();

        let job = Job {
            path: path.clone(),
            body: doc.body().into_owned(),
            fingerprint: plan.fingerprint,
            converter: Arc::clone(&plan.converter),
            graph: Arc::clone(graph),
            root: ctx.config.source_dir.clone(),
            site: ctx.config.site.clone(),
            timeout: ctx.config.timeout,
            cache: Arc::clone(&ctx.cache),
            limiter: Arc::clone(&ctx.limiter),
            report: Arc::clone(&ctx.report),
            cancel: ctx.cancel.clone(),
            fatal: Arc::clone(&fatal),
        };
        futures.insert(path.clone(), job.run(waits).boxed().shared());
    }

    let handles: Vec<(String, tokio::task::JoinHandle<NodeResult>)> = futures
        .iter()
        .map(|(path, f)| (path.clone(), tokio::spawn(f.clone())))
        .collect();

    let mut artifacts = BTreeMap::new();
    for (path, handle) in handles {
        match handle.await {
            Ok(NodeResult::Ready(artifact)) => {
                artifacts.insert(path, artifact);
            }
            Ok(NodeResult::NotReady) => {}
            Err(e) => {
                tracing::error!(path = %path, error = %e, "conversion task panicked");
                lock(&ctx.report).fail(&path, format!("conversion task panicked: {e}"));
            }
        }
    }

    if let Some((path, source)) = lock(&fatal).take() {
        return Err(BuildError::ConverterUnavailable { path, source });
    }
    if ctx.cancel.is_cancelled() {
        return Err(BuildError::Cancelled);
    }
    Ok(artifacts)
}

/// One document's conversion, owned by its node future.
struct Job {
    path: String,
    body: String,
    fingerprint: Fingerprint,
    converter: Arc<dyn Converter>,
    graph: Arc<DependencyGraph>,
    root: PathBuf,
    site: SiteConfig,
    timeout: Duration,
    cache: Arc<BuildCache>,
    limiter: Arc<Semaphore>,
    report: Arc<Mutex<ReportBuilder>>,
    cancel: CancellationToken,
    fatal: Arc<Mutex<Option<(String, ConvertError)>>>,
}

impl Job {
    async fn run(self, waits: Vec<(String, NodeFuture)>) -> NodeResult {
        let mut included = BTreeMap::new();
        let mut blocked = Vec::new();
        for (path, future) in waits {
            match future.await {
                NodeResult::Ready(artifact) => {
                    included.insert(path, artifact);
                }
                NodeResult::NotReady => blocked.push(path),
            }
        }
        if !blocked.is_empty() {
            lock(&self.report).skip(&self.path, blocked);
            return NodeResult::NotReady;
        }

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                lock(&self.report).fail(&self.path, ConvertError::Cancelled);
                return NodeResult::NotReady;
            }
            permit = Arc::clone(&self.limiter).acquire_owned() => permit,
        };
        let Ok(_permit) = permit else {
            lock(&self.report).fail(&self.path, ConvertError::Cancelled);
            return NodeResult::NotReady;
        };

        let cache = Arc::clone(&self.cache);
        let fingerprint = self.fingerprint;
        let path = self.path.clone();
        let report = Arc::clone(&self.report);
        let fatal = Arc::clone(&self.fatal);
        let cancel = self.cancel.clone();

        match cache.get_or_build(fingerprint, move || self.build(included)).await {
            Ok((artifact, outcome)) => {
                let state = match outcome {
                    GetOutcome::Hit => DocumentState::CacheHit,
                    GetOutcome::Built => DocumentState::Converted,
                };
                lock(&report).transition(&path, state);
                NodeResult::Ready(artifact)
            }
            Err(e) => {
                if e.is_build_fatal() {
                    lock(&fatal).get_or_insert_with(|| (path.clone(), e.clone()));
                    cancel.cancel();
                }
                tracing::debug!(path = %path, error = %e, "conversion failed");
                lock(&report).fail(&path, e);
                NodeResult::NotReady
            }
        }
    }

    /// The conversion itself: tokenize, convert under timeout and
    /// cancellation, splice directive output back in.
    async fn build(self, included: BTreeMap<String, Arc<Artifact>>) -> Result<Artifact, ConvertError> {
        lock(&self.report).transition(&self.path, DocumentState::Converting);

        let nonce = self.fingerprint.short();
        let parsed = directive::parse(&self.body);
        let input = ConvertInput {
            path: self.path.clone(),
            text: directive::tokenize(&self.body, &parsed, &nonce),
        };

        let html = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ConvertError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.converter.convert(&input)) => match result {
                Ok(html) => html?,
                Err(_) => {
                    tracing::warn!(path = %self.path, timeout_secs = self.timeout.as_secs(), "conversion timed out");
                    return Err(ConvertError::Timeout(self.timeout));
                }
            },
        };

        let (html, refs) = self.splice_directives(html, &nonce, &included).await?;
        Ok(Artifact {
            fingerprint: self.fingerprint,
            html,
            converter: self.converter.identity(),
            refs,
        })
    }

    async fn splice_directives(
        &self,
        mut html: String,
        nonce: &str,
        included: &BTreeMap<String, Arc<Artifact>>,
    ) -> Result<(String, Vec<RefPlaceholder>), ConvertError> {
        let mut refs = Vec::new();
        let mut counters = [0usize; 3];
        for resolved in self.graph.directives_for(&self.path) {
            let slot = &mut counters[resolved.kind as usize];
            let token = directive::token(resolved.kind, *slot, nonce);
            *slot += 1;

            match (resolved.kind, &resolved.node) {
                (DirectiveKind::Include, Some(Node::Document(p))) => {
                    let Some(artifact) = included.get(p) else {
                        return Err(ConvertError::Conversion(format!(
                            "{}: included document {p} has no output",
                            self.path
                        )));
                    };
                    html = directive::splice(&html, &token, &artifact.html);
                    refs.extend(artifact.refs.iter().map(|r| RefPlaceholder {
                        token: r.token.clone(),
                        target: r.target.clone(),
                        origin: r.origin.clone().or_else(|| Some(p.clone())),
                    }));
                }
                (DirectiveKind::Include, Some(Node::Asset(p))) => {
                    let bytes = tokio::fs::read(self.root.join(p)).await.map_err(|e| {
                        ConvertError::Conversion(format!("{}: cannot read {p}: {e}", self.path))
                    })?;
                    html = directive::splice(&html, &token, &String::from_utf8_lossy(&bytes));
                }
                (DirectiveKind::Diagram, Some(Node::Asset(p))) => {
                    let src = self.site.url(&asset_output_path(p));
                    let alt = Path::new(p)
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let img = html! { img.diagram src=(src) alt=(alt); };
                    html = directive::splice(&html, &token, &img.into_string());
                }
                (DirectiveKind::Ref, _) => refs.push(RefPlaceholder {
                    token,
                    target: resolved.target.clone(),
                    origin: None,
                }),
                (kind, node) => {
                    return Err(ConvertError::Conversion(format!(
                        "{}: {kind:?} target `{}` resolved to {node:?}",
                        self.path, resolved.target
                    )));
                }
            }
        }
        tracing::trace!(path = %self.path, refs = refs.len(), "spliced directives");
        Ok((html, refs))
    }
}

// ============================================================================
// Check
// ============================================================================

/// One problem found by [`check`].
#[derive(Debug, Clone, PartialEq)]
pub struct CheckProblem {
    pub document: String,
    pub message: String,
}

/// Result of validating a content tree without converting it.
#[derive(Debug, Default)]
pub struct CheckReport {
    /// Documents in build order.
    pub order: Vec<String>,
    pub problems: Vec<CheckProblem>,
}

impl CheckReport {
    pub fn exit_code(&self) -> u8 {
        if self.problems.is_empty() { 0 } else { 1 }
    }
}

/// Scan, build the graph and resolve directives. Nothing is converted or
/// written.
pub fn check(
    settings: &BuildSettings,
    converters: &ConverterRegistry,
) -> Result<CheckReport, BuildError> {
    let source = ContentSource::open(
        &settings.source_dir,
        converters.extension_map(),
        settings.include_drafts,
    )?;
    let documents: Vec<Document> = source.documents().collect::<Result<_, _>>()?;
    let graph = DependencyGraph::build(&documents, &source)?;
    let by_path: BTreeMap<&str, &Document> =
        documents.iter().map(|d| (d.path.as_str(), d)).collect();

    let mut report = CheckReport::default();
    for node in graph.order() {
        let Node::Document(path) = node else { continue };
        let Some(doc) = by_path.get(path.as_str()) else { continue };
        report.order.push(path.clone());
        let mut problem = |message: String| {
            report.problems.push(CheckProblem {
                document: path.clone(),
                message,
            })
        };

        if let Some(error) = &doc.front_matter_error {
            problem(format!("front matter: {error}"));
        }
        if !doc.is_valid_utf8() {
            problem("source is not valid UTF-8".to_string());
        }
        if !doc.has_slug() {
            problem(NO_SLUG.to_string());
        }
        if let Err(e) = converters.for_dialect(&doc.dialect) {
            problem(e.to_string());
        }
        for target in graph.missing_for(path) {
            problem(format!("missing dependency: {target}"));
        }
        for d in graph.directives_for(path) {
            if d.kind == DirectiveKind::Ref && !matches!(d.node, Some(Node::Document(_))) {
                problem(format!("unresolved reference: {}", d.target));
            }
        }
        for (target, hit) in graph.related_for(path) {
            if hit.is_none() {
                problem(format!("unresolved related entry: {target}"));
            }
        }
    }
    Ok(report)
}
