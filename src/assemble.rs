//! Site assembly.
//!
//! Takes the converted fragments and lays them out into the final site tree,
//! held entirely in memory until the output writer publishes it.
//!
//! ## Generated Pages
//!
//! - **Post pages** (`/<slug>/index.html`): one per converted document
//! - **Home page** (`/index.html`): every post, newest first
//! - **Tag list** (`/tags/index.html`): every tag with its post count
//! - **Tag pages** (`/tags/<tag>/index.html`): posts carrying one tag
//!
//! ## Output Structure
//!
//! ```text
//! dist/
//! ├── index.html
//! ├── fibers/
//! │   └── index.html
//! ├── tags/
//! │   ├── index.html
//! │   └── runtime/
//! │       └── index.html
//! └── assets/
//!     ├── style.css              # copied from content/assets/ when present
//!     └── posts/flow.svg         # diagram referenced by a post
//! ```
//!
//! ## Partial builds
//!
//! A post renders only when its document converted. An index page renders
//! only when every post it lists converted; otherwise it is reported as
//! skipped along with the posts that blocked it.
//!
//! ## Cross-references
//!
//! `ref` placeholders and `related` entries resolve against the posts that
//! render in this build. Unknown targets, and targets whose own conversion
//! failed, never fail the build: they render as inert placeholders and
//! produce an [`AssemblyWarning`].
//!
//! ## HTML Generation
//!
//! Uses [maud](https://maud.lambda.xyz/) for compile-time HTML templating,
//! so every interpolated title, tag and path is escaped.

use crate::cache::{Artifact, RefPlaceholder};
use crate::config::SiteConfig;
use crate::directive::{self, DirectiveKind};
use crate::graph::{DependencyGraph, IndexPage, Node};
use crate::naming;
use crate::source::ASSETS_DIR;
use crate::types::Document;
use maud::{DOCTYPE, Markup, PreEscaped, html};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Output path → file bytes. Ordered, one entry per path.
pub type SiteTree = BTreeMap<String, Vec<u8>>;

const STYLESHEET: &str = "assets/style.css";

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("output path collision at {path}: {first} and {second}")]
    PathCollision {
        path: String,
        first: String,
        second: String,
    },
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A soft failure: the site is still produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyWarning {
    pub document: String,
    pub message: String,
}

impl fmt::Display for AssemblyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.document, self.message)
    }
}

pub struct AssemblyInput<'a> {
    pub documents: &'a [Document],
    pub graph: &'a DependencyGraph,
    /// Successful artifacts keyed by document path.
    pub artifacts: &'a BTreeMap<String, Arc<Artifact>>,
    pub site: &'a SiteConfig,
    /// Files under `<root>/assets/` as `(path inside assets, absolute path)`.
    pub static_assets: &'a [(String, PathBuf)],
    pub root: &'a Path,
}

#[derive(Debug, Default)]
pub struct Assembly {
    pub tree: SiteTree,
    pub warnings: Vec<AssemblyWarning>,
    /// Index pages left out, with the documents that blocked each one.
    pub skipped: Vec<(Node, Vec<String>)>,
    /// Index pages that were rendered.
    pub pages: Vec<Node>,
}

/// Output location of an asset given its root-relative source path.
///
/// Files already under `assets/` keep their place; anything else is nested
/// beneath it.
pub fn asset_output_path(path: &str) -> String {
    match path.strip_prefix(&format!("{ASSETS_DIR}/")) {
        Some(rest) => format!("{ASSETS_DIR}/{rest}"),
        None => format!("{ASSETS_DIR}/{path}"),
    }
}

/// Records which source produced each output path.
struct TreeBuilder {
    tree: SiteTree,
    owners: BTreeMap<String, String>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            tree: SiteTree::new(),
            owners: BTreeMap::new(),
        }
    }

    fn insert(&mut self, path: String, bytes: Vec<u8>, owner: &str) -> Result<(), AssembleError> {
        if let Some(first) = self.owners.get(&path) {
            if first == owner {
                return Ok(());
            }
            return Err(AssembleError::PathCollision {
                path,
                first: first.clone(),
                second: owner.to_string(),
            });
        }
        self.owners.insert(path.clone(), owner.to_string());
        self.tree.insert(path, bytes);
        Ok(())
    }
}

/// Lay out every renderable page and asset.
pub fn assemble(input: &AssemblyInput<'_>) -> Result<Assembly, AssembleError> {
    let by_path: BTreeMap<&str, &Document> = input
        .documents
        .iter()
        .map(|d| (d.path.as_str(), d))
        .collect();
    let stylesheet = input
        .static_assets
        .iter()
        .any(|(rel, _)| asset_output_path(&format!("{ASSETS_DIR}/{rel}")) == STYLESHEET);
    let layout = Layout {
        site: input.site,
        stylesheet,
    };

    let mut builder = TreeBuilder::new();
    let mut assembly = Assembly::default();

    for (rel, abs) in input.static_assets {
        let source = format!("{ASSETS_DIR}/{rel}");
        let bytes = read(abs)?;
        builder.insert(asset_output_path(&source), bytes, &source)?;
    }

    for node in input.graph.order() {
        match node {
            Node::Asset(path) => {
                if is_diagram(input.graph, node) {
                    let bytes = read(&input.root.join(path))?;
                    builder.insert(asset_output_path(path), bytes, path)?;
                }
            }
            Node::Document(path) => {
                let (Some(doc), Some(artifact)) = (by_path.get(path.as_str()), input.artifacts.get(path))
                else {
                    continue;
                };
                let published = Published {
                    by_path: &by_path,
                    artifacts: input.artifacts,
                };
                let body = resolve_refs(doc, artifact, &published, input.site, &mut assembly.warnings);
                let related = resolve_related(doc, input.graph, &published, &mut assembly.warnings);
                let page = layout.post(doc, &body, &related);
                builder.insert(doc.output_path(), page.into_string().into_bytes(), &doc.path)?;
            }
            Node::Index(page) => {
                let listed: Vec<&Document> = input
                    .graph
                    .dependencies(node)
                    .filter_map(|n| match n {
                        Node::Document(p) => by_path.get(p.as_str()).copied(),
                        _ => None,
                    })
                    .collect();
                let blocked: Vec<String> = listed
                    .iter()
                    .filter(|d| !input.artifacts.contains_key(&d.path))
                    .map(|d| d.path.clone())
                    .collect();
                if !blocked.is_empty() {
                    assembly.skipped.push((node.clone(), blocked));
                    continue;
                }
                let markup = match page {
                    IndexPage::Home => layout.home(&listed),
                    IndexPage::TagList => layout.tag_list(&listed),
                    IndexPage::Tag(slug) => layout.tag(slug, &listed),
                };
                let owner = format!("<{}>", node);
                builder.insert(node.to_string(), markup.into_string().into_bytes(), &owner)?;
                assembly.pages.push(node.clone());
            }
        }
    }

    assembly.tree = builder.tree;
    Ok(assembly)
}

fn read(path: &Path) -> Result<Vec<u8>, AssembleError> {
    std::fs::read(path).map_err(|source| AssembleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Whether any document references this asset through a `diagram` directive.
fn is_diagram(graph: &DependencyGraph, asset: &Node) -> bool {
    graph.dependents(asset).any(|user| match user {
        Node::Document(p) => graph
            .directives_for(p)
            .iter()
            .any(|d| d.kind == DirectiveKind::Diagram && d.node.as_ref() == Some(asset)),
        _ => false,
    })
}

/// Documents that get a page in this build.
struct Published<'a, 'b> {
    by_path: &'b BTreeMap<&'a str, &'a Document>,
    artifacts: &'b BTreeMap<String, Arc<Artifact>>,
}

enum Lookup<'a> {
    Found(&'a Document),
    /// Scanned, but its conversion failed or was skipped.
    Unpublished,
    Unknown,
}

impl<'a> Published<'a, '_> {
    fn lookup(&self, path: &str) -> Lookup<'a> {
        match self.by_path.get(path).copied() {
            Some(doc) if self.artifacts.contains_key(path) => Lookup::Found(doc),
            Some(_) => Lookup::Unpublished,
            None => Lookup::Unknown,
        }
    }
}

/// Swap every ref placeholder in a fragment for a link.
fn resolve_refs(
    doc: &Document,
    artifact: &Artifact,
    published: &Published<'_, '_>,
    site: &SiteConfig,
    warnings: &mut Vec<AssemblyWarning>,
) -> String {
    let mut html = artifact.html.clone();
    for placeholder in &artifact.refs {
        let (href, link) = match lookup_ref(doc, placeholder, published) {
            Lookup::Found(t) => {
                let href = site.url(&t.permalink());
                let link = maud::html! { a href=(href) { (t.metadata.title) } };
                (href, link)
            }
            missing => {
                let message = match missing {
                    Lookup::Unpublished => {
                        format!("reference `{}` points to a post that was not built", placeholder.target)
                    }
                    _ => format!("unresolved reference `{}`", placeholder.target),
                };
                warnings.push(AssemblyWarning {
                    document: doc.path.clone(),
                    message,
                });
                let link = maud::html! {
                    a href="#" data-unresolved=(placeholder.target) { (placeholder.target) }
                };
                let attr = format!(
                    "#\" data-unresolved=\"{}",
                    maud::html! { (placeholder.target) }.into_string()
                );
                (attr, link)
            }
        };
        // Inside an attribute the placeholder is the URL; in text it becomes a link.
        html = html.replace(&format!("\"{}\"", placeholder.token), &format!("\"{href}\""));
        html = directive::splice(&html, &placeholder.token, &link.into_string());
    }
    html
}

fn lookup_ref<'a>(doc: &Document, placeholder: &RefPlaceholder, published: &Published<'a, '_>) -> Lookup<'a> {
    let base = match &placeholder.origin {
        Some(origin) => origin.rsplit_once('/').map(|(d, _)| d).unwrap_or(""),
        None => doc.dir(),
    };
    match directive::resolve_target(base, &placeholder.target) {
        Some(path) => published.lookup(&path),
        None => Lookup::Unknown,
    }
}

enum Related<'a> {
    Found(&'a Document),
    Missing(String),
}

fn resolve_related<'a>(
    doc: &Document,
    graph: &DependencyGraph,
    published: &Published<'a, '_>,
    warnings: &mut Vec<AssemblyWarning>,
) -> Vec<Related<'a>> {
    graph
        .related_for(&doc.path)
        .iter()
        .map(|(declared, resolved)| {
            match resolved.as_deref().map(|p| published.lookup(p)) {
                Some(Lookup::Found(found)) => Related::Found(found),
                _ => {
                    warnings.push(AssemblyWarning {
                        document: doc.path.clone(),
                        message: format!("unresolved related post `{declared}`"),
                    });
                    Related::Missing(declared.clone())
                }
            }
        })
        .collect()
}

/// Newest first; undated posts last, by path.
fn chronological<'a>(docs: &[&'a Document]) -> Vec<&'a Document> {
    let mut sorted = docs.to_vec();
    sorted.sort_by(|a, b| match (a.metadata.date, b.metadata.date) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.path.cmp(&b.path)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.path.cmp(&b.path),
    });
    sorted
}

// ============================================================================
// HTML Components
// ============================================================================

struct Layout<'a> {
    site: &'a SiteConfig,
    stylesheet: bool,
}

impl Layout<'_> {
    /// Renders the base HTML document structure
    fn base_document(&self, title: &str, body_class: Option<&str>, content: Markup) -> Markup {
        let full_title = if title == self.site.title {
            title.to_string()
        } else {
            format!("{title} · {}", self.site.title)
        };
        html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="UTF-8";
                    meta name="viewport" content="width=device-width, initial-scale=1.0";
                    title { (full_title) }
                    @if self.stylesheet {
                        link rel="stylesheet" href=(self.site.url(STYLESHEET));
                    }
                }
                body class=[body_class] {
                    (self.site_header())
                    (content)
                }
            }
        }
    }

    /// Renders the site header with the site title and navigation
    fn site_header(&self) -> Markup {
        html! {
            header.site-header {
                a.site-title href=(self.site.url("")) { (self.site.title) }
                nav.site-nav {
                    ul {
                        li { a href=(self.site.url("")) { "Posts" } }
                        li { a href=(self.site.url("tags/")) { "Tags" } }
                    }
                }
            }
        }
    }

    fn tag_href(&self, tag: &str) -> String {
        self.site.url(&format!("tags/{}/", naming::slugify(tag)))
    }

    fn post_list(&self, docs: &[&Document]) -> Markup {
        html! {
            ul.post-list {
                @for doc in chronological(docs) {
                    li {
                        a href=(self.site.url(&doc.permalink())) { (doc.metadata.title) }
                        @if let Some(date) = doc.metadata.date {
                            " "
                            time datetime=(date.format("%Y-%m-%d").to_string()) { (date.format("%B %-d, %Y").to_string()) }
                        }
                    }
                }
            }
        }
    }

    // ========================================================================
    // Page Renderers
    // ========================================================================

    fn post(&self, doc: &Document, body: &str, related: &[Related<'_>]) -> Markup {
        let meta = &doc.metadata;
        let content = html! {
            main.post-page {
                article.post {
                    header.post-header {
                        h1 { (meta.title) }
                        @if let Some(date) = meta.date {
                            time datetime=(date.format("%Y-%m-%d").to_string()) { (date.format("%B %-d, %Y").to_string()) }
                        }
                        @if !meta.tags.is_empty() {
                            ul.tags {
                                @for tag in &meta.tags {
                                    li { a href=(self.tag_href(tag)) { (tag) } }
                                }
                            }
                        }
                    }
                    div.post-body {
                        (PreEscaped(body))
                    }
                }
                @if !related.is_empty() {
                    aside.related {
                        h2 { "Related" }
                        ul {
                            @for entry in related {
                                li {
                                    @match entry {
                                        Related::Found(d) => {
                                            a href=(self.site.url(&d.permalink())) { (d.metadata.title) }
                                        }
                                        Related::Missing(declared) => {
                                            span.unresolved { (declared) }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        };
        self.base_document(&meta.title, Some("post-view"), content)
    }

    fn home(&self, docs: &[&Document]) -> Markup {
        let content = html! {
            main.index-page {
                (self.post_list(docs))
            }
        };
        self.base_document(&self.site.title, None, content)
    }

    fn tag_list(&self, docs: &[&Document]) -> Markup {
        // slug → (display name of first occurrence, count)
        let mut tags: BTreeMap<String, (&str, usize)> = BTreeMap::new();
        for doc in docs {
            let mut seen = BTreeSet::new();
            for tag in &doc.metadata.tags {
                let slug = naming::slugify(tag);
                if slug.is_empty() || !seen.insert(slug.clone()) {
                    continue;
                }
                tags.entry(slug).or_insert((tag.as_str(), 0)).1 += 1;
            }
        }
        let content = html! {
            main.tags-page {
                h1 { "Tags" }
                ul.tag-list {
                    @for (slug, (name, count)) in &tags {
                        li {
                            a href=(self.site.url(&format!("tags/{slug}/"))) { (name) }
                            " (" (count) ")"
                        }
                    }
                }
            }
        };
        self.base_document("Tags", None, content)
    }

    fn tag(&self, slug: &str, docs: &[&Document]) -> Markup {
        let name = docs
            .iter()
            .flat_map(|d| d.metadata.tags.iter())
            .find(|t| naming::slugify(t) == slug)
            .map(String::as_str)
            .unwrap_or(slug);
        let content = html! {
            main.tag-page {
                h1 { "Tagged “" (name) "”" }
                (self.post_list(docs))
            }
        };
        self.base_document(name, None, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::test_helpers::{doc, doc_with_tags, markdown_source, write_file};
    use tempfile::TempDir;

    fn artifact(html: &str) -> Arc<Artifact> {
        Arc::new(Artifact {
            fingerprint: Fingerprint::from_bytes([0; 32]),
            html: html.into(),
            converter: "test".into(),
            refs: vec![],
        })
    }

    fn with_ref(html: &str, token: &str, target: &str) -> Arc<Artifact> {
        let mut a = (*artifact(html)).clone();
        a.refs.push(RefPlaceholder {
            token: token.into(),
            target: target.into(),
            origin: None,
        });
        Arc::new(a)
    }

    struct Fixture {
        tmp: TempDir,
        docs: Vec<Document>,
        artifacts: BTreeMap<String, Arc<Artifact>>,
        site: SiteConfig,
        static_assets: Vec<(String, PathBuf)>,
    }

    impl Fixture {
        fn new(docs: Vec<Document>) -> Self {
            let artifacts = docs
                .iter()
                .map(|d| (d.path.clone(), artifact(&format!("<p>{}</p>", d.path))))
                .collect();
            Self {
                tmp: TempDir::new().unwrap(),
                docs,
                artifacts,
                site: SiteConfig::default(),
                static_assets: vec![],
            }
        }

        fn run(&self) -> Result<Assembly, AssembleError> {
            let graph = DependencyGraph::build(&self.docs, &markdown_source(self.tmp.path())).unwrap();
            assemble(&AssemblyInput {
                documents: &self.docs,
                graph: &graph,
                artifacts: &self.artifacts,
                site: &self.site,
                static_assets: &self.static_assets,
                root: self.tmp.path(),
            })
        }
    }

    fn page(assembly: &Assembly, path: &str) -> String {
        let bytes = assembly
            .tree
            .get(path)
            .unwrap_or_else(|| panic!("{path} not in tree: {:?}", assembly.tree.keys().collect::<Vec<_>>()));
        String::from_utf8(bytes.clone()).unwrap()
    }

    // =========================================================================
    // Tree layout
    // =========================================================================

    #[test]
    fn renders_posts_and_index_pages() {
        let fx = Fixture::new(vec![
            doc_with_tags("a.md", "# Alpha", &["Rust"]),
            doc("b.md", "# Beta"),
        ]);
        let out = fx.run().unwrap();
        let paths: Vec<&str> = out.tree.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec![
                "a/index.html",
                "b/index.html",
                "index.html",
                "tags/index.html",
                "tags/rust/index.html"
            ]
        );
        assert!(out.warnings.is_empty());
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn post_page_contains_fragment_and_metadata() {
        let fx = Fixture::new(vec![doc_with_tags(
            "2024-03-01-fibers.md",
            "# Fibers",
            &["Runtime"],
        )]);
        let out = fx.run().unwrap();
        let html = page(&out, "fibers/index.html");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h1>Fibers</h1>"));
        assert!(html.contains("<p>2024-03-01-fibers.md</p>"));
        assert!(html.contains(r#"datetime="2024-03-01""#));
        assert!(html.contains(r#"href="/tags/runtime/""#));
    }

    #[test]
    fn home_lists_newest_first_undated_last() {
        let fx = Fixture::new(vec![
            doc("2023-01-01-old.md", "# Old"),
            doc("2024-06-01-new.md", "# New"),
            doc("zeta.md", "# Zeta"),
            doc("alpha.md", "# Alpha"),
        ]);
        let out = fx.run().unwrap();
        let html = page(&out, "index.html");
        let pos = |needle: &str| html.find(needle).unwrap();
        assert!(pos(">New<") < pos(">Old<"));
        assert!(pos(">Old<") < pos(">Alpha<"));
        assert!(pos(">Alpha<") < pos(">Zeta<"));
    }

    #[test]
    fn tag_list_counts_posts() {
        let fx = Fixture::new(vec![
            doc_with_tags("a.md", "", &["Rust", "async"]),
            doc_with_tags("b.md", "", &["rust"]),
        ]);
        let out = fx.run().unwrap();
        let html = page(&out, "tags/index.html");
        assert!(html.contains("(2)"));
        assert!(html.contains(r#"href="/tags/async/""#));
        let rust = page(&out, "tags/rust/index.html");
        assert!(rust.contains("/a/") && rust.contains("/b/"));
    }

    #[test]
    fn stylesheet_linked_only_when_present() {
        let mut fx = Fixture::new(vec![doc("a.md", "")]);
        assert!(!page(&fx.run().unwrap(), "a/index.html").contains("stylesheet"));

        write_file(fx.tmp.path(), "assets/style.css", "body{}");
        fx.static_assets = vec![("style.css".into(), fx.tmp.path().join("assets/style.css"))];
        let out = fx.run().unwrap();
        assert!(page(&out, "a/index.html").contains(r#"href="/assets/style.css""#));
        assert_eq!(out.tree["assets/style.css"], b"body{}");
    }

    #[test]
    fn base_url_prefixes_links() {
        let mut fx = Fixture::new(vec![doc_with_tags("a.md", "", &["x"])]);
        fx.site.base_url = "https://example.com/blog/".into();
        let out = fx.run().unwrap();
        assert!(page(&out, "index.html").contains(r#"href="https://example.com/blog/a/""#));
    }

    #[test]
    fn diagram_assets_are_copied() {
        let fx = Fixture::new(vec![doc("posts/a.md", r#"{{ diagram "flow.svg" }}"#)]);
        write_file(fx.tmp.path(), "posts/flow.svg", "<svg/>");
        let out = fx.run().unwrap();
        assert_eq!(out.tree["assets/posts/flow.svg"], b"<svg/>");
    }

    #[test]
    fn included_partials_are_not_published() {
        let fx = Fixture::new(vec![doc("a.md", r#"{{ include "/_partials/f.html" }}"#)]);
        write_file(fx.tmp.path(), "_partials/f.html", "<footer/>");
        let out = fx.run().unwrap();
        assert!(out.tree.keys().all(|k| !k.contains("_partials")));
    }

    // =========================================================================
    // Partial builds
    // =========================================================================

    #[test]
    fn index_pages_skipped_when_a_post_failed() {
        let mut fx = Fixture::new(vec![
            doc_with_tags("a.md", "", &["one"]),
            doc_with_tags("b.md", "", &["two"]),
        ]);
        fx.artifacts.remove("b.md");
        let out = fx.run().unwrap();

        assert!(out.tree.contains_key("a/index.html"));
        assert!(!out.tree.contains_key("b/index.html"));
        assert!(out.tree.contains_key("tags/one/index.html"));
        assert!(!out.tree.contains_key("index.html"));
        let skipped: Vec<String> = out.skipped.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(skipped, vec!["index.html", "tags/index.html", "tags/two/index.html"]);
        assert_eq!(out.skipped[0].1, vec!["b.md".to_string()]);
    }

    // =========================================================================
    // Cross-references
    // =========================================================================

    #[test]
    fn ref_in_link_resolves_to_permalink() {
        let mut fx = Fixture::new(vec![doc("posts/a.md", ""), doc("posts/b.md", "# Bee")]);
        fx.artifacts.insert(
            "posts/a.md".into(),
            with_ref(r#"<p><a href="plume-ref-0-x">see</a></p>"#, "plume-ref-0-x", "b.md"),
        );
        let out = fx.run().unwrap();
        assert!(page(&out, "a/index.html").contains(r#"<a href="/b/">see</a>"#));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn bare_ref_becomes_titled_link() {
        let mut fx = Fixture::new(vec![doc("a.md", ""), doc("b.md", "# Bee")]);
        fx.artifacts
            .insert("a.md".into(), with_ref("<p>see plume-ref-0-x</p>", "plume-ref-0-x", "b.md"));
        let out = fx.run().unwrap();
        assert!(page(&out, "a/index.html").contains(r#"see <a href="/b/">Bee</a>"#));
    }

    #[test]
    fn unresolved_ref_is_placeholder_with_warning() {
        let mut fx = Fixture::new(vec![doc("a.md", "")]);
        fx.artifacts.insert(
            "a.md".into(),
            with_ref(r#"<a href="plume-ref-0-x">x</a> plume-ref-0-x"#, "plume-ref-0-x", "gone.md"),
        );
        let out = fx.run().unwrap();
        let html = page(&out, "a/index.html");
        assert!(html.contains(r##"<a href="#" data-unresolved="gone.md">x</a>"##));
        assert!(html.contains(r##"<a href="#" data-unresolved="gone.md">gone.md</a>"##));
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].to_string(), "a.md: unresolved reference `gone.md`");
    }

    #[test]
    fn ref_to_unbuilt_post_is_placeholder_with_warning() {
        let mut fx = Fixture::new(vec![doc("a.md", ""), doc("c.md", "# Sea")]);
        fx.artifacts
            .insert("a.md".into(), with_ref("<p>see plume-ref-0-x</p>", "plume-ref-0-x", "c.md"));
        fx.artifacts.remove("c.md");
        let out = fx.run().unwrap();
        let html = page(&out, "a/index.html");
        assert!(!html.contains(r#"href="/c/""#));
        assert!(html.contains(r##"<a href="#" data-unresolved="c.md">c.md</a>"##));
        assert_eq!(
            out.warnings[0].to_string(),
            "a.md: reference `c.md` points to a post that was not built"
        );
    }

    #[test]
    fn ref_from_included_document_resolves_against_its_origin() {
        let mut fx = Fixture::new(vec![doc("a.md", ""), doc("notes/n.md", ""), doc("notes/t.md", "# Tee")]);
        let mut a = (*artifact("<p>plume-ref-0-y</p>")).clone();
        a.refs.push(RefPlaceholder {
            token: "plume-ref-0-y".into(),
            target: "t.md".into(),
            origin: Some("notes/n.md".into()),
        });
        fx.artifacts.insert("a.md".into(), Arc::new(a));
        let out = fx.run().unwrap();
        assert!(page(&out, "a/index.html").contains(r#"<a href="/t/">Tee</a>"#));
    }

    #[test]
    fn related_posts_listed_and_missing_marked() {
        let mut a = doc("a.md", "");
        a.metadata.related = vec!["b.md".into(), "nope.md".into()];
        let fx = Fixture::new(vec![a, doc("b.md", "# Bee")]);
        let out = fx.run().unwrap();
        let html = page(&out, "a/index.html");
        assert!(html.contains("<h2>Related</h2>"));
        assert!(html.contains(r#"<a href="/b/">Bee</a>"#));
        assert!(html.contains(r#"<span class="unresolved">nope.md</span>"#));
        assert_eq!(out.warnings.len(), 1);
    }

    // =========================================================================
    // Collisions and escaping
    // =========================================================================

    #[test]
    fn duplicate_slug_is_collision() {
        let mut b = doc("b.md", "");
        b.metadata.slug = "a".into();
        let fx = Fixture::new(vec![doc("a.md", ""), b]);
        match fx.run() {
            Err(AssembleError::PathCollision { path, first, second }) => {
                assert_eq!(path, "a/index.html");
                assert_eq!(first, "a.md");
                assert_eq!(second, "b.md");
            }
            other => panic!("expected collision, got {other:?}"),
        }
    }

    #[test]
    fn slug_colliding_with_tag_list_is_collision() {
        let fx = Fixture::new(vec![doc("tags.md", "")]);
        assert!(matches!(
            fx.run(),
            Err(AssembleError::PathCollision { path, .. }) if path == "tags/index.html"
        ));
    }

    #[test]
    fn titles_are_escaped() {
        let mut d = doc("a.md", "");
        d.metadata.title = "<script>alert(1)</script>".into();
        let fx = Fixture::new(vec![d]);
        let html = page(&fx.run().unwrap(), "a/index.html");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn asset_output_path_does_not_double_nest() {
        assert_eq!(asset_output_path("assets/img/x.png"), "assets/img/x.png");
        assert_eq!(asset_output_path("posts/flow.svg"), "assets/posts/flow.svg");
    }
}
