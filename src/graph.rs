//! Dependency graph between documents, assets and index pages.
//!
//! Edges point from a node to what it needs:
//!
//! ```text
//! Index(Home) ──► Document(b.md) ──include──► Document(a.md)
//!                       │
//!                       └──diagram──► Asset(diagrams/flow.svg)
//! ```
//!
//! The graph is used for three things:
//!
//! - **Fingerprinting**: a document's fingerprint folds in the fingerprints
//!   of everything it depends on, so an upstream edit invalidates it.
//! - **Scheduling**: conversions run in topological order; ties are broken by
//!   [`Node`] order, which is lexical path order for documents.
//! - **Failure propagation**: dependents of a failed document are skipped.
//!
//! Cycles are a configuration error, detected with a three-colour DFS and
//! reported with the full cycle path.

use crate::directive::{self, DirectiveKind};
use crate::naming;
use crate::source::ContentSource;
use crate::types::Document;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("dependency cycle: {}", .path.join(" → "))]
    Cycle { path: Vec<String> },
}

/// Pages computed from many documents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexPage {
    /// Chronological listing at `index.html`.
    Home,
    /// All tags at `tags/index.html`.
    TagList,
    /// Posts for one tag (slugified) at `tags/<slug>/index.html`.
    Tag(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Node {
    Asset(String),
    Document(String),
    Index(IndexPage),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Asset(p) | Node::Document(p) => f.write_str(p),
            Node::Index(IndexPage::Home) => f.write_str("index.html"),
            Node::Index(IndexPage::TagList) => f.write_str("tags/index.html"),
            Node::Index(IndexPage::Tag(slug)) => write!(f, "tags/{slug}/index.html"),
        }
    }
}

/// A directive after target resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDirective {
    pub kind: DirectiveKind,
    pub target: String,
    /// `None` when the target does not exist.
    pub node: Option<Node>,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    deps: BTreeMap<Node, BTreeSet<Node>>,
    dependents: BTreeMap<Node, BTreeSet<Node>>,
    order: Vec<Node>,
    asset_hashes: BTreeMap<String, [u8; 32]>,
    directives: BTreeMap<String, Vec<ResolvedDirective>>,
    related: BTreeMap<String, Vec<(String, Option<String>)>>,
    missing: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Build the graph for `documents` scanned from `source`.
    pub fn build(documents: &[Document], source: &ContentSource) -> Result<Self, GraphError> {
        let mut graph = Self::default();
        let known: BTreeSet<&str> = documents.iter().map(|d| d.path.as_str()).collect();
        let mut asset_paths: BTreeSet<String> = BTreeSet::new();

        for doc in documents {
            let node = Node::Document(doc.path.clone());
            graph.add_node(node.clone());

            let body = doc.body();
            let mut resolved = Vec::new();
            for d in directive::parse(&body) {
                let target_node = directive::resolve_target(doc.dir(), &d.target).and_then(|p| {
                    classify(d.kind, &p, &known, source)
                });
                match (&target_node, d.kind.is_hard()) {
                    (Some(target), true) => {
                        if let Node::Asset(p) = target {
                            asset_paths.insert(p.clone());
                        }
                        graph.add_edge(node.clone(), target.clone());
                    }
                    (None, true) => graph
                        .missing
                        .entry(doc.path.clone())
                        .or_default()
                        .push(d.target.clone()),
                    _ => {}
                }
                resolved.push(ResolvedDirective {
                    kind: d.kind,
                    target: d.target,
                    node: target_node,
                });
            }
            graph.directives.insert(doc.path.clone(), resolved);

            let related = doc
                .metadata
                .related
                .iter()
                .map(|r| {
                    let hit = directive::resolve_target(doc.dir(), r)
                        .filter(|p| known.contains(p.as_str()));
                    (r.clone(), hit)
                })
                .collect();
            graph.related.insert(doc.path.clone(), related);
        }

        graph.hash_assets(source.root(), asset_paths);
        graph.add_index_nodes(documents);
        graph.check_acyclic()?;
        graph.order = graph.topological_order();
        Ok(graph)
    }

    fn add_node(&mut self, node: Node) {
        self.deps.entry(node.clone()).or_default();
        self.dependents.entry(node).or_default();
    }

    fn add_edge(&mut self, from: Node, to: Node) {
        self.add_node(to.clone());
        self.add_node(from.clone());
        self.deps.entry(from.clone()).or_default().insert(to.clone());
        self.dependents.entry(to).or_default().insert(from);
    }

    /// Hash every referenced asset in parallel. Unreadable assets become missing.
    fn hash_assets(&mut self, root: &Path, paths: BTreeSet<String>) {
        let hashed: Vec<(String, std::io::Result<[u8; 32]>)> = paths
            .into_par_iter()
            .map(|p| {
                let digest = std::fs::read(root.join(&p)).map(|bytes| Sha256::digest(&bytes).into());
                (p, digest)
            })
            .collect();
        for (path, digest) in hashed {
            match digest {
                Ok(d) => {
                    self.asset_hashes.insert(path, d);
                }
                Err(e) => {
                    tracing::warn!(asset = %path, error = %e, "cannot read asset");
                    let node = Node::Asset(path.clone());
                    let users: Vec<Node> = self.dependents(&node).cloned().collect();
                    for user in users {
                        if let Node::Document(doc) = user {
                            self.missing.entry(doc).or_default().push(path.clone());
                        }
                    }
                }
            }
        }
    }

    fn add_index_nodes(&mut self, documents: &[Document]) {
        let home = Node::Index(IndexPage::Home);
        self.add_node(home.clone());
        let mut tagged = false;
        for doc in documents {
            let node = Node::Document(doc.path.clone());
            self.add_edge(home.clone(), node.clone());
            for tag in &doc.metadata.tags {
                let slug = naming::slugify(tag);
                if slug.is_empty() {
                    continue;
                }
                tagged = true;
                self.add_edge(Node::Index(IndexPage::Tag(slug)), node.clone());
                self.add_edge(Node::Index(IndexPage::TagList), node.clone());
            }
        }
        if !tagged {
            self.add_node(Node::Index(IndexPage::TagList));
        }
    }

    /// Three-colour depth-first search; a back-edge is a cycle.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut color: HashMap<&Node, Color> =
            self.deps.keys().map(|n| (n, Color::Unvisited)).collect();
        let mut stack: Vec<&Node> = Vec::new();
        for node in self.deps.keys() {
            if color[node] == Color::Unvisited {
                self.visit(node, &mut color, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node: &'a Node,
        color: &mut HashMap<&'a Node, Color>,
        stack: &mut Vec<&'a Node>,
    ) -> Result<(), GraphError> {
        color.insert(node, Color::InProgress);
        stack.push(node);
        for dep in &self.deps[node] {
            match color[dep] {
                Color::InProgress => {
                    let start = stack.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|n| n.to_string()).collect();
                    path.push(dep.to_string());
                    return Err(GraphError::Cycle { path });
                }
                Color::Unvisited => self.visit(dep, color, stack)?,
                Color::Done => {}
            }
        }
        stack.pop();
        color.insert(node, Color::Done);
        Ok(())
    }

    /// Kahn's algorithm with an ordered ready set for deterministic output.
    fn topological_order(&self) -> Vec<Node> {
        let mut remaining: BTreeMap<&Node, usize> =
            self.deps.iter().map(|(n, d)| (n, d.len())).collect();
        let mut ready: BTreeSet<&Node> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(self.deps.len());
        while let Some(node) = ready.pop_first() {
            order.push(node.clone());
            for dependent in &self.dependents[node] {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
        order
    }

    /// All nodes, dependencies before dependents.
    pub fn order(&self) -> &[Node] {
        &self.order
    }

    pub fn dependencies(&self, node: &Node) -> impl Iterator<Item = &Node> {
        self.deps.get(node).into_iter().flatten()
    }

    pub fn dependents(&self, node: &Node) -> impl Iterator<Item = &Node> {
        self.dependents.get(node).into_iter().flatten()
    }

    pub fn asset_hash(&self, path: &str) -> Option<&[u8; 32]> {
        self.asset_hashes.get(path)
    }

    pub fn assets(&self) -> impl Iterator<Item = &String> {
        self.asset_hashes.keys()
    }

    /// Hard directive targets of `doc` that could not be resolved.
    pub fn missing_for(&self, doc: &str) -> &[String] {
        self.missing.get(doc).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn directives_for(&self, doc: &str) -> &[ResolvedDirective] {
        self.directives.get(doc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Declared related posts of `doc` as `(declared, resolved path)`.
    pub fn related_for(&self, doc: &str) -> &[(String, Option<String>)] {
        self.related.get(doc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every document that transitively depends on `node`.
    pub fn transitive_dependents(&self, node: &Node) -> BTreeSet<Node> {
        let mut seen = BTreeSet::new();
        let mut queue: Vec<&Node> = self.dependents(node).collect();
        while let Some(n) = queue.pop() {
            if seen.insert(n.clone()) {
                queue.extend(self.dependents(n));
            }
        }
        seen
    }
}

/// Decide what a resolved directive target points at.
fn classify(kind: DirectiveKind, path: &str, known: &BTreeSet<&str>, source: &ContentSource) -> Option<Node> {
    match kind {
        DirectiveKind::Include | DirectiveKind::Ref if known.contains(path) => {
            Some(Node::Document(path.to_string()))
        }
        DirectiveKind::Ref => None,
        // A document left out of this build (a draft) is not a raw partial.
        DirectiveKind::Include if source.claims(path) => None,
        DirectiveKind::Include | DirectiveKind::Diagram => source
            .root()
            .join(path)
            .is_file()
            .then(|| Node::Asset(path.to_string())),
    }
}
