//! # Plume
//!
//! An incremental static site generator for blogs. Posts are Markdown or
//! AsciiDoc files on disk; each one is converted to an HTML fragment at most
//! once per distinct input, and the fragments are assembled into a site with
//! index and tag pages.
//!
//! # Architecture: Fingerprinted Pipeline
//!
//! ```text
//! 1. Scan        content/        →  documents + static assets
//! 2. Graph       documents       →  dependency DAG (include / diagram / ref)
//! 3. Fingerprint DAG, bottom-up  →  one content hash per document
//! 4. Convert     fingerprints    →  cached HTML fragments (concurrent)
//! 5. Assemble    fragments       →  in-memory site tree
//! 6. Write       site tree       →  dist/ (staged, then swapped in atomically)
//! ```
//!
//! A document's fingerprint folds in its bytes, its metadata, the identity
//! of its converter and the fingerprints of everything it includes. The
//! conversion cache is keyed by fingerprint alone, so editing a partial
//! rebuilds exactly the posts that include it, and nothing else.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`source`] | Stage 1: lazy walk of the content root |
//! | [`frontmatter`] | TOML / YAML front matter and metadata fallbacks |
//! | [`naming`] | `YYYY-MM-DD-` / `NNN-` filename prefixes and slugs |
//! | [`directive`] | `{{ include }}`, `{{ diagram }}`, `{{ ref }}` parsing and tokens |
//! | [`graph`] | Stage 2: dependency DAG, cycle detection, topological order |
//! | [`fingerprint`] | Stage 3: SHA-256 content fingerprints |
//! | [`convert`] | Stage 4: converter trait, pulldown-cmark and external programs |
//! | [`cache`] | Content-addressed artifact store with single-flight builds |
//! | [`assemble`] | Stage 5: page layout with Maud, ref resolution, index pages |
//! | [`writer`] | Stage 6: staged output and atomic publish |
//! | [`pipeline`] | Orchestration, per-document state, build reports |
//! | [`config`] | `config.toml` loading, merging and validation |
//! | [`output`] | CLI summary formatting |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`types`] | Shared `Document` and `Dialect` types |
//!
//! # Design Decisions
//!
//! ## Directives Survive Conversion as Tokens
//!
//! Converters know nothing about directives. Before conversion each
//! directive is replaced by an opaque token (`plume-include-0-<nonce>`) that
//! any markup language passes through as plain text; after conversion the
//! tokens are swapped for the included HTML or diagram markup. Cross-post
//! links are resolved later still, at assembly, so a renamed target never
//! invalidates the cached fragment that links to it.
//!
//! ## External Converters Are Just Programs
//!
//! AsciiDoc (or any other dialect) is handled by piping the tokenized body
//! through a configured command. The converter's version string is part of
//! every fingerprint it produces, so upgrading a converter invalidates
//! exactly its own artifacts.
//!
//! ## The Output Directory Is Never Half-Written
//!
//! The site is written into a staging directory next to the output and made
//! live with a single rename. An interrupted build leaves the previous site
//! untouched. A rebuild that produces byte-identical output does not touch
//! the output at all.

pub mod assemble;
pub mod cache;
pub mod config;
pub mod convert;
pub mod directive;
pub mod fingerprint;
pub mod frontmatter;
pub mod graph;
pub mod logging;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod source;
pub mod types;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_helpers;
