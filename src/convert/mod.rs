//! Converter adapter: one uniform interface over every markup dialect.
//!
//! | Dialect | Converter | Runs |
//! |---|---|---|
//! | `markdown` | [`MarkdownConverter`] | in process (`pulldown-cmark`) |
//! | anything configured | [`CommandConverter`] | external program, stdin → stdout |
//!
//! Converters are black boxes: text in, HTML out. They may be slow and they
//! may fail. The orchestrator owns timeouts and cancellation, and it tells
//! the failure modes apart:
//!
//! - [`ConvertError::Conversion`]: bad input, fails only that document
//! - [`ConvertError::Unavailable`]: tool missing, fails the whole build

pub mod command;
pub mod markdown;

pub use command::CommandConverter;
pub use markdown::MarkdownConverter;

use crate::config::ConverterConfig;
use crate::types::Dialect;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Conversion failures. `Clone` because one result is shared by every caller
/// waiting on the same fingerprint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    #[error("conversion failed: {0}")]
    Conversion(String),
    #[error("conversion timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("converter `{program}` unavailable: {reason}")]
    Unavailable { program: String, reason: String },
    #[error("unsupported dialect `{0}`")]
    UnsupportedDialect(Dialect),
    #[error("cancelled")]
    Cancelled,
}

impl ConvertError {
    /// Errors that make the rest of the build pointless.
    pub fn is_build_fatal(&self) -> bool {
        matches!(self, ConvertError::Unavailable { .. })
    }
}

/// What a converter receives: directives already tokenized, front matter removed.
#[derive(Debug, Clone)]
pub struct ConvertInput {
    /// Root-relative source path, for diagnostics.
    pub path: String,
    pub text: String,
}

#[async_trait]
pub trait Converter: Send + Sync {
    fn dialect(&self) -> &Dialect;

    /// File extensions (lowercase, no dot) this converter claims.
    fn extensions(&self) -> &[String];

    /// Name and version; part of every fingerprint this converter produces.
    fn identity(&self) -> String;

    async fn convert(&self, input: &ConvertInput) -> Result<String, ConvertError>;
}

/// Dialect → converter lookup.
#[derive(Default, Clone)]
pub struct ConverterRegistry {
    by_dialect: BTreeMap<Dialect, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in markdown plus one [`CommandConverter`] per configured dialect.
    /// A configured `markdown` entry replaces the built-in.
    pub fn from_config(converters: &BTreeMap<String, ConverterConfig>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MarkdownConverter::new()));
        for (dialect, cfg) in converters {
            registry.register(Arc::new(CommandConverter::from_config(
                Dialect::new(dialect),
                cfg,
            )));
        }
        registry
    }

    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        self.by_dialect.insert(converter.dialect().clone(), converter);
    }

    pub fn for_dialect(&self, dialect: &Dialect) -> Result<Arc<dyn Converter>, ConvertError> {
        self.by_dialect
            .get(dialect)
            .cloned()
            .ok_or_else(|| ConvertError::UnsupportedDialect(dialect.clone()))
    }

    /// Extension allowlist for the content reader.
    pub fn extension_map(&self) -> BTreeMap<String, Dialect> {
        self.by_dialect
            .iter()
            .flat_map(|(dialect, c)| {
                c.extensions()
                    .iter()
                    .map(move |ext| (ext.to_ascii_lowercase(), dialect.clone()))
            })
            .collect()
    }

    pub fn dialects(&self) -> impl Iterator<Item = &Dialect> {
        self.by_dialect.keys()
    }
}
