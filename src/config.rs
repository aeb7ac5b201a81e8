//! Site configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! overridden by the user's `config.toml` in the content root, which is in
//! turn overridden by command-line flags.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [site]
//! title = "Blog"
//! base_url = "/"            # Prefix for every generated link
//!
//! [build]
//! # concurrency = 4         # Max parallel conversions (omit for auto = CPU cores)
//! continue_on_error = false # Exit 0 even when some documents fail
//! timeout_secs = 30         # Per-document conversion timeout
//! drafts = false            # Include documents marked `draft = true`
//! output_dir = "dist"
//!
//! [cache]
//! dir = ".plume-cache"
//! max_bytes = 268435456     # 256 MiB
//!
//! [converters.asciidoc]
//! command = "asciidoctor"
//! args = ["--embedded", "--out-file", "-", "-"]
//! extensions = ["adoc", "asciidoc"]
//! version = "2"
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse: override just the values you want.
//!
//! ```toml
//! [build]
//! timeout_secs = 120
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `config.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub site: SiteConfig,
    pub build: BuildConfig,
    pub cache: CacheConfig,
    /// External converters keyed by dialect name.
    pub converters: BTreeMap<String, ConverterConfig>,
}

/// Site-wide presentation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Shown in every page header and `<title>`.
    pub title: String,
    /// Prefix for every generated link. Always ends with `/`.
    pub base_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Blog".to_string(),
            base_url: "/".to_string(),
        }
    }
}

impl SiteConfig {
    /// `base_url` joined with a site-relative path.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/{}", path.trim_start_matches('/'))
    }
}

/// Build behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Maximum number of conversions in flight.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub concurrency: Option<usize>,
    pub continue_on_error: bool,
    pub timeout_secs: u64,
    pub drafts: bool,
    pub output_dir: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            continue_on_error: false,
            timeout_secs: 30,
            drafts: false,
            output_dir: "dist".to_string(),
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Persistent artifact cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: String,
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: ".plume-cache".to_string(),
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

/// An external converter: reads the document on stdin, writes HTML to stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConverterConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub extensions: Vec<String>,
    /// Identity component; bump to invalidate cached artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.concurrency == Some(0) {
            return Err(ConfigError::Validation(
                "build.concurrency must be at least 1".into(),
            ));
        }
        if self.build.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "build.timeout_secs must be at least 1".into(),
            ));
        }
        if self.build.output_dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "build.output_dir must not be empty".into(),
            ));
        }
        if !self.site.base_url.starts_with('/') && !self.site.base_url.contains("://") {
            return Err(ConfigError::Validation(
                "site.base_url must be absolute (\"/\" or \"https://...\")".into(),
            ));
        }
        let mut claimed: BTreeMap<String, &str> = BTreeMap::new();
        for (dialect, conv) in &self.converters {
            if conv.command.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "converters.{dialect}.command must not be empty"
                )));
            }
            if conv.extensions.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "converters.{dialect}.extensions must not be empty"
                )));
            }
            for ext in &conv.extensions {
                let ext = ext.trim_start_matches('.').to_ascii_lowercase();
                if let Some(other) = claimed.insert(ext.clone(), dialect) {
                    return Err(ConfigError::Validation(format!(
                        "extension `{ext}` claimed by both converters.{other} and converters.{dialect}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Stock configuration plus the default asciidoc converter.
    pub fn stock() -> Self {
        let mut config = Self::default();
        config.converters.insert(
            "asciidoc".to_string(),
            ConverterConfig {
                command: "asciidoctor".to_string(),
                args: ["--embedded", "--out-file", "-", "-"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                extensions: vec!["adoc".to_string(), "asciidoc".to_string()],
                version: Some("2".to_string()),
            },
        );
        config
    }
}

/// Resolve the effective conversion concurrency from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_concurrency(config: &BuildConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.concurrency.map(|n| n.clamp(1, cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::stock())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(root: &Path) -> Result<Config, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Plume Configuration
# ===================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Place this file at the root of the content directory:
#   content/config.toml
#
# Command-line flags override values set here.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Site
# ---------------------------------------------------------------------------
[site]
# Shown in every page header and <title>.
title = "Blog"

# Prefix for every generated link. Use "/" for a site served from the
# domain root, or e.g. "https://example.com/blog/" for a subdirectory.
base_url = "/"

# ---------------------------------------------------------------------------
# Build
# ---------------------------------------------------------------------------
[build]
# Maximum conversions in flight at once.
# Omit or comment out to auto-detect (= number of CPU cores).
# concurrency = 4

# When true, a build where some documents fail still exits 0.
# The site is written either way.
continue_on_error = false

# Seconds a single document may take to convert before it is failed.
timeout_secs = 30

# Include documents whose front matter says `draft = true`.
drafts = false

# Where the site is published (relative to the working directory).
output_dir = "dist"

# ---------------------------------------------------------------------------
# Cache
# ---------------------------------------------------------------------------
[cache]
# Persistent artifact store. Safe to delete at any time.
dir = ".plume-cache"

# Least-recently-used entries are evicted above this size.
max_bytes = 268435456

# ---------------------------------------------------------------------------
# Converters
# ---------------------------------------------------------------------------
# Markdown (.md, .markdown) is built in. Any other dialect runs an external
# program that reads the document on stdin and writes an HTML fragment to
# stdout. The source path is available as $PLUME_SOURCE_PATH.
[converters.asciidoc]
command = "asciidoctor"
args = ["--embedded", "--out-file", "-", "-"]
extensions = ["adoc", "asciidoc"]
# Part of every fingerprint; bump after upgrading the tool.
version = "2"
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.site.title, "Blog");
        assert_eq!(config.site.base_url, "/");
        assert_eq!(config.build.timeout_secs, 30);
        assert_eq!(config.build.output_dir, "dist");
        assert!(!config.build.continue_on_error);
        assert_eq!(config.cache.dir, ".plume-cache");
        assert_eq!(config.cache.max_bytes, 268_435_456);
        assert!(config.converters.is_empty());
    }

    #[test]
    fn stock_registers_asciidoctor() {
        let config = Config::stock();
        let adoc = &config.converters["asciidoc"];
        assert_eq!(adoc.command, "asciidoctor");
        assert_eq!(adoc.extensions, vec!["adoc", "asciidoc"]);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r##"
[build]
timeout_secs = 5
"##;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.build.timeout_secs, 5);
        assert_eq!(config.build.output_dir, "dist");
        assert_eq!(config.site.title, "Blog");
    }

    #[test]
    fn unknown_keys_rejected() {
        let toml = r##"
[build]
timeout = 5
"##;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn site_url_joins_base() {
        let mut site = SiteConfig::default();
        assert_eq!(site.url("posts/hello/"), "/posts/hello/");
        site.base_url = "https://example.com/blog/".into();
        assert_eq!(site.url("/tags/"), "https://example.com/blog/tags/");
        site.base_url = "/blog".into();
        assert_eq!(site.url("a/"), "/blog/a/");
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.build.concurrency = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.build.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_base_url() {
        let mut config = Config::default();
        config.site.base_url = "blog/".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_shared_extension() {
        let mut config = Config::stock();
        config.converters.insert(
            "other".into(),
            ConverterConfig {
                command: "x".into(),
                args: vec![],
                extensions: vec![".ADOC".into()],
                version: None,
            },
        );
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("adoc"));
    }

    #[test]
    fn stock_config_validates() {
        assert!(Config::stock().validate().is_ok());
    }

    #[test]
    fn effective_concurrency_clamps_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mut build = BuildConfig::default();
        assert_eq!(effective_concurrency(&build), cores);
        build.concurrency = Some(1);
        assert_eq!(effective_concurrency(&build), 1);
        build.concurrency = Some(cores + 100);
        assert_eq!(effective_concurrency(&build), cores);
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_stock_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config, Config::stock());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("config.toml"),
            r##"
[site]
title = "Field Notes"

[converters.asciidoc]
version = "3"
"##,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.site.title, "Field Notes");
        // Merged onto the stock converter, not replacing it
        let adoc = &config.converters["asciidoc"];
        assert_eq!(adoc.version.as_deref(), Some("3"));
        assert_eq!(adoc.command, "asciidoctor");
    }

    #[test]
    fn load_config_adds_converter() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("config.toml"),
            r##"
[converters.rst]
command = "rst2html"
args = ["--no-doc-title"]
extensions = ["rst"]
"##,
        )
        .unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.converters.len(), 2);
        assert_eq!(config.converters["rst"].version, None);
    }

    #[test]
    fn load_config_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "[build\ntimeout_secs = 1").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_validation_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "[build]\ntimeout_secs = 0\n").unwrap();
        assert!(matches!(
            load_config(tmp.path()),
            Err(ConfigError::Validation(_))
        ));
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_overlay_wins() {
        let base: toml::Value = toml::from_str("[build]\ntimeout_secs = 30\ndrafts = false").unwrap();
        let overlay: toml::Value = toml::from_str("[build]\ndrafts = true").unwrap();
        let merged = merge_toml(base, overlay);
        let build = merged.get("build").unwrap();
        assert_eq!(build.get("drafts").unwrap().as_bool(), Some(true));
        assert_eq!(build.get("timeout_secs").unwrap().as_integer(), Some(30));
    }

    #[test]
    fn merge_toml_replaces_arrays() {
        let base: toml::Value = toml::from_str("a = [1, 2]").unwrap();
        let overlay: toml::Value = toml::from_str("a = [3]").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("a").unwrap().as_array().unwrap().len(), 1);
    }

    // =========================================================================
    // stock_config_toml
    // =========================================================================

    #[test]
    fn stock_config_toml_parses_to_stock() {
        let parsed: Config = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(parsed, Config::stock());
    }
}
