//! Front matter parsing and metadata resolution.
//!
//! A document may open with a metadata block in either TOML or YAML:
//!
//! ```text
//! +++                              ---
//! title = "Fibers"                 title: Fibers
//! date = 2024-05-01                date: 2024-05-01
//! tags = ["runtime"]               tags: [runtime]
//! +++                              ---
//! ```
//!
//! Unknown keys are rejected to catch typos early, the same policy as
//! `config.toml`.
//!
//! ## Resolution
//!
//! Every field has a fallback so a bare markup file is a valid post:
//!
//! | Field | Order |
//! |-------|-------|
//! | title | front matter → first heading line → filename |
//! | date  | front matter → `YYYY-MM-DD-` filename prefix → none |
//! | slug  | front matter → filename without ordering prefix |

use crate::naming::{self, parse_stem};
use crate::types::Dialect;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Raw front matter as written by the author. All keys are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub date: Option<String>,
    pub tags: Vec<String>,
    pub slug: Option<String>,
    pub draft: bool,
    pub related: Vec<String>,
    pub dialect: Option<String>,
}

/// Fully resolved document metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub title: String,
    pub date: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub slug: String,
    pub draft: bool,
    /// Source paths of related posts, exactly as declared.
    pub related: Vec<String>,
    /// Dialect override; `None` means "decided by the file extension".
    pub dialect: Option<Dialect>,
}

/// Outcome of splitting and parsing a document's front matter.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub metadata: Metadata,
    pub body_offset: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Format {
    Toml,
    Yaml,
}

/// Locate a leading front matter block.
///
/// Returns `(format, block_text, body_offset)` or `None` when the document
/// has no front matter. An opening fence without a closing one is an error.
fn split(content: &str) -> Result<Option<(Format, &str, usize)>, String> {
    let (format, fence) = if content.starts_with("+++") {
        (Format::Toml, "+++")
    } else if content.starts_with("---") {
        (Format::Yaml, "---")
    } else {
        return Ok(None);
    };
    let first_line_end = match content.find('\n') {
        Some(i) => i + 1,
        None => return Err(format!("unterminated front matter (missing closing `{fence}`)")),
    };
    if content[..first_line_end].trim_end() != fence {
        return Ok(None);
    }
    let mut offset = first_line_end;
    for line in content[first_line_end..].split_inclusive('\n') {
        if line.trim_end() == fence {
            let block = &content[first_line_end..offset];
            return Ok(Some((format, block, offset + line.len())));
        }
        offset += line.len();
    }
    Err(format!("unterminated front matter (missing closing `{fence}`)"))
}

fn parse_toml(block: &str) -> Result<FrontMatter, String> {
    let mut table: toml::Table = toml::from_str(block).map_err(|e| e.message().to_string())?;
    // Bare TOML dates are datetime values; normalise them to strings.
    if let Some(toml::Value::Datetime(dt)) = table.get("date") {
        let text = dt.to_string();
        table.insert("date".into(), toml::Value::String(text));
    }
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| e.message().to_string())
}

fn parse_yaml(block: &str) -> Result<FrontMatter, String> {
    if block.trim().is_empty() {
        return Ok(FrontMatter::default());
    }
    serde_yaml_ng::from_str(block).map_err(|e| e.to_string())
}

/// Parse the front matter of `content` and resolve metadata for a document
/// whose file stem is `stem`.
pub fn parse(content: &str, stem: &str) -> Parsed {
    let (front, body_offset, error) = match split(content) {
        Ok(None) => (FrontMatter::default(), 0, None),
        Ok(Some((format, block, offset))) => {
            let parsed = match format {
                Format::Toml => parse_toml(block),
                Format::Yaml => parse_yaml(block),
            };
            match parsed {
                Ok(front) => (front, offset, None),
                Err(e) => (FrontMatter::default(), offset, Some(e)),
            }
        }
        Err(e) => (FrontMatter::default(), 0, Some(e)),
    };

    let body = &content[body_offset..];
    let (metadata, date_error) = resolve(front, stem, body);
    Parsed {
        metadata,
        body_offset,
        error: error.or(date_error),
    }
}

fn resolve(front: FrontMatter, stem: &str, body: &str) -> (Metadata, Option<String>) {
    let parsed = parse_stem(stem);

    let (date, date_error) = match front.date.as_deref() {
        Some(text) => match NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d") {
            Ok(d) => (Some(d), None),
            Err(e) => (parsed.date, Some(format!("invalid date `{text}`: {e}"))),
        },
        None => (parsed.date, None),
    };

    let fallback_title = if parsed.display_title.is_empty() {
        stem.to_string()
    } else {
        parsed.display_title.clone()
    };
    let title = front
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| first_heading(body))
        .unwrap_or(fallback_title);

    let slug = front
        .slug
        .map(|s| naming::slugify(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            let from_name = naming::slugify(&parsed.name);
            if from_name.is_empty() {
                naming::slugify(stem)
            } else {
                from_name
            }
        });

    let mut tags: Vec<String> = front
        .tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();

    let metadata = Metadata {
        title,
        date,
        tags,
        slug,
        draft: front.draft,
        related: front.related,
        dialect: front.dialect.map(Dialect::new),
    };
    (metadata, date_error)
}

/// First `# Heading` (markdown) or `= Heading` (asciidoc) line of the body.
fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .find_map(|line| {
            line.strip_prefix("# ")
                .or_else(|| line.strip_prefix("= "))
                .map(|t| t.trim().to_string())
        })
        .filter(|t| !t.is_empty())
}
