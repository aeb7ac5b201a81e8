//! Filename conventions for source documents.
//!
//! Post files may carry an ordering prefix that is stripped from the public
//! slug. Two prefixes are recognised:
//!
//! - a numeric prefix: `020-my-first-post.md`
//! - a date prefix: `2024-05-01-my-first-post.md`
//!
//! A date prefix doubles as the publish date when the front matter does not
//! declare one.
//!
//! ## Display Titles
//!
//! Dashes in the name portion become spaces for display, so
//! `020-my-first-post` reads as "my first post" when nothing better exists.

use chrono::NaiveDate;

/// Result of parsing a document file stem like `2024-05-01-hello-world`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStem {
    /// Number prefix if present (e.g., `20` from `020-hello`)
    pub number: Option<u32>,
    /// Date prefix if present (e.g., `2024-05-01` from `2024-05-01-hello`)
    pub date: Option<NaiveDate>,
    /// Name part after any prefix, dashes preserved.
    pub name: String,
    /// Display title: name with dashes converted to spaces.
    pub display_title: String,
}

/// Parse a document stem following the `NNN-name` or `YYYY-MM-DD-name` conventions.
///
/// - `"2024-05-01-hello-world"` → date=2024-05-01, name="hello-world"
/// - `"020-hello-world"` → number=Some(20), name="hello-world"
/// - `"001"` → number=Some(1), name=""
/// - `"hello-world"` → no prefix, name="hello-world", display_title="hello world"
pub fn parse_stem(stem: &str) -> ParsedStem {
    if stem.len() >= 10
        && stem.is_char_boundary(10)
        && let Ok(date) = NaiveDate::parse_from_str(&stem[..10], "%Y-%m-%d")
    {
        let rest = stem[10..].strip_prefix('-').unwrap_or(&stem[10..]);
        return ParsedStem {
            number: None,
            date: Some(date),
            name: rest.to_string(),
            display_title: rest.replace('-', " "),
        };
    }
    if let Some(dash_pos) = stem.find('-')
        && let Ok(num) = stem[..dash_pos].parse::<u32>()
    {
        let raw = &stem[dash_pos + 1..];
        return ParsedStem {
            number: Some(num),
            date: None,
            name: raw.to_string(),
            display_title: raw.replace('-', " "),
        };
    }
    if let Ok(num) = stem.parse::<u32>() {
        return ParsedStem {
            number: Some(num),
            date: None,
            name: String::new(),
            display_title: String::new(),
        };
    }
    ParsedStem {
        number: None,
        date: None,
        name: stem.to_string(),
        display_title: stem.replace('-', " "),
    }
}

/// Turn free text into a URL path segment.
///
/// ASCII letters and digits are lowercased and kept; every other run of
/// characters collapses into a single dash. Non-ASCII letters are kept as-is.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_with_multi_word_name() {
        let p = parse_stem("020-My-Best-Post");
        assert_eq!(p.number, Some(20));
        assert_eq!(p.name, "My-Best-Post");
        assert_eq!(p.display_title, "My Best Post");
    }

    #[test]
    fn number_only_no_dash() {
        let p = parse_stem("001");
        assert_eq!(p.number, Some(1));
        assert_eq!(p.name, "");
        assert_eq!(p.display_title, "");
    }

    #[test]
    fn unnumbered_with_dashes() {
        let p = parse_stem("wip-drafts");
        assert_eq!(p.number, None);
        assert_eq!(p.date, None);
        assert_eq!(p.name, "wip-drafts");
        assert_eq!(p.display_title, "wip drafts");
    }

    #[test]
    fn date_prefix_is_parsed() {
        let p = parse_stem("2024-05-01-fibers-and-actors");
        assert_eq!(p.date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(p.number, None);
        assert_eq!(p.name, "fibers-and-actors");
        assert_eq!(p.display_title, "fibers and actors");
    }

    #[test]
    fn invalid_date_falls_back_to_number_prefix() {
        let p = parse_stem("2024-13-01-nope");
        assert_eq!(p.date, None);
        assert_eq!(p.number, Some(2024));
        assert_eq!(p.name, "13-01-nope");
    }

    #[test]
    fn zero_prefix() {
        let p = parse_stem("000-First");
        assert_eq!(p.number, Some(0));
        assert_eq!(p.display_title, "First");
    }

    #[test]
    fn multibyte_stem_does_not_panic() {
        let p = parse_stem("ünïcödé-pöst");
        assert_eq!(p.name, "ünïcödé-pöst");
    }

    // =========================================================================
    // slugify
    // =========================================================================

    #[test]
    fn slugify_lowercases_and_dashes() {
        assert_eq!(slugify("Namespace Sandboxing"), "namespace-sandboxing");
    }

    #[test]
    fn slugify_collapses_punctuation_runs() {
        assert_eq!(slugify("  IO -- multiplexing!! "), "io-multiplexing");
    }

    #[test]
    fn slugify_empty() {
        assert_eq!(slugify("!!!"), "");
    }
}
