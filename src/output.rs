//! CLI output formatting for builds, checks and the cache.
//!
//! # Information-First Display
//!
//! Output is **information-centric, not file-centric**. Each document leads
//! with its positional index and title, followed by `→` and the page it
//! produced; the source path follows as indented context. Failures lead with
//! the source path instead, because that is the file the user has to open.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! Documents
//! 001 Fibers → fibers/index.html (cached)
//!     Source: 2024-05-01-fibers.md
//! 002 Actors → actors/index.html
//!     Source: runtime/010-actors.md
//!
//! Failed
//!     sandboxing.adoc: conversion timed out after 30s
//!
//! Skipped
//!     roundup.md (blocked by sandboxing.adoc)
//!
//! Pages
//!     tags/index.html
//!     index.html (skipped, blocked by sandboxing.adoc)
//!
//! Warnings
//!     runtime/010-actors.md: unresolved reference `ghost.md`
//!
//! Cache: 1 cached, 1 converted (2 total)
//! Published 6 files (build 3f2a9c01d4e5b6a7)
//! Built 2 of 4 documents in 0.42s, 1 failed, 1 skipped
//! ```
//!
//! A build stopped by a fatal error or Ctrl-C still lists what it got to:
//!
//! ```text
//! Failed
//!     sandboxing.adoc: converter `asciidoctor` unavailable: command not found
//!
//! Stopped after 1 of 4 documents, 1 failed
//! ```
//!
//! ## Check
//!
//! ```text
//! Build order
//! 001 footer.md
//! 002 2024-05-01-fibers.md
//!
//! Problems
//!     2024-05-01-fibers.md: missing dependency: ghost.md
//!
//! Checked 2 documents, 1 problem
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::Usage;
use crate::pipeline::{BuildReport, CheckReport, DocumentOutcome, DocumentState};
use crate::writer::PublishOutcome;
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 problem`, `2 problems`.
fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// Human-readable byte count with binary units.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn blocked_suffix(blockers: &[String]) -> String {
    format!("blocked by {}", blockers.join(", "))
}

// ============================================================================
// Build
// ============================================================================

/// Format the summary of a finished build.
pub fn format_build_report(report: &BuildReport) -> Vec<String> {
    let mut lines = Vec::new();

    let succeeded: Vec<_> = report.succeeded().collect();
    if !succeeded.is_empty() {
        lines.push("Documents".to_string());
        for (i, doc) in succeeded.iter().enumerate() {
            let cached = if doc.state == DocumentState::CacheHit {
                " (cached)"
            } else {
                ""
            };
            lines.push(format!(
                "{} {} \u{2192} {}{}",
                format_index(i + 1),
                doc.title,
                doc.output,
                cached
            ));
            lines.push(format!("{}Source: {}", indent(1), doc.path));
        }
    }

    push_problem_documents(&mut lines, &report.documents);

    if !report.pages.is_empty() || !report.skipped_pages.is_empty() {
        push_section(&mut lines, "Pages");
        for page in &report.pages {
            lines.push(format!("{}{}", indent(1), page));
        }
        for (page, blockers) in &report.skipped_pages {
            lines.push(format!(
                "{}{} (skipped, {})",
                indent(1),
                page,
                blocked_suffix(blockers)
            ));
        }
    }

    if !report.warnings.is_empty() {
        push_section(&mut lines, "Warnings");
        for warning in &report.warnings {
            lines.push(format!("{}{}", indent(1), warning));
        }
    }

    lines.push(String::new());
    lines.push(format!("Cache: {}", report.cache));
    lines.push(match &report.publish {
        PublishOutcome::Published { build, files } => {
            let id = build
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("Published {} (build {})", plural(*files, "file"), id)
        }
        PublishOutcome::Unchanged => "Output unchanged".to_string(),
    });

    let failed = report.failed().count();
    let skipped = report.skipped().count();
    let mut summary = format!(
        "Built {} of {} in {:.2}s",
        succeeded.len(),
        plural(report.documents.len(), "document"),
        report.elapsed.as_secs_f64()
    );
    if failed > 0 {
        summary.push_str(&format!(", {failed} failed"));
    }
    if skipped > 0 {
        summary.push_str(&format!(", {skipped} skipped"));
    }
    lines.push(summary);

    lines
}

/// The `Failed` and `Skipped` sections.
fn push_problem_documents(lines: &mut Vec<String>, documents: &[DocumentOutcome]) {
    let failed: Vec<_> = documents
        .iter()
        .filter(|d| d.state == DocumentState::Failed)
        .collect();
    if !failed.is_empty() {
        push_section(lines, "Failed");
        for doc in failed {
            let cause = doc.cause.as_deref().unwrap_or("unknown error");
            lines.push(format!("{}{}: {}", indent(1), doc.path, cause));
        }
    }

    let skipped: Vec<_> = documents
        .iter()
        .filter(|d| d.state == DocumentState::Skipped)
        .collect();
    if !skipped.is_empty() {
        push_section(lines, "Skipped");
        for doc in skipped {
            lines.push(format!(
                "{}{} ({})",
                indent(1),
                doc.path,
                blocked_suffix(&doc.blocked_by)
            ));
        }
    }
}

fn push_section(lines: &mut Vec<String>, title: &str) {
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(title.to_string());
}

/// Print the build summary to stdout.
pub fn print_build_report(report: &BuildReport) {
    for line in format_build_report(report) {
        println!("{}", line);
    }
}

/// Format what a build that ended in a fatal error had done so far.
pub fn format_stopped_build(documents: &[DocumentOutcome]) -> Vec<String> {
    let mut lines = Vec::new();
    push_problem_documents(&mut lines, documents);
    if !lines.is_empty() {
        lines.push(String::new());
    }
    let done = documents.iter().filter(|d| d.state.is_success()).count();
    let failed = documents
        .iter()
        .filter(|d| d.state == DocumentState::Failed)
        .count();
    let mut summary = format!(
        "Stopped after {} of {}",
        done,
        plural(documents.len(), "document")
    );
    if failed > 0 {
        summary.push_str(&format!(", {failed} failed"));
    }
    lines.push(summary);
    lines
}

pub fn print_stopped_build(documents: &[DocumentOutcome]) {
    for line in format_stopped_build(documents) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

/// Format the result of `plume check`.
pub fn format_check_report(report: &CheckReport) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.order.is_empty() {
        lines.push("Build order".to_string());
        for (i, path) in report.order.iter().enumerate() {
            lines.push(format!("{} {}", format_index(i + 1), path));
        }
    }
    if !report.problems.is_empty() {
        push_section(&mut lines, "Problems");
        for p in &report.problems {
            lines.push(format!("{}{}: {}", indent(1), p.document, p.message));
        }
    }
    lines.push(String::new());
    lines.push(format!(
        "Checked {}, {}",
        plural(report.order.len(), "document"),
        plural(report.problems.len(), "problem")
    ));
    lines
}

pub fn print_check_report(report: &CheckReport) {
    for line in format_check_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Format `plume cache-stats`.
pub fn format_cache_usage(dir: &Path, usage: &Usage) -> Vec<String> {
    vec![
        format!("Cache {}", dir.display()),
        format!("{}Entries: {}", indent(1), usage.entries),
        format!(
            "{}Size: {} of {}",
            indent(1),
            format_bytes(usage.bytes),
            format_bytes(usage.max_bytes)
        ),
    ]
}

pub fn print_cache_usage(dir: &Path, usage: &Usage) {
    for line in format_cache_usage(dir, usage) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::AssemblyWarning;
    use crate::cache::CacheStats;
    use crate::pipeline::{CheckProblem, DocumentOutcome};
    use std::path::PathBuf;
    use std::time::Duration;

    fn outcome(path: &str, title: &str, state: DocumentState) -> DocumentOutcome {
        DocumentOutcome {
            path: path.into(),
            title: title.into(),
            output: format!("{}/index.html", title.to_lowercase()),
            state,
            fingerprint: None,
            cause: None,
            blocked_by: vec![],
        }
    }

    fn report(documents: Vec<DocumentOutcome>) -> BuildReport {
        BuildReport {
            documents,
            pages: vec!["index.html".into()],
            skipped_pages: vec![],
            warnings: vec![],
            cache: CacheStats { hits: 1, misses: 1 },
            publish: PublishOutcome::Published {
                build: PathBuf::from("/site/.dist.builds/3f2a9c01d4e5b6a7"),
                files: 4,
            },
            elapsed: Duration::from_millis(420),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn format_index_pads_to_three() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn indent_is_four_spaces_per_level() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(2), "        ");
    }

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1, "file"), "1 file");
        assert_eq!(plural(0, "file"), "0 files");
        assert_eq!(plural(3, "problem"), "3 problems");
    }

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(256 * 1024 * 1024), "256.0 MiB");
    }

    // =========================================================================
    // Build report
    // =========================================================================

    #[test]
    fn build_report_leads_with_titles() {
        let lines = format_build_report(&report(vec![
            outcome("2024-05-01-fibers.md", "Fibers", DocumentState::CacheHit),
            outcome("actors.md", "Actors", DocumentState::Converted),
        ]));
        assert_eq!(lines[0], "Documents");
        assert_eq!(lines[1], "001 Fibers \u{2192} fibers/index.html (cached)");
        assert_eq!(lines[2], "    Source: 2024-05-01-fibers.md");
        assert_eq!(lines[3], "002 Actors \u{2192} actors/index.html");
        assert!(lines.contains(&"Cache: 1 cached, 1 converted (2 total)".to_string()));
        assert!(lines.contains(&"Published 4 files (build 3f2a9c01d4e5b6a7)".to_string()));
        assert_eq!(lines.last().unwrap(), "Built 2 of 2 documents in 0.42s");
    }

    #[test]
    fn build_report_lists_failures_and_skips() {
        let mut failed = outcome("b.md", "B", DocumentState::Failed);
        failed.cause = Some("conversion timed out after 30s".into());
        let mut skipped = outcome("a.md", "A", DocumentState::Skipped);
        skipped.blocked_by = vec!["b.md".into()];
        let mut r = report(vec![skipped, failed]);
        r.pages.clear();
        r.skipped_pages = vec![("index.html".into(), vec!["a.md".into(), "b.md".into()])];
        r.warnings = vec![AssemblyWarning {
            document: "c.md".into(),
            message: "unresolved reference `ghost.md`".into(),
        }];
        r.publish = PublishOutcome::Unchanged;

        let lines = format_build_report(&r);
        assert_eq!(lines[0], "Failed");
        assert!(lines.contains(&"    b.md: conversion timed out after 30s".to_string()));
        assert!(lines.contains(&"    a.md (blocked by b.md)".to_string()));
        assert!(lines.contains(&"    index.html (skipped, blocked by a.md, b.md)".to_string()));
        assert!(lines.contains(&"    c.md: unresolved reference `ghost.md`".to_string()));
        assert!(lines.contains(&"Output unchanged".to_string()));
        assert_eq!(
            lines.last().unwrap(),
            "Built 0 of 2 documents in 0.42s, 1 failed, 1 skipped"
        );
    }

    #[test]
    fn stopped_build_lists_what_failed() {
        let mut failed = outcome("b.md", "B", DocumentState::Failed);
        failed.cause = Some("cancelled".into());
        let lines = format_stopped_build(&[
            outcome("a.md", "A", DocumentState::Converted),
            failed,
            outcome("c.md", "C", DocumentState::Fingerprinted),
        ]);
        assert_eq!(
            lines,
            vec![
                "Failed".to_string(),
                "    b.md: cancelled".to_string(),
                String::new(),
                "Stopped after 1 of 3 documents, 1 failed".to_string(),
            ]
        );
    }

    #[test]
    fn stopped_build_before_any_document() {
        assert_eq!(format_stopped_build(&[]), vec!["Stopped after 0 of 0 documents"]);
    }

    // =========================================================================
    // Check and cache
    // =========================================================================

    #[test]
    fn check_report_counts_problems() {
        let report = CheckReport {
            order: vec!["footer.md".into(), "fibers.md".into()],
            problems: vec![CheckProblem {
                document: "fibers.md".into(),
                message: "missing dependency: ghost.md".into(),
            }],
        };
        let lines = format_check_report(&report);
        assert_eq!(lines[0], "Build order");
        assert_eq!(lines[1], "001 footer.md");
        assert!(lines.contains(&"    fibers.md: missing dependency: ghost.md".to_string()));
        assert_eq!(lines.last().unwrap(), "Checked 2 documents, 1 problem");
    }

    #[test]
    fn cache_usage_lines() {
        let usage = Usage {
            entries: 3,
            bytes: 2048,
            max_bytes: 1 << 20,
        };
        let lines = format_cache_usage(Path::new(".plume-cache"), &usage);
        assert_eq!(
            lines,
            vec![
                "Cache .plume-cache".to_string(),
                "    Entries: 3".to_string(),
                "    Size: 2.0 KiB of 1.0 MiB".to_string(),
            ]
        );
    }
}
