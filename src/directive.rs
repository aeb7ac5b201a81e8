//! Inline directives: `{{ include "..." }}`, `{{ diagram "..." }}`, `{{ ref "..." }}`.
//!
//! Directives are found with a plain scan over the body text, without
//! rendering the document, so the dependency graph can be built before any
//! converter runs. Text inside fenced code blocks (```` ``` ```` or `~~~`)
//! is left alone, so a post can show directive syntax.
//!
//! Before conversion every recognised directive is swapped for an opaque
//! token (`plume-include-0-1a2b3c4d`). Tokens are plain ASCII words, so every
//! converter passes them through untouched, including inside link targets.
//! After conversion, include and diagram tokens are spliced with HTML; ref
//! tokens survive into the cached artifact and are resolved by the site
//! assembler.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirectiveKind {
    Include,
    Diagram,
    Ref,
}

impl DirectiveKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "include" => Some(Self::Include),
            "diagram" => Some(Self::Diagram),
            "ref" => Some(Self::Ref),
            _ => None,
        }
    }

    fn token_word(self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Diagram => "diagram",
            Self::Ref => "ref",
        }
    }

    /// Hard directives need their target before the document can be converted.
    pub fn is_hard(self) -> bool {
        matches!(self, Self::Include | Self::Diagram)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// Target exactly as written.
    pub target: String,
    /// Byte range of the whole `{{ ... }}` in the body.
    pub span: Range<usize>,
}

/// Find every recognised directive in `body`, in order of appearance.
pub fn parse(body: &str) -> Vec<Directive> {
    let fenced = fenced_blocks(body);
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(open) = body[cursor..].find("{{") {
        let start = cursor + open;
        if let Some(block) = fenced.iter().find(|b| b.contains(&start)) {
            cursor = block.end;
            continue;
        }
        let Some(close) = body[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        let inner = body[start + 2..end - 2].trim();
        match parse_inner(inner) {
            Some((kind, target)) => {
                found.push(Directive {
                    kind,
                    target,
                    span: start..end,
                });
                cursor = end;
            }
            None => cursor = start + 2,
        }
    }
    found
}

/// Byte ranges of fenced code blocks, fences included. An unclosed fence
/// runs to the end of the body.
fn fenced_blocks(body: &str) -> Vec<Range<usize>> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, char, usize)> = None;
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_start_matches(' ');
        let fence = if line.len() - trimmed.len() <= 3 {
            fence_of(trimmed)
        } else {
            None
        };
        match (open, fence) {
            (None, Some((c, n))) => open = Some((offset, c, n)),
            (Some((start, c, n)), Some((c2, n2)))
                if c2 == c && n2 >= n && trimmed.trim_end().len() == n2 =>
            {
                blocks.push(start..offset + line.len());
                open = None;
            }
            _ => {}
        }
        offset += line.len();
    }
    if let Some((start, ..)) = open {
        blocks.push(start..body.len());
    }
    blocks
}

/// Fence character and run length when `line` starts a code fence.
fn fence_of(line: &str) -> Option<(char, usize)> {
    let c = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let n = line.chars().take_while(|x| *x == c).count();
    (n >= 3).then_some((c, n))
}

fn parse_inner(inner: &str) -> Option<(DirectiveKind, String)> {
    let (name, rest) = inner.split_once(char::is_whitespace)?;
    let kind = DirectiveKind::from_name(name)?;
    let rest = rest.trim();
    let quoted = rest.strip_prefix('"')?.strip_suffix('"')?;
    if quoted.is_empty() || quoted.contains('"') {
        return None;
    }
    Some((kind, quoted.to_string()))
}

/// Token that stands in for directive `index` of `kind` in a document.
pub fn token(kind: DirectiveKind, index: usize, nonce: &str) -> String {
    format!("plume-{}-{}-{}", kind.token_word(), index, nonce)
}

/// Replace each directive with its token. Indices are counted per kind.
pub fn tokenize(body: &str, directives: &[Directive], nonce: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    let mut counters = [0usize; 3];
    for d in directives {
        out.push_str(&body[last..d.span.start]);
        let slot = &mut counters[d.kind as usize];
        out.push_str(&token(d.kind, *slot, nonce));
        *slot += 1;
        last = d.span.end;
    }
    out.push_str(&body[last..]);
    out
}

/// Replace a token in converted HTML.
///
/// Block-level tokens usually come back wrapped in a paragraph, which would be
/// invalid around a spliced fragment, so `<p>TOKEN</p>` is replaced first.
pub fn splice(html: &str, token: &str, replacement: &str) -> String {
    let wrapped = format!("<p>{token}</p>");
    html.replace(&wrapped, replacement).replace(token, replacement)
}

/// Resolve a directive target against the directory of the including document.
///
/// A leading `/` anchors the path at the content root. `.` and `..` segments
/// are normalised; escaping above the root yields `None`.
pub fn resolve_target(from_dir: &str, target: &str) -> Option<String> {
    let joined = match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None if from_dir.is_empty() => target.to_string(),
        None => format!("{from_dir}/{target}"),
    };
    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
