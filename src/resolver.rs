use std::fmt;

use regex::Regex;

use crate::document::{LineRange, Reference};
use crate::snapshot::Snapshot;

/// Context window (lines each side) for line-anchored resolutions.
const WINDOW: usize = 2;

/// Outcome of a single resolution strategy on one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    NoMatch,
    Unique(LineRange),
    Ambiguous(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    MissingFile(String),
    UnsafePath(String),
    Unreadable(String),
    /// A reference may never override the manifest's pinned revision.
    RevisionOverride { declared: String },
    MissingRange,
    InvertedRange { start: usize, end: usize },
    OutOfBounds { start: usize, end: usize, line_count: usize },
    SymbolAbsent { symbol: String, start: usize, end: usize },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerifyError::MissingFile(file) => write!(f, "file not found under snapshot: {file}"),
            VerifyError::UnsafePath(file) => write!(f, "file path escapes the snapshot root: {file}"),
            VerifyError::Unreadable(e) => write!(f, "{e}"),
            VerifyError::RevisionOverride { declared } => write!(
                f,
                "reference revision '{declared}' disagrees with manifest.repo_revision"
            ),
            VerifyError::MissingRange => write!(f, "reference missing lines.start/end"),
            VerifyError::InvertedRange { start, end } => {
                write!(f, "lines.start ({start}) > lines.end ({end})")
            }
            VerifyError::OutOfBounds {
                start,
                end,
                line_count,
            } => write!(f, "lines [{start},{end}] out of range (file has {line_count} lines)"),
            VerifyError::SymbolAbsent { symbol, start, end } => {
                write!(f, "symbol '{symbol}' not found in lines [{start},{end}]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    Unreadable(String),
    /// No strategy produced any occurrence of the symbol.
    NoOccurrence { symbol: String },
    /// A strategy matched more than once. Resolution never guesses; the
    /// author must supply an explicit range.
    Ambiguous {
        symbol: String,
        stage: &'static str,
        candidates: usize,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolveError::Unreadable(e) => write!(f, "{e}"),
            ResolveError::NoOccurrence { symbol } => {
                write!(f, "symbol '{symbol}' not found under any resolution stage")
            }
            ResolveError::Ambiguous {
                symbol,
                stage,
                candidates,
            } => write!(
                f,
                "symbol '{symbol}' is ambiguous: {candidates} candidates in the {stage} stage; specify lines manually"
            ),
        }
    }
}

/// Check an existing citation against the snapshot: the file must exist, the
/// range must be well-formed and in bounds, and the literal symbol must occur
/// inside the 1-indexed inclusive slice.
pub fn verify(reference: &Reference, snapshot: &Snapshot, expected_revision: &str) -> Result<(), VerifyError> {
    if reference.file.is_empty() {
        return Err(VerifyError::MissingFile("<empty>".to_string()));
    }
    if snapshot.resolve_file(&reference.file).is_err() {
        return Err(VerifyError::UnsafePath(reference.file.clone()));
    }
    if !snapshot.has_file(&reference.file) {
        return Err(VerifyError::MissingFile(reference.file.clone()));
    }
    if let Some(declared) = &reference.repo_revision
        && declared != expected_revision
    {
        return Err(VerifyError::RevisionOverride {
            declared: declared.clone(),
        });
    }
    let range = reference.lines.ok_or(VerifyError::MissingRange)?;
    if range.start > range.end {
        return Err(VerifyError::InvertedRange {
            start: range.start,
            end: range.end,
        });
    }
    let lines = snapshot
        .read_lines(&reference.file)
        .map_err(|e| VerifyError::Unreadable(e.to_string()))?;
    if range.start < 1 || range.end > lines.len() {
        return Err(VerifyError::OutOfBounds {
            start: range.start,
            end: range.end,
            line_count: lines.len(),
        });
    }
    if !reference.symbol.is_empty() {
        let slice = lines[range.start - 1..range.end].join("\n");
        if !slice.contains(&reference.symbol) {
            return Err(VerifyError::SymbolAbsent {
                symbol: reference.symbol.clone(),
                start: range.start,
                end: range.end,
            });
        }
    }
    Ok(())
}

type Strategy = fn(&[String], &str, &str) -> Resolution;

/// Ordered resolution chain. Short-circuits on the first `Unique`, fails on
/// the first `Ambiguous`, falls through on `NoMatch`.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("definition-block", definition_blocks),
    ("assignment", assignments),
    ("substring", substrings),
];

/// Derive a line range for a reference that has no explicit one. Only called
/// in fill mode; the result is a proposal, never written here.
pub fn resolve(reference: &Reference, snapshot: &Snapshot) -> Result<LineRange, ResolveError> {
    let lines = snapshot
        .read_lines(&reference.file)
        .map_err(|e| ResolveError::Unreadable(e.to_string()))?;
    for (stage, strategy) in STRATEGIES {
        match strategy(&lines, &reference.symbol, &reference.file) {
            Resolution::NoMatch => continue,
            Resolution::Unique(range) => return Ok(range),
            Resolution::Ambiguous(candidates) => {
                return Err(ResolveError::Ambiguous {
                    symbol: reference.symbol.clone(),
                    stage,
                    candidates,
                });
            }
        }
    }
    Err(ResolveError::NoOccurrence {
        symbol: reference.symbol.clone(),
    })
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Exact-name `def` / `async def` / `class` lookup for Python sources. A
/// block spans the definition line through the last line indented deeper
/// than the definition; blank lines do not terminate a block.
fn definition_blocks(lines: &[String], symbol: &str, file: &str) -> Resolution {
    if !file.ends_with(".py") || symbol.is_empty() {
        return Resolution::NoMatch;
    }
    let pattern = format!(r"^(\s*)(?:async\s+)?(?:def|class)\s+{}\b", regex::escape(symbol));
    let def_re = Regex::new(&pattern).expect("escaped symbol forms a valid pattern");
    let mut matches: Vec<LineRange> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = def_re.captures(line) else {
            continue;
        };
        let indent = caps[1].len();
        let mut end = i;
        for (j, body_line) in lines.iter().enumerate().skip(i + 1) {
            if body_line.trim().is_empty() {
                continue;
            }
            if indent_width(body_line) <= indent {
                break;
            }
            end = j;
        }
        matches.push(LineRange {
            start: i + 1,
            end: end + 1,
        });
    }
    match matches.len() {
        0 => Resolution::NoMatch,
        1 => Resolution::Unique(matches[0]),
        n => Resolution::Ambiguous(n),
    }
}

/// Assignment-form occurrence: the symbol at the start of a line followed by
/// an assignment operator. Matches get a ±2 window, clamped to file bounds.
fn assignments(lines: &[String], symbol: &str, _file: &str) -> Resolution {
    if symbol.is_empty() {
        return Resolution::NoMatch;
    }
    let pattern = format!(r"^\s*{}\s*=", regex::escape(symbol));
    let assign_re = Regex::new(&pattern).expect("escaped symbol forms a valid pattern");
    let hits: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| assign_re.is_match(line))
        .map(|(i, _)| i + 1)
        .collect();
    windowed(&hits, lines.len())
}

/// Last resort: the symbol as a substring of any line, with uniqueness.
fn substrings(lines: &[String], symbol: &str, _file: &str) -> Resolution {
    if symbol.is_empty() {
        return Resolution::NoMatch;
    }
    let hits: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(symbol))
        .map(|(i, _)| i + 1)
        .collect();
    windowed(&hits, lines.len())
}

fn windowed(hits: &[usize], line_count: usize) -> Resolution {
    match hits {
        [] => Resolution::NoMatch,
        [line] => Resolution::Unique(LineRange {
            start: line.saturating_sub(WINDOW).max(1),
            end: (line + WINDOW).min(line_count),
        }),
        _ => Resolution::Ambiguous(hits.len()),
    }
}
