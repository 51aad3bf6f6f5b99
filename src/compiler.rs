use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::document::{Atom, AtomKind, Document, LoadedDocument, Num, Reference};
use crate::helpers;
use crate::snapshot::Snapshot;

pub const ARTIFACT_FULL: &str = "full.md";
pub const ARTIFACT_CONSTANTS: &str = "constants.md";
pub const ARTIFACT_CONTEXTS: &str = "contexts.md";
pub const ARTIFACT_LAYOUTS: &str = "layouts.md";
pub const ARTIFACT_TRACEABILITY: &str = "traceability.md";
pub const MANIFEST_NAME: &str = "manifest.json";

/// Lines of leading/trailing context around an inlined excerpt.
const EXCERPT_CONTEXT: usize = 2;

/// Compiled record of what was generated from which document state.
///
/// `generated_at` is the only timestamp anywhere in the output; the text
/// artifacts must be byte-identical across runs for unchanged inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledManifest {
    pub version: String,
    pub content_hash: String,
    pub repo_revision: String,
    pub generated_at: String,
    pub artifact_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub excerpt_hashes: BTreeMap<String, String>,
}

pub fn read_manifest(out_dir: &Path) -> Option<CompiledManifest> {
    let raw = fs::read_to_string(out_dir.join(MANIFEST_NAME)).ok()?;
    serde_json::from_str(&raw).ok()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    pub inline_excerpts: bool,
}

/// Render all artifacts and replace the manifest. Deterministic: identical
/// document (and snapshot, when excerpts are inlined) produces byte-identical
/// text artifacts on every run.
pub fn compile(
    loaded: &LoadedDocument,
    snapshot: Option<&Snapshot>,
    out_dir: &Path,
    options: CompileOptions,
) -> Result<CompiledManifest> {
    let document = &loaded.document;
    let version = &document.spec_meta.version;
    let repo_revision = document.manifest.repo_revision.trim();

    // Any content change requires a version bump; never overwrite a manifest
    // that would hide unversioned drift.
    if let Some(previous) = read_manifest(out_dir)
        && previous.version == *version
        && previous.content_hash != loaded.content_hash
    {
        return Err(anyhow!(
            "document content changed but spec_meta.version is still {version}; bump the version before compiling"
        ));
    }

    let any_references = document.atoms.iter().any(|a| !a.references.is_empty());
    let excerpt_source = if options.inline_excerpts && any_references {
        let snapshot = snapshot.ok_or_else(|| {
            anyhow!("cannot inline excerpts: no snapshot directory was given and atoms carry references")
        })?;
        if !snapshot.exists() {
            return Err(anyhow!(
                "cannot inline excerpts: snapshot not found at {}",
                snapshot.root().display()
            ));
        }
        match snapshot.checked_out_revision() {
            Some(rev) if rev == repo_revision => {}
            Some(rev) => {
                return Err(anyhow!(
                    "cannot inline excerpts: snapshot is at {rev}, manifest.repo_revision is {repo_revision}"
                ));
            }
            None => {
                return Err(anyhow!(
                    "cannot inline excerpts: could not determine the snapshot's checked-out revision"
                ));
            }
        }
        Some(snapshot)
    } else {
        None
    };

    fs::create_dir_all(out_dir)
        .with_context(|| format!("could not create output directory {}", out_dir.display()))?;

    let mut excerpt_hashes = BTreeMap::new();
    let full = render_full(document, excerpt_source, &mut excerpt_hashes)?;
    let artifacts: [(&str, String); 5] = [
        (ARTIFACT_FULL, full),
        (ARTIFACT_CONSTANTS, render_constants(document)),
        (ARTIFACT_CONTEXTS, render_contexts(document)),
        (ARTIFACT_LAYOUTS, render_layouts(document)),
        (ARTIFACT_TRACEABILITY, render_traceability(document)),
    ];

    let mut artifact_hashes = BTreeMap::new();
    for (name, content) in &artifacts {
        let path = out_dir.join(name);
        fs::write(&path, content).with_context(|| format!("could not write {}", path.display()))?;
        artifact_hashes.insert(name.to_string(), helpers::hash_bytes(content.as_bytes()));
        debug!("wrote {name} ({} bytes)", content.len());
    }

    let manifest = CompiledManifest {
        version: version.clone(),
        content_hash: loaded.content_hash.clone(),
        repo_revision: repo_revision.to_string(),
        generated_at: helpers::utc_timestamp(),
        artifact_hashes,
        excerpt_hashes,
    };
    write_manifest_atomically(out_dir, &manifest)?;

    Ok(manifest)
}

/// The manifest is replaced as a whole file or not at all: write to a
/// temporary file in the same directory, then rename over the old one.
fn write_manifest_atomically(out_dir: &Path, manifest: &CompiledManifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    let mut tmp = tempfile::NamedTempFile::new_in(out_dir)
        .with_context(|| format!("could not create temporary manifest in {}", out_dir.display()))?;
    tmp.write_all(json.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(out_dir.join(MANIFEST_NAME))
        .map_err(|e| anyhow!("could not replace {MANIFEST_NAME}: {e}"))?;
    Ok(())
}

fn reference_summary(reference: &Reference) -> String {
    let (start, end) = match reference.lines {
        Some(range) => (range.start.to_string(), range.end.to_string()),
        None => ("?".to_string(), "?".to_string()),
    };
    let role = reference
        .role
        .as_deref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default();
    format!(
        "{} (`{}`) lines {}-{}{}",
        reference.file, reference.symbol, start, end, role
    )
}

/// Full rendering: every atom in document declaration order.
fn render_full(
    document: &Document,
    excerpt_source: Option<&Snapshot>,
    excerpt_hashes: &mut BTreeMap<String, String>,
) -> Result<String> {
    let mut out = vec![format!("# {} (generated)", document.spec_meta.spec_id), String::new()];
    for atom in &document.atoms {
        out.push(format!("## {}", atom.id));
        out.push(format!("- **Kind:** {}", atom.kind.name()));
        if let Some(normative) = &atom.normative {
            out.push(format!("- **Normative:** {normative}"));
        }
        out.push(format!("- **Statement:** {}", atom.statement));
        if !atom.references.is_empty() {
            out.push("- **References:**".to_string());
            for (index, reference) in atom.references.iter().enumerate() {
                out.push(format!("  - {}", reference_summary(reference)));
                if let Some(snapshot) = excerpt_source {
                    render_excerpt(snapshot, atom, index, reference, &mut out, excerpt_hashes)?;
                }
            }
        }
        match &atom.kind {
            AtomKind::Constant { value, .. } => {
                out.push(format!("- **Value:** {} {}", value.number, value.unit));
            }
            AtomKind::Layout { layout } => {
                if !layout.fields.is_empty() {
                    out.push("- **Layout fields:**".to_string());
                    for field in &layout.fields {
                        out.push(format!(
                            "  - {}: offset {}, length {}",
                            field.name, field.offset, field.length
                        ));
                    }
                }
            }
            AtomKind::Algorithm { algorithm } => {
                if !algorithm.steps.is_empty() {
                    out.push("- **Steps:**".to_string());
                    for step in &algorithm.steps {
                        out.push(format!("  - {step}"));
                    }
                }
            }
            AtomKind::Narrative => {}
        }
        out.push(String::new());
    }
    Ok(join_lines(out))
}

/// Re-read the cited lines live from the snapshot; stored copies are never
/// trusted. The hash covers exactly the cited slice, the rendered block adds
/// a bounded context window with explicit line numbers.
fn render_excerpt(
    snapshot: &Snapshot,
    atom: &Atom,
    index: usize,
    reference: &Reference,
    out: &mut Vec<String>,
    excerpt_hashes: &mut BTreeMap<String, String>,
) -> Result<()> {
    let Some(range) = reference.lines else {
        return Ok(());
    };
    let lines = snapshot.read_lines(&reference.file)?;
    if range.start < 1 || range.end > lines.len() || range.start > range.end {
        return Err(anyhow!(
            "cannot inline excerpt for atom {}: lines [{},{}] invalid for {}",
            atom.id,
            range.start,
            range.end,
            reference.file
        ));
    }
    let cited = lines[range.start - 1..range.end].join("\n") + "\n";
    excerpt_hashes.insert(format!("{}[{index}]", atom.id), helpers::hash_bytes(cited.as_bytes()));

    let window_start = range.start.saturating_sub(EXCERPT_CONTEXT).max(1);
    let window_end = (range.end + EXCERPT_CONTEXT).min(lines.len());
    out.push("    ```".to_string());
    for number in window_start..=window_end {
        out.push(format!("    {:>5} | {}", number, lines[number - 1]));
    }
    out.push("    ```".to_string());
    Ok(())
}

/// Constants table: constant atoms without the context tag, sorted by id.
fn render_constants(document: &Document) -> String {
    let mut rows: Vec<&Atom> = document
        .atoms
        .iter()
        .filter(|a| matches!(a.kind, AtomKind::Constant { .. }) && !a.has_tag("context"))
        .collect();
    rows.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = vec![
        "# Constants".to_string(),
        String::new(),
        "| ID | Value | Unit | Statement |".to_string(),
        "|----|-------|------|-----------|".to_string(),
    ];
    for atom in rows {
        if let AtomKind::Constant { value, .. } = &atom.kind {
            out.push(format!(
                "| {} | {} | {} | {} |",
                atom.id, value.number, value.unit, atom.statement
            ));
        }
    }
    out.push(String::new());
    join_lines(out)
}

/// Context-byte table: constant atoms tagged `context`, ascending by value.
fn render_contexts(document: &Document) -> String {
    let mut rows: Vec<(&Atom, Num)> = document
        .atoms
        .iter()
        .filter_map(|a| match &a.kind {
            AtomKind::Constant { value, .. } if a.has_tag("context") => Some((a, value.number)),
            _ => None,
        })
        .collect();
    rows.sort_by(|(a, x), (b, y)| {
        x.as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut out = vec![
        "# Context byte values".to_string(),
        String::new(),
        "| Value | Hex | ID | Meaning |".to_string(),
        "|-------|-----|----|---------|".to_string(),
    ];
    for (atom, number) in rows {
        let hex = match number.as_int() {
            Some(i) => format!("0x{i:02X}"),
            None => number.to_string(),
        };
        out.push(format!("| {number} | {hex} | {} | {} |", atom.id, atom.statement));
    }
    out.push(String::new());
    join_lines(out)
}

fn render_layouts(document: &Document) -> String {
    let mut out = vec!["# Layouts".to_string(), String::new()];
    for atom in &document.atoms {
        let AtomKind::Layout { layout } = &atom.kind else {
            continue;
        };
        out.push(format!("## {}", atom.id));
        out.push(atom.statement.clone());
        if !layout.fields.is_empty() {
            out.push("| Field | Offset | Length |".to_string());
            out.push("|-------|--------|--------|".to_string());
            for field in &layout.fields {
                out.push(format!("| {} | {} | {} |", field.name, field.offset, field.length));
            }
        }
        out.push(String::new());
    }
    join_lines(out)
}

/// Traceability index: every atom id exactly once, with all its references.
fn render_traceability(document: &Document) -> String {
    let mut out = vec!["# Traceability (atoms → references)".to_string(), String::new()];
    for atom in &document.atoms {
        out.push(format!("## {}", atom.id));
        for reference in &atom.references {
            out.push(format!("- {}", reference_summary(reference)));
        }
        out.push(String::new());
    }
    join_lines(out)
}

fn join_lines(lines: Vec<String>) -> String {
    let mut joined = lines.join("\n");
    if !joined.ends_with('\n') {
        joined.push('\n');
    }
    joined
}
