use std::fmt;
use std::path::Path;

use ahash::AHashSet;
use log::debug;

use crate::compiler;
use crate::document::{AtomKind, LoadedDocument};
use crate::lint::LintRunner;
use crate::resolver::{self, VerifyError};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Structural,
    Schema,
    Provenance,
    Citation,
    Ambiguity,
    Consistency,
    ExternalTool,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorCategory::Structural => "structural",
            ErrorCategory::Schema => "schema",
            ErrorCategory::Provenance => "provenance",
            ErrorCategory::Citation => "citation",
            ErrorCategory::Ambiguity => "ambiguity",
            ErrorCategory::Consistency => "consistency",
            ErrorCategory::ExternalTool => "external-tool",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    fn new(category: ErrorCategory, message: impl Into<String>) -> ValidationError {
        ValidationError {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

fn verify_category(error: &VerifyError) -> ErrorCategory {
    match error {
        VerifyError::RevisionOverride { .. } => ErrorCategory::Provenance,
        _ => ErrorCategory::Citation,
    }
}

/// Run every validation stage over an already loaded document, accumulating
/// errors instead of short-circuiting. Structural and schema failures abort
/// earlier, inside `document::load`.
///
/// `require_manifest` distinguishes a standalone validate (a compiled
/// manifest must already exist) from the pre-compile gate (the compile about
/// to run will write it).
pub fn validate(
    loaded: &LoadedDocument,
    snapshot: &Snapshot,
    out_dir: &Path,
    lint: Option<&LintRunner>,
    require_manifest: bool,
) -> Vec<ValidationError> {
    let mut errors: Vec<ValidationError> = Vec::new();
    let document = &loaded.document;
    let expected_revision = document.manifest.repo_revision.trim().to_string();
    let any_references = document.atoms.iter().any(|a| !a.references.is_empty());

    // Stage 2: external structural lint, surfaced verbatim.
    if let Some(runner) = lint
        && let Err(e) = runner.run(&loaded.path)
    {
        errors.push(ValidationError::new(ErrorCategory::ExternalTool, e.to_string()));
    }

    // Stage 3: bespoke cross-document invariants.
    if expected_revision.is_empty() {
        errors.push(ValidationError::new(
            ErrorCategory::Provenance,
            "manifest.repo_revision is required and must be non-empty",
        ));
    }

    let snapshot_usable = if any_references && !expected_revision.is_empty() {
        if !snapshot.exists() {
            errors.push(ValidationError::new(
                ErrorCategory::Provenance,
                format!(
                    "snapshot directory not found at {}; check out manifest.repo_revision there",
                    snapshot.root().display()
                ),
            ));
            false
        } else {
            match snapshot.checked_out_revision() {
                Some(rev) if rev == expected_revision => true,
                Some(rev) => {
                    errors.push(ValidationError::new(
                        ErrorCategory::Provenance,
                        format!(
                            "snapshot is checked out at {rev}, manifest.repo_revision is {expected_revision}"
                        ),
                    ));
                    false
                }
                None => {
                    errors.push(ValidationError::new(
                        ErrorCategory::Provenance,
                        format!(
                            "could not determine the checked-out revision of {}",
                            snapshot.root().display()
                        ),
                    ));
                    false
                }
            }
        }
    } else {
        false
    };

    let mut seen_ids: AHashSet<&str> = AHashSet::new();
    let mut reported_duplicates: AHashSet<&str> = AHashSet::new();
    for atom in &document.atoms {
        if !seen_ids.insert(&atom.id) && reported_duplicates.insert(&atom.id) {
            errors.push(ValidationError::new(
                ErrorCategory::Consistency,
                format!("duplicate atom id: {}", atom.id),
            ));
        }

        for reference in &atom.references {
            // Provenance and drift-detection are manifest-level facts; a
            // reference may not carry its own, matching or not.
            if reference.repo_revision.is_some() {
                errors.push(ValidationError::new(
                    ErrorCategory::Provenance,
                    format!(
                        "reference must not carry repo_revision; provenance lives on the manifest (atom {})",
                        atom.id
                    ),
                ));
            }
            if reference.excerpt_hash.is_some() {
                errors.push(ValidationError::new(
                    ErrorCategory::Provenance,
                    format!(
                        "reference must not carry excerpt_hash; drift detection lives on the manifest (atom {})",
                        atom.id
                    ),
                ));
            }
            if snapshot_usable
                && let Err(e) = resolver::verify(reference, snapshot, &expected_revision)
            {
                errors.push(ValidationError::new(
                    verify_category(&e),
                    format!("atom {} ref {}: {e}", atom.id, reference.file),
                ));
            }
        }

        match &atom.kind {
            AtomKind::Layout { layout } => {
                let mut prev: Option<&crate::document::LayoutField> = None;
                let mut prev_end: u64 = 0;
                for field in &layout.fields {
                    if field.allow_overlap && field.overlap_with.is_empty() {
                        errors.push(ValidationError::new(
                            ErrorCategory::Consistency,
                            format!(
                                "layout atom {}: field {} sets allow_overlap without naming overlap_with",
                                atom.id, field.name
                            ),
                        ));
                    }
                    if let Some(previous) = prev
                        && field.offset < prev_end
                    {
                        let mutual = field.allow_overlap
                            && previous.allow_overlap
                            && field.overlap_with.contains(&previous.name)
                            && previous.overlap_with.contains(&field.name);
                        if !mutual {
                            errors.push(ValidationError::new(
                                ErrorCategory::Consistency,
                                format!(
                                    "layout atom {}: field {} overlaps field {}; both must declare allow_overlap and name each other in overlap_with",
                                    atom.id, field.name, previous.name
                                ),
                            ));
                        }
                    }
                    prev_end = field.offset + field.length;
                    prev = Some(field);
                }
            }
            AtomKind::Constant { value, constraints } => {
                let unit = value.unit.to_lowercase();
                if unit.contains("byte") || unit.contains("bit") {
                    let number = value.number.as_f64();
                    let max = constraints
                        .as_ref()
                        .and_then(|c| c.max)
                        .or(value.max_reasonable)
                        .unwrap_or(10_000.0);
                    if number > max {
                        errors.push(ValidationError::new(
                            ErrorCategory::Consistency,
                            format!(
                                "constant atom {}: value {number} exceeds max {max} (set constraints.max or value.max_reasonable to override)",
                                atom.id
                            ),
                        ));
                    }
                    if let Some(min) = constraints.as_ref().and_then(|c| c.min)
                        && number < min
                    {
                        errors.push(ValidationError::new(
                            ErrorCategory::Consistency,
                            format!("constant atom {}: value {number} is below min {min}", atom.id),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    // Stage 4: version/content staleness against the previously compiled
    // manifest. A stale manifest under a bumped version is fine: the next
    // compile rewrites it.
    match compiler::read_manifest(out_dir) {
        Some(previous) => {
            if previous.version == document.spec_meta.version && previous.content_hash != loaded.content_hash
            {
                errors.push(ValidationError::new(
                    ErrorCategory::Consistency,
                    format!(
                        "document content changed but spec_meta.version is still {}; bump the version",
                        document.spec_meta.version
                    ),
                ));
            }
        }
        None => {
            if require_manifest && !document.atoms.is_empty() {
                errors.push(ValidationError::new(
                    ErrorCategory::Consistency,
                    format!(
                        "no compiled manifest found in {}; run compile first",
                        out_dir.display()
                    ),
                ));
            }
        }
    }

    // Stage 5: resolver replay. A final read-only verify sweep; only
    // findings not already reported are added.
    if snapshot_usable {
        let before = errors.len();
        for atom in &document.atoms {
            for reference in &atom.references {
                if let Err(e) = resolver::verify(reference, snapshot, &expected_revision) {
                    let candidate = ValidationError::new(
                        verify_category(&e),
                        format!("atom {} ref {}: {e}", atom.id, reference.file),
                    );
                    if !errors.contains(&candidate) {
                        errors.push(candidate);
                    }
                }
            }
        }
        debug!("resolver replay added {} errors", errors.len() - before);
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompileOptions, compile};
    use crate::document;
    use crate::snapshot::test_support::fake_checkout;

    const REV: &str = "286a78ef8c58ca4503af2b0211b3a2d7e385467c";

    const CLEAN_DOC: &str = r#"
spec_meta:
  spec_id: example-wire-format
  version: 0.1.0
manifest:
  repo_revision: 286a78ef8c58ca4503af2b0211b3a2d7e385467c
atoms:
  - id: const-mtu
    kind: constant
    statement: The MTU is 500 bytes.
    value:
      number: 500
      unit: bytes
    references:
      - file: src/net.py
        symbol: MTU
        lines: { start: 1, end: 3 }
        role: defines
"#;

    struct Fixture {
        _work: tempfile::TempDir,
        _snap: tempfile::TempDir,
        loaded: document::LoadedDocument,
        snapshot: Snapshot,
        out_dir: std::path::PathBuf,
    }

    fn fixture(doc: &str) -> Fixture {
        let work = tempfile::tempdir().unwrap();
        let snap = tempfile::tempdir().unwrap();
        fake_checkout(snap.path(), REV, &[("src/net.py", "# net\nMTU = 500\n# end\n")]);
        let path = work.path().join("doc.yaml");
        std::fs::write(&path, doc).unwrap();
        let loaded = document::load(&path).unwrap();
        let out_dir = work.path().join("generated");
        Fixture {
            loaded,
            snapshot: Snapshot::new(snap.path()),
            out_dir,
            _work: work,
            _snap: snap,
        }
    }

    fn compiled_fixture(doc: &str) -> Fixture {
        let f = fixture(doc);
        compile(&f.loaded, None, &f.out_dir, CompileOptions::default()).unwrap();
        f
    }

    #[test]
    fn clean_document_passes() {
        let f = compiled_fixture(CLEAN_DOC);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn duplicate_id_reported_exactly_once() {
        let doc = CLEAN_DOC.replace("const-mtu", "X").to_string()
            + r#"  - id: X
    kind: narrative
    statement: Duplicate one.
  - id: X
    kind: narrative
    statement: Duplicate two.
"#;
        let f = compiled_fixture(&doc);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        let dup: Vec<_> = errors
            .iter()
            .filter(|e| e.message.contains("duplicate atom id: X"))
            .collect();
        assert_eq!(dup.len(), 1, "expected exactly one duplicate error: {errors:?}");
    }

    #[test]
    fn forbidden_reference_fields_fail_even_when_matching() {
        let doc = CLEAN_DOC.replace(
            "role: defines",
            &format!("role: defines\n        repo_revision: {REV}"),
        );
        let f = compiled_fixture(&doc);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        assert!(
            errors
                .iter()
                .any(|e| e.category == ErrorCategory::Provenance
                    && e.message.contains("must not carry repo_revision")),
            "expected provenance error: {errors:?}"
        );
    }

    #[test]
    fn layout_overlap_without_exemption_cites_both_fields() {
        let doc = CLEAN_DOC.to_string()
            + r#"  - id: layout-x
    kind: layout
    statement: Overlapping layout.
    layout:
      fields:
        - { name: alpha, offset: 0, length: 2 }
        - { name: beta, offset: 1, length: 2 }
"#;
        let f = compiled_fixture(&doc);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        let overlap: Vec<_> = errors.iter().filter(|e| e.message.contains("overlaps")).collect();
        assert_eq!(overlap.len(), 1);
        assert!(overlap[0].message.contains("alpha"));
        assert!(overlap[0].message.contains("beta"));
    }

    #[test]
    fn mutual_overlap_exemption_passes_one_sided_fails() {
        let mutual = CLEAN_DOC.to_string()
            + r#"  - id: layout-x
    kind: layout
    statement: Aliased layout.
    layout:
      fields:
        - { name: alpha, offset: 0, length: 2, allow_overlap: true, overlap_with: [beta] }
        - { name: beta, offset: 1, length: 2, allow_overlap: true, overlap_with: [alpha] }
"#;
        let f = compiled_fixture(&mutual);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        assert!(
            !errors.iter().any(|e| e.message.contains("overlaps")),
            "mutual exemption should pass: {errors:?}"
        );

        let one_sided = mutual.replace(
            "- { name: alpha, offset: 0, length: 2, allow_overlap: true, overlap_with: [beta] }",
            "- { name: alpha, offset: 0, length: 2 }",
        );
        let f = compiled_fixture(&one_sided);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        assert!(errors.iter().any(|e| e.message.contains("overlaps")));
    }

    #[test]
    fn constant_bound_check_scales_with_declared_limit() {
        let doc = CLEAN_DOC.replace("number: 500", "number: 50000");
        let f = compiled_fixture(&doc);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        assert!(errors.iter().any(|e| e.message.contains("exceeds max")));

        let doc = doc.replace("unit: bytes", "unit: bytes\n      max_reasonable: 100000");
        let f = compiled_fixture(&doc);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        assert!(
            !errors.iter().any(|e| e.message.contains("exceeds max")),
            "declared bound should lift the default: {errors:?}"
        );
    }

    #[test]
    fn staleness_requires_version_bump() {
        let f = compiled_fixture(CLEAN_DOC);

        // Same version, different content: must fail.
        let changed = CLEAN_DOC.replace("The MTU is 500 bytes.", "The MTU is exactly 500 bytes.");
        std::fs::write(&f.loaded.path, &changed).unwrap();
        let reloaded = document::load(&f.loaded.path).unwrap();
        let errors = validate(&reloaded, &f.snapshot, &f.out_dir, None, true);
        assert!(errors.iter().any(|e| e.message.contains("bump the version")));

        // Bumped version, same content change: must pass.
        let bumped = changed.replace("version: 0.1.0", "version: 0.2.0");
        std::fs::write(&f.loaded.path, &bumped).unwrap();
        let reloaded = document::load(&f.loaded.path).unwrap();
        let errors = validate(&reloaded, &f.snapshot, &f.out_dir, None, true);
        assert!(
            !errors.iter().any(|e| e.message.contains("bump the version")),
            "bumped version must clear staleness: {errors:?}"
        );
    }

    #[test]
    fn missing_snapshot_is_a_provenance_error_when_atoms_cite() {
        let f = compiled_fixture(CLEAN_DOC);
        let gone = Snapshot::new(std::path::Path::new("/definitely/not/here"));
        let errors = validate(&f.loaded, &gone, &f.out_dir, None, true);
        assert!(
            errors
                .iter()
                .any(|e| e.category == ErrorCategory::Provenance && e.message.contains("not found"))
        );
    }

    #[test]
    fn wrong_snapshot_revision_is_a_provenance_error() {
        let f = compiled_fixture(CLEAN_DOC);
        let wrong = tempfile::tempdir().unwrap();
        fake_checkout(wrong.path(), "someotherrev", &[("src/net.py", "MTU = 500\n")]);
        let errors = validate(&f.loaded, &Snapshot::new(wrong.path()), &f.out_dir, None, true);
        assert!(
            errors
                .iter()
                .any(|e| e.category == ErrorCategory::Provenance && e.message.contains("someotherrev"))
        );
    }

    #[test]
    fn bad_citation_range_is_a_citation_error() {
        let doc = CLEAN_DOC.replace("{ start: 1, end: 3 }", "{ start: 1, end: 99 }");
        let f = compiled_fixture(&doc);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        assert!(
            errors
                .iter()
                .any(|e| e.category == ErrorCategory::Citation && e.message.contains("out of range"))
        );
    }

    #[test]
    fn empty_repo_revision_is_a_provenance_error() {
        let doc = CLEAN_DOC.replace(
            "repo_revision: 286a78ef8c58ca4503af2b0211b3a2d7e385467c",
            "repo_revision: \"\"",
        );
        let f = compiled_fixture(&doc);
        let errors = validate(&f.loaded, &f.snapshot, &f.out_dir, None, true);
        assert!(errors.iter().any(|e| e.message.contains("repo_revision is required")));
    }
}
