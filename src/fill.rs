use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::document::{Document, LineRange};
use crate::resolver::{self, ResolveError};
use crate::snapshot::Snapshot;
use crate::validator::{ErrorCategory, ValidationError};

/// One computed range for a reference that had none. Proposals are the only
/// mutation fill mode may make, and they are applied in a separate step so
/// resolution itself stays pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedFill {
    pub atom_id: String,
    pub ref_index: usize,
    pub file: String,
    pub range: LineRange,
}

/// Compute fill proposals for every reference lacking a range, verifying the
/// ones that already have one. Any failure anywhere fails the whole run:
/// nothing is ever partially applied.
pub fn plan_fills(document: &Document, snapshot: &Snapshot) -> Result<Vec<ProposedFill>, Vec<ValidationError>> {
    let expected_revision = document.manifest.repo_revision.trim();
    let mut errors: Vec<ValidationError> = Vec::new();

    if !snapshot.exists() {
        errors.push(ValidationError {
            category: ErrorCategory::Provenance,
            message: format!("snapshot directory not found at {}", snapshot.root().display()),
        });
        return Err(errors);
    }
    if expected_revision.is_empty() {
        errors.push(ValidationError {
            category: ErrorCategory::Provenance,
            message: "manifest.repo_revision is required and must be non-empty".to_string(),
        });
        return Err(errors);
    }
    match snapshot.checked_out_revision() {
        Some(rev) if rev == expected_revision => {}
        Some(rev) => {
            errors.push(ValidationError {
                category: ErrorCategory::Provenance,
                message: format!("snapshot is checked out at {rev}, manifest.repo_revision is {expected_revision}"),
            });
            return Err(errors);
        }
        None => {
            errors.push(ValidationError {
                category: ErrorCategory::Provenance,
                message: format!(
                    "could not determine the checked-out revision of {}",
                    snapshot.root().display()
                ),
            });
            return Err(errors);
        }
    }

    let mut proposals: Vec<ProposedFill> = Vec::new();
    for atom in &document.atoms {
        for (ref_index, reference) in atom.references.iter().enumerate() {
            if reference.lines.is_some() {
                if let Err(e) = resolver::verify(reference, snapshot, expected_revision) {
                    errors.push(ValidationError {
                        category: ErrorCategory::Citation,
                        message: format!("atom {} ref {}: {e}", atom.id, reference.file),
                    });
                }
                continue;
            }
            if reference.symbol.is_empty() {
                errors.push(ValidationError {
                    category: ErrorCategory::Citation,
                    message: format!(
                        "atom {} ref {}: no symbol and no lines; nothing to resolve",
                        atom.id, reference.file
                    ),
                });
                continue;
            }
            match resolver::resolve(reference, snapshot) {
                Ok(range) => proposals.push(ProposedFill {
                    atom_id: atom.id.clone(),
                    ref_index,
                    file: reference.file.clone(),
                    range,
                }),
                Err(e) => {
                    let category = match &e {
                        ResolveError::Unreadable(_) => ErrorCategory::Citation,
                        // Zero or multiple candidates: never auto-resolved.
                        ResolveError::NoOccurrence { .. } | ResolveError::Ambiguous { .. } => {
                            ErrorCategory::Ambiguity
                        }
                    };
                    errors.push(ValidationError {
                        category,
                        message: format!("atom {} ref {}: {e}", atom.id, reference.file),
                    });
                }
            }
        }
    }

    if errors.is_empty() { Ok(proposals) } else { Err(errors) }
}

/// Commit proposals onto the document. Only `Reference::lines` is touched.
pub fn apply_fills(document: &mut Document, proposals: &[ProposedFill]) {
    for proposal in proposals {
        let Some(atom) = document.atoms.iter_mut().find(|a| a.id == proposal.atom_id) else {
            continue;
        };
        if let Some(reference) = atom.references.get_mut(proposal.ref_index) {
            info!(
                "filling {} ref {} -> lines [{},{}]",
                proposal.atom_id, proposal.file, proposal.range.start, proposal.range.end
            );
            reference.lines = Some(proposal.range);
        }
    }
}

/// Re-serialize the document in place. YAML comments and exact formatting
/// are not preserved across a fill.
pub fn write_document(path: &Path, document: &Document) -> Result<()> {
    let yaml = serde_yaml::to_string(document)?;
    fs::write(path, yaml).with_context(|| format!("could not write {}", path.display()))?;
    Ok(())
}
