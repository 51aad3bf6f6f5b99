use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use log::debug;

use crate::helpers;

/// Read-only view of the pinned source checkout. All access is by
/// snapshot-relative path; traversal outside the root is rejected.
#[derive(Debug, Clone)]
pub struct Snapshot {
    root: PathBuf,
}

impl Snapshot {
    pub fn new(root: &Path) -> Snapshot {
        Snapshot {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Resolve a document-relative citation path against the snapshot root.
    pub fn resolve_file(&self, relative: &str) -> Result<PathBuf> {
        if !helpers::is_safe_relative_path(relative) {
            return Err(anyhow!("path escapes the snapshot root: {relative}"));
        }
        Ok(self.root.join(relative))
    }

    pub fn has_file(&self, relative: &str) -> bool {
        self.resolve_file(relative).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Cited file content with line endings normalised to `\n`, split into
    /// lines. All line math in the resolver is over this representation.
    pub fn read_lines(&self, relative: &str) -> Result<Vec<String>> {
        let path = self.resolve_file(relative)?;
        let content = fs::read_to_string(&path)
            .map_err(|e| anyhow!("could not read {}: {e}", path.display()))?;
        Ok(helpers::split_lines(&content))
    }

    /// The revision the snapshot is checked out at, read from `.git/HEAD`
    /// (following one level of ref indirection). `None` when the snapshot is
    /// not a git checkout or HEAD cannot be resolved.
    pub fn checked_out_revision(&self) -> Option<String> {
        let head_path = self.root.join(".git").join("HEAD");
        let head = fs::read_to_string(&head_path).ok()?;
        let head = head.trim();
        if let Some(ref_name) = head.strip_prefix("ref: ") {
            let ref_path = self.root.join(".git").join(ref_name.trim());
            let commit = fs::read_to_string(&ref_path).ok()?;
            debug!("snapshot HEAD -> {} -> {}", ref_name.trim(), commit.trim());
            Some(commit.trim().to_string())
        } else if head.is_empty() {
            None
        } else {
            Some(head.to_string())
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use std::fs;
    use std::path::Path;

    /// Lay out a fake git checkout: files plus a detached `.git/HEAD`.
    pub fn fake_checkout(root: &Path, revision: &str, files: &[(&str, &str)]) {
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git").join("HEAD"), format!("{revision}\n")).unwrap();
        for (rel, content) in files {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
    }
}
