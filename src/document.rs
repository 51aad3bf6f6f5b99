use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::helpers;

/// Root of the parsed specification document.
///
/// Loaded once, treated as immutable by the validator and compiler. The only
/// tool-initiated mutation anywhere is fill mode writing a missing
/// `Reference::lines`, and that goes through `fill::apply_fills`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub spec_meta: SpecMeta,
    pub manifest: DocumentManifest,
    #[serde(default)]
    pub atoms: Vec<Atom>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecMeta {
    pub spec_id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_of_truth: Option<SourceOfTruth>,
}

/// Where the pinned snapshot comes from. Informational; the authoritative
/// revision for citation checking is `DocumentManifest::repo_revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOfTruth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentManifest {
    #[serde(default)]
    pub repo_revision: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub id: String,
    #[serde(default)]
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normative: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    #[serde(flatten)]
    pub kind: AtomKind,
}

/// Kind-specific payload. The document writes `kind: constant` etc. next to
/// the payload field, which maps onto an internally tagged enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AtomKind {
    Constant {
        value: ConstantValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constraints: Option<Constraints>,
    },
    Layout {
        layout: LayoutSpec,
    },
    Algorithm {
        algorithm: AlgorithmSpec,
    },
    Narrative,
}

impl AtomKind {
    pub fn name(&self) -> &'static str {
        match self {
            AtomKind::Constant { .. } => "constant",
            AtomKind::Layout { .. } => "layout",
            AtomKind::Algorithm { .. } => "algorithm",
            AtomKind::Narrative => "narrative",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantValue {
    pub number: Num,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reasonable: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Numeric constant value. Wire-format constants are almost always integers,
/// but the document may declare rates and factors as floats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(&self) -> f64 {
        match self {
            Num::Int(i) => *i as f64,
            Num::Float(f) => *f,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Num::Int(i) => Some(*i),
            Num::Float(_) => None,
        }
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Num::Int(i) => write!(f, "{i}"),
            Num::Float(x) => write!(f, "{x}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutSpec {
    #[serde(default)]
    pub fields: Vec<LayoutField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutField {
    pub name: String,
    pub offset: u64,
    pub length: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_overlap: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlap_with: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmSpec {
    #[serde(default)]
    pub steps: Vec<String>,
}

/// A citation of external source supporting an atom.
///
/// `repo_revision` and `excerpt_hash` are deliberately modeled even though a
/// valid document must not carry them: provenance is a manifest-level fact.
/// Keeping them in the model lets the validator report the violation as an
/// accumulated error instead of dying during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub file: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<LineRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt_hash: Option<String>,
}

/// 1-indexed inclusive line range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug)]
pub enum LoadError {
    Io(String),
    /// Missing required top-level sections. Fatal: nothing downstream is
    /// meaningful without them.
    Structural(Vec<String>),
    /// The document has the required sections but does not fit the schema.
    Schema(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "could not read document: {e}"),
            LoadError::Structural(msgs) => write!(f, "{}", msgs.join("\n")),
            LoadError::Schema(e) => write!(f, "schema: {e}"),
        }
    }
}

impl std::error::Error for LoadError {}

/// A document together with the raw bytes it was parsed from. The content
/// hash is over the raw bytes, so formatting changes count as content
/// changes for staleness purposes.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub path: PathBuf,
    pub document: Document,
    pub raw: Vec<u8>,
    pub content_hash: String,
}

pub fn load(path: &Path) -> Result<LoadedDocument, LoadError> {
    let raw = fs::read(path).map_err(|e| LoadError::Io(format!("{}: {e}", path.display())))?;
    let value: serde_yaml::Value =
        serde_yaml::from_slice(&raw).map_err(|e| LoadError::Structural(vec![format!("not valid YAML: {e}")]))?;

    let mapping = match value.as_mapping() {
        Some(m) => m,
        None => {
            return Err(LoadError::Structural(vec![
                "document root must be a mapping with spec_meta, manifest and atoms".to_string(),
            ]));
        }
    };

    let mut missing = Vec::new();
    for key in ["spec_meta", "manifest", "atoms"] {
        if !mapping.contains_key(key) {
            missing.push(format!("missing required top-level section: {key}"));
        }
    }
    if let Some(atoms) = mapping.get("atoms")
        && !atoms.is_sequence()
    {
        missing.push("atoms must be an array".to_string());
    }
    if !missing.is_empty() {
        return Err(LoadError::Structural(missing));
    }

    let document: Document = serde_yaml::from_value(value).map_err(|e| LoadError::Schema(e.to_string()))?;
    let content_hash = helpers::hash_bytes(&raw);

    Ok(LoadedDocument {
        path: path.to_path_buf(),
        document,
        raw,
        content_hash,
    })
}

impl Atom {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub const MINIMAL_DOC: &str = r#"
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
        lines: { start: 8, end: 12 }
        role: defines
  - id: layout-header
    kind: layout
    statement: Packet header layout.
    layout:
      fields:
        - { name: flags, offset: 0, length: 1 }
        - { name: hops, offset: 1, length: 1 }
  - id: algo-mask
    kind: algorithm
    statement: Masking procedure.
    algorithm:
      steps:
        - Derive the mask key.
        - XOR the payload.
  - id: note-scope
    kind: narrative
    statement: Link-layer framing is out of scope.
"#;

    fn parse(doc: &str) -> Document {
        serde_yaml::from_str(doc).expect("document should parse")
    }

    #[test]
    fn parses_all_atom_kinds() {
        let doc = parse(MINIMAL_DOC);
        assert_eq!(doc.atoms.len(), 4);
        let kinds: Vec<&str> = doc.atoms.iter().map(|a| a.kind.name()).collect();
        assert_eq!(kinds, ["constant", "layout", "algorithm", "narrative"]);
    }

    #[test]
    fn constant_payload_is_typed() {
        let doc = parse(MINIMAL_DOC);
        match &doc.atoms[0].kind {
            AtomKind::Constant { value, .. } => {
                assert_eq!(value.number, Num::Int(500));
                assert_eq!(value.unit, "bytes");
            }
            other => panic!("expected constant, got {}", other.name()),
        }
    }

    #[test]
    fn reference_keeps_forbidden_fields_visible() {
        // Parsing must not reject them; the validator reports them.
        let doc = parse(&MINIMAL_DOC.replace(
            "role: defines",
            "role: defines\n        repo_revision: deadbeef",
        ));
        assert_eq!(
            doc.atoms[0].references[0].repo_revision.as_deref(),
            Some("deadbeef")
        );
    }

    #[test]
    fn load_rejects_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.yaml");
        std::fs::write(&path, "spec_meta:\n  spec_id: x\n  version: 0.1.0\n").unwrap();
        match load(&path) {
            Err(LoadError::Structural(msgs)) => {
                assert!(msgs.iter().any(|m| m.contains("manifest")));
                assert!(msgs.iter().any(|m| m.contains("atoms")));
            }
            other => panic!("expected structural failure, got {other:?}"),
        }
    }

    #[test]
    fn load_computes_content_hash_over_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.yaml");
        std::fs::write(&path, MINIMAL_DOC).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.content_hash, helpers::hash_bytes(MINIMAL_DOC.as_bytes()));
    }
}
