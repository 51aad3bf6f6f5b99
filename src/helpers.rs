use std::path::{Component, Path};

/// Hex-encoded blake3 digest, used for the document content hash, artifact
/// hashes and inlined excerpt hashes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Normalise CRLF / CR line endings to LF before any line math. Citation
/// line ranges are defined over normalised content.
pub fn normalise_newlines(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split normalised content into lines without trailing newlines.
pub fn split_lines(content: &str) -> Vec<String> {
    normalise_newlines(content).lines().map(str::to_string).collect()
}

/// A snapshot-relative path must stay inside the snapshot root: no absolute
/// paths, no `..` components.
pub fn is_safe_relative_path(path: &str) -> bool {
    let p = Path::new(path);
    !p.as_os_str().is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// UTC generation timestamp for the manifest, seconds precision.
pub fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let a = hash_bytes(b"abc");
        let b = hash_bytes(b"abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn newline_normalisation() {
        assert_eq!(normalise_newlines("a\r\nb\rc\n"), "a\nb\nc\n");
        assert_eq!(split_lines("a\r\nb"), vec!["a", "b"]);
    }

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        assert!(is_safe_relative_path("src/net.py"));
        assert!(is_safe_relative_path("./src/net.py"));
        assert!(!is_safe_relative_path("../outside.py"));
        assert!(!is_safe_relative_path("src/../../outside.py"));
        assert!(!is_safe_relative_path("/etc/passwd"));
        assert!(!is_safe_relative_path(""));
    }
}
