//! PathGuard (spec §4.1): validates client-supplied relative paths and provides
//! the base64url transform used to embed a path in a URL segment.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path is empty or whitespace-only")]
    Empty,
    #[error("path is rooted (absolute or UNC)")]
    Rooted,
    #[error("path contains a '..' segment")]
    ParentTraversal,
    #[error("path segment {0:?} contains an invalid character")]
    InvalidCharacter(String),
    #[error("path escapes the dataset root")]
    Escapes,
    #[error("base64url payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("base64url payload is malformed: {0}")]
    Malformed(#[from] base64::DecodeError),
}

/// Characters disallowed in any single path segment, regardless of host platform.
/// Covers the Windows-reserved set plus the embedded-null / control-character rule
/// spec §4.1 requires on every platform so a dataset can be moved between hosts
/// without resurrecting previously-rejected paths.
const INVALID_SEGMENT_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

fn segment_has_invalid_char(segment: &str) -> bool {
    segment
        .chars()
        .any(|c| c.is_control() || INVALID_SEGMENT_CHARS.contains(&c))
}

/// Validate and normalize a candidate relative path.
///
/// Returns the POSIX-normalized form (`/`-separated, no leading/trailing slash) on
/// success. Rejects empty/whitespace paths, absolute or UNC paths, any `..`
/// segment, and any segment containing a null, control, or Windows-reserved
/// character.
pub fn validate_relative_path(candidate: &str) -> Result<String, PathError> {
    if candidate.trim().is_empty() {
        return Err(PathError::Empty);
    }
    if candidate.contains('\0') {
        return Err(PathError::InvalidCharacter(candidate.to_string()));
    }

    let normalized = candidate.replace('\\', "/");

    if normalized.starts_with('/') || normalized.starts_with("//") {
        return Err(PathError::Rooted);
    }
    // Windows drive-letter / UNC prefixes, e.g. "C:/..." or "\\server\share".
    if let Some(second) = normalized.as_bytes().get(1) {
        if *second == b':' {
            return Err(PathError::Rooted);
        }
    }

    let mut segments = Vec::new();
    for segment in normalized.split('/') {
        if segment.is_empty() {
            // collapses doubled slashes; a leading/trailing empty segment is
            // already excluded by the rooted check above and the final trim.
            continue;
        }
        if segment == ".." {
            return Err(PathError::ParentTraversal);
        }
        if segment == "." {
            continue;
        }
        if segment_has_invalid_char(segment) {
            return Err(PathError::InvalidCharacter(segment.to_string()));
        }
        segments.push(segment);
    }

    if segments.is_empty() {
        return Err(PathError::Empty);
    }

    Ok(segments.join("/"))
}

/// Join a previously-validated relative path onto `root` and verify the result
/// canonicalizes strictly under `root`. Re-validates `relpath` defensively so
/// callers that skip `validate_relative_path` cannot bypass the traversal check.
pub fn join_under_root(root: &Path, relpath: &str) -> Result<PathBuf, PathError> {
    let normalized = validate_relative_path(relpath)?;
    let joined = root.join(&normalized);

    // The target may not exist yet (e.g. an upload destination), so canonicalize
    // the deepest existing ancestor and re-append the remainder.
    let mut existing = joined.as_path();
    let mut remainder: Vec<Component> = Vec::new();
    while !existing.exists() {
        match existing.parent() {
            Some(parent) if parent != existing => {
                if let Some(name) = existing.file_name() {
                    remainder.push(Component::Normal(name));
                }
                existing = parent;
            }
            _ => break,
        }
    }

    let canonical_existing = existing
        .canonicalize()
        .map_err(|_| PathError::Escapes)?;
    let canonical_root = root.canonicalize().map_err(|_| PathError::Escapes)?;

    if !canonical_existing.starts_with(&canonical_root) {
        return Err(PathError::Escapes);
    }

    let mut result = canonical_existing;
    for component in remainder.into_iter().rev() {
        result.push(component.as_os_str());
    }

    Ok(result)
}

/// URL-safe base64 encode of UTF-8 bytes, padding stripped.
pub fn base64url_encode(s: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s.as_bytes())
}

/// Inverse of [`base64url_encode`].
pub fn base64url_decode(encoded: &str) -> Result<String, PathError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded)?;
    String::from_utf8(bytes).map_err(|_| PathError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_relative_path() {
        assert_eq!(validate_relative_path("a/b.txt").unwrap(), "a/b.txt");
    }

    #[test]
    fn normalizes_backslashes() {
        assert_eq!(validate_relative_path("a\\b\\c.txt").unwrap(), "a/b/c.txt");
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("   ").is_err());
    }

    #[test]
    fn rejects_parent_traversal() {
        assert!(validate_relative_path("../etc/passwd").is_err());
        assert!(validate_relative_path("a/../b").is_err());
        assert!(validate_relative_path("../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_rooted_paths() {
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("C:/Windows").is_err());
        assert!(validate_relative_path("\\\\server\\share").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(validate_relative_path("a/b\0c").is_err());
        assert!(validate_relative_path("a/b<c>.txt").is_err());
        assert!(validate_relative_path("a/b|c.txt").is_err());
    }

    #[test]
    fn join_under_root_stays_inside() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        let joined = join_under_root(dir.path(), "a/b.txt").unwrap();
        assert!(joined.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn join_under_root_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(join_under_root(dir.path(), "../escape.txt").is_err());
    }

    #[test]
    fn base64url_round_trips() {
        for s in ["a/b.txt", "", "héllo/wörld.bin", "a b/c!d"] {
            let encoded = base64url_encode(s);
            assert!(!encoded.contains('='));
            assert_eq!(base64url_decode(&encoded).unwrap(), s);
        }
    }
}
