//! ManifestBuilder (spec §4.2): walks the local root and produces the
//! `FileEntry` list sent to the server's `/api/sync/manifest` endpoint.

use crate::utils::errors::{ClientError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;
use sync_core::protocol::FileEntry;
use walkdir::WalkDir;

/// Directory and file name fragments never sent up, matching common sync
/// clients' default excludes.
const DEFAULT_EXCLUDES: &[&str] = &[".git", ".sync-state.json", ".DS_Store"];

/// Walk `root` and build the manifest of local files. Symlinks to
/// directories are skipped; broken symlinks are skipped. When `always_hash`
/// is set, every entry carries a sha256 so the server's equal-mtime tiebreak
/// can run without a cache miss.
pub fn build(root: &Path, always_hash: bool) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();

    if !root.exists() {
        return Err(ClientError::InvalidPath(format!("sync root does not exist: {}", root.display())));
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| ClientError::Io(std::io::Error::other(e.to_string())))?;

        if should_exclude(entry.file_name().to_string_lossy().as_ref()) {
            continue;
        }

        let raw_metadata = entry.metadata().map_err(|e| ClientError::Io(std::io::Error::other(e.to_string())))?;
        if raw_metadata.is_symlink() {
            match std::fs::metadata(entry.path()) {
                Ok(resolved) if resolved.is_file() => {}
                _ => continue,
            }
        } else if !raw_metadata.is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let metadata = std::fs::metadata(entry.path())?;
        let mtime: DateTime<Utc> = metadata.modified()?.into();

        let sha256 = if always_hash { Some(hash_file(entry.path())?) } else { None };

        entries.push(FileEntry {
            path: relative,
            size: metadata.len(),
            last_write_utc: mtime.trunc_subsecs(0),
            sha256,
        });
    }

    Ok(entries)
}

fn hash_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn should_exclude(name: &str) -> bool {
    DEFAULT_EXCLUDES.iter().any(|pattern| name.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_manifest_for_flat_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"world!").unwrap();

        let entries = build(dir.path(), false).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.path == "a.txt" && e.size == 5));
    }

    #[test]
    fn includes_sha256_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let entries = build(dir.path(), true).unwrap();
        assert!(entries[0].sha256.is_some());
    }

    #[test]
    fn excludes_dotgit_and_state_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("HEAD"), b"ref").unwrap();
        std::fs::write(dir.path().join(".sync-state.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"keep").unwrap();

        let entries = build(dir.path(), false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "keep.txt");
    }

    #[test]
    fn recurses_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("nested.txt"), b"x").unwrap();

        let entries = build(dir.path(), false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "sub/nested.txt");
    }
}
