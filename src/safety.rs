//! Guard against overwriting the wrong file when writing a corpus database.
//!
//! `import-corpus` deletes and recreates its output, so a mistyped path could
//! destroy a hand-built lyrics database or the catalog being imported.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Resolve a path for comparison. Falls back to the path as given when it
/// does not exist yet; a missing parent is resolved where possible.
fn resolved(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// Validates that an output path is safe to delete and recreate.
///
/// * the output filename must contain `required_pattern` (e.g. "corpus")
/// * the output must not be one of `source_paths`, compared after resolving
///   symlinks and relative components
/// * the output must not be a directory
pub fn validate_output_path(
    output: &Path,
    required_pattern: &str,
    source_paths: &[&Path],
) -> Result<()> {
    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if !output_name.contains(required_pattern) {
        bail!(
            "Safety check failed: output file '{}' must contain '{}' in the name",
            output.display(),
            required_pattern
        );
    }

    if output.is_dir() {
        bail!(
            "Safety check failed: output '{}' is a directory",
            output.display()
        );
    }

    let output_resolved = resolved(output);
    for source in source_paths {
        if output == *source || output_resolved == resolved(source) {
            bail!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_output() {
        let output = PathBuf::from("/tmp/radiohead-corpus.sqlite3");
        let source = PathBuf::from("/data/radiohead.json");
        assert!(validate_output_path(&output, "corpus", &[&source]).is_ok());
    }

    #[test]
    fn test_missing_pattern() {
        let output = PathBuf::from("/tmp/radiohead_songs.db");
        let source = PathBuf::from("/data/radiohead.json");
        let err = validate_output_path(&output, "corpus", &[&source]).unwrap_err();
        assert!(err.to_string().contains("must contain 'corpus'"));
    }

    #[test]
    fn test_same_as_source() {
        let path = PathBuf::from("/data/corpus.json");
        let err = validate_output_path(&path, "corpus", &[&path]).unwrap_err();
        assert!(err.to_string().contains("cannot be the same"));
    }

    #[test]
    fn test_same_file_through_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("corpus.json");
        std::fs::write(&source, "{}").unwrap();
        let sneaky = dir.path().join(".").join("corpus.json");

        assert!(validate_output_path(&sneaky, "corpus", &[&source]).is_err());
    }

    #[test]
    fn test_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("corpus-dir");
        std::fs::create_dir(&output).unwrap();
        let source = dir.path().join("catalog.json");

        let err = validate_output_path(&output, "corpus", &[&source]).unwrap_err();
        assert!(err.to_string().contains("is a directory"));
    }
}
