//! Small filesystem helpers shared by the hash store, the analysis-result
//! cache, and config loading: path sanity checks and atomic writes.

use std::path::{Path, PathBuf};

use crate::core::error::{Result, SystemError};

/// Reject empty paths, paths containing a NUL byte, and non-UTF-8 paths.
/// Does not canonicalize — callers needing lexical `..`-rejection use
/// `fileio::open_readonly` instead, which has stricter TOCTOU guarantees.
pub fn validate_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();

    if path.as_os_str().is_empty() {
        return Err(SystemError("path cannot be empty".to_string()).into());
    }

    match path.to_str() {
        Some(s) if s.contains('\0') => {
            return Err(SystemError("path contains a NUL byte".to_string()).into());
        }
        Some(_) => {}
        None => {
            return Err(SystemError("path is not valid UTF-8".to_string()).into());
        }
    }

    Ok(path.to_path_buf())
}

/// Write `contents` to `path` via a temp-file-then-rename so a reader never
/// observes a partially written file. Used for hash-store entries and the
/// JSON risk-analysis cache.
pub fn atomic_write_file(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    let path = validate_path(path)?;
    let contents = contents.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(SystemError::from)?;
    }

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, contents).map_err(SystemError::from)?;
    std::fs::rename(&temp_path, &path).map_err(SystemError::from)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn validate_path_accepts_a_normal_path() {
        assert!(validate_path("/tmp/cmdguard").is_ok());
    }

    #[test]
    fn validate_path_rejects_empty() {
        assert!(validate_path("").is_err());
    }

    #[test]
    fn validate_path_rejects_nul_byte() {
        assert!(validate_path("/tmp/foo\0bar").is_err());
    }

    #[test]
    fn atomic_write_file_creates_parent_and_content() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("nested").join("out.txt");

        atomic_write_file(&file_path, b"hello").unwrap();

        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "hello");
    }
}
