//! On-disk analysis result store — §4.8 / §6.
//!
//! JSON documents keyed by `(absolute_path, content_digest)`, one file per
//! entry, written via the same atomic-rename helper the Hash Store uses.
//! Append-only during a run: entries are written once per `(path, digest)`
//! pair and never mutated in place.

use std::path::{Path, PathBuf};

use crate::core::error::{Result, SystemError};
use crate::core::hash_store::encode_path;
use crate::core::safe_ops::atomic_write_file;

use super::analyzer::SyscallAnalysisResult;

pub struct AnalysisCache {
    root: PathBuf,
}

impl AnalysisCache {
    #[must_use]
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, target: &Path, digest_hex: &str) -> PathBuf {
        self.root.join(format!("{}.{digest_hex}.json", encode_path(target)))
    }

    /// Returns the cached result for `(target, digest_hex)`, if present.
    /// A result keyed by a stale digest (the binary changed) simply isn't
    /// found — the caller re-analyzes and calls `put`.
    pub fn get(&self, target: &Path, digest_hex: &str) -> Result<Option<SyscallAnalysisResult>> {
        let path = self.entry_path(target, digest_hex);
        match std::fs::read(&path) {
            Ok(bytes) => {
                let result = serde_json::from_slice(&bytes)
                    .map_err(|e| SystemError(format!("corrupt analysis cache entry: {e}")))?;
                Ok(Some(result))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SystemError::from(e).into()),
        }
    }

    /// Persists `result` for `(target, digest_hex)`. Overwrites any
    /// existing entry for the same key (which only happens if a prior run
    /// was interrupted mid-write; the key itself never changes meaning).
    pub fn put(&self, target: &Path, digest_hex: &str, result: &SyscallAnalysisResult) -> Result<()> {
        let path = self.entry_path(target, digest_hex);
        let body = serde_json::to_vec_pretty(result)
            .map_err(|e| SystemError(format!("failed to serialize analysis result: {e}")))?;
        atomic_write_file(path, body)
    }
}
