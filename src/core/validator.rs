//! File Validator — §4.3.
//!
//! TOCTOU-safe verify-then-read: the one `open` + `read` produced by
//! [`fileio`] is both hashed and handed back to the caller. The path is
//! never re-opened between the hash check and use.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::core::error::IntegrityError;
use crate::core::fileio;
use crate::core::hash_store::HashStore;

/// Open `path`, read it once, hash the buffer, and compare against the
/// store's recorded entry. On success returns the exact bytes that were
/// hashed — callers must not re-read the file afterwards.
pub fn verify_and_read(
    store: &HashStore,
    path: &Path,
    skip_standard_paths: bool,
    max_len: u64,
) -> Result<Vec<u8>, IntegrityError> {
    Ok(verify_and_read_with_digest(store, path, skip_standard_paths, max_len)?.0)
}

/// Same as [`verify_and_read`], but also hands back the hex digest that was
/// verified, so a caller (e.g. the Risk Analyzer's cache key) doesn't have
/// to hash the bytes a second time.
pub fn verify_and_read_with_digest(
    store: &HashStore,
    path: &Path,
    skip_standard_paths: bool,
    max_len: u64,
) -> Result<(Vec<u8>, String), IntegrityError> {
    let handle = fileio::open_readonly(path, skip_standard_paths)?;
    let buf = fileio::read_entire(handle, max_len)?;

    let digest_hex = hex::encode(Sha256::digest(&buf));
    store.verify(path, &digest_hex)?;

    Ok((buf, digest_hex))
}
