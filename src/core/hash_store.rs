//! Hash Store — §4.2.
//!
//! One flat file per recorded target, named with a reversible encoding of
//! the target's absolute path. Entry body is `"<algorithm>:<hex digest>\n"`.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::error::IntegrityError;
use crate::core::fileio;

const ALGORITHM: &str = "sha256";
const MAX_RECORD_LEN: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    pub path: PathBuf,
    pub algorithm: String,
    pub digest_hex: String,
}

impl HashEntry {
    fn to_body(&self) -> String {
        format!("{}:{}\n", self.algorithm, self.digest_hex)
    }

    fn parse(path: PathBuf, body: &str) -> Result<Self, IntegrityError> {
        let body = body.trim_end_matches(['\n', '\r']);
        let (algorithm, digest_hex) = body
            .split_once(':')
            .ok_or_else(|| IntegrityError::MissingHashEntry(path.clone()))?;
        Ok(HashEntry {
            path,
            algorithm: algorithm.to_string(),
            digest_hex: digest_hex.to_string(),
        })
    }
}

/// Percent-encode an absolute path's raw bytes, keeping the RFC 3986
/// unreserved set plus `-_.~` literal, so the store directory holds one
/// flat file per target and `decode(encode(p)) == p` for every `p`.
pub(crate) fn encode_path(path: &Path) -> String {
    let bytes = path.as_os_str().as_encoded_bytes();
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn decode_path(name: &str) -> Result<PathBuf, IntegrityError> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name
                .get(i + 1..i + 3)
                .ok_or_else(|| IntegrityError::HashStoreNotSafe("malformed entry name".into()))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| IntegrityError::HashStoreNotSafe("malformed entry name".into()))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    let os_str = unsafe { std::ffi::OsStr::from_encoded_bytes_unchecked(&out) };
    Ok(PathBuf::from(os_str))
}

/// A directory of recorded `HashEntry`s, one file per target path.
pub struct HashStore {
    root: PathBuf,
}

impl HashStore {
    /// Open `root` as a hash store, refusing a world-writable directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, IntegrityError> {
        let root = root.into();
        let meta = std::fs::symlink_metadata(&root)
            .map_err(|_| IntegrityError::NotFound(root.clone()))?;
        if meta.permissions().mode() & 0o002 != 0 {
            return Err(IntegrityError::HashStoreNotSafe(format!(
                "{} is world-writable",
                root.display()
            )));
        }
        let my_uid = rustix::process::getuid().as_raw();
        if meta.uid() != 0 && meta.uid() != my_uid {
            return Err(IntegrityError::HashStoreNotSafe(format!(
                "{} is not owned by root or the invoking user",
                root.display()
            )));
        }
        Ok(HashStore { root })
    }

    fn entry_path(&self, target: &Path) -> PathBuf {
        self.root.join(encode_path(target))
    }

    /// Compute `target`'s current digest and write a new entry, refusing to
    /// overwrite an existing one unless `force`.
    pub fn record(&self, target: &Path, force: bool) -> Result<HashEntry, IntegrityError> {
        let entry_path = self.entry_path(target);
        if !force && entry_path.exists() {
            return Err(IntegrityError::HashStoreNotSafe(format!(
                "an entry already exists for {} (use force to overwrite)",
                target.display()
            )));
        }

        let bytes = fileio::open_and_read(target, false, MAX_RECORD_LEN)?;
        let digest_hex = hex::encode(Sha256::digest(&bytes));
        let entry = HashEntry {
            path: target.to_path_buf(),
            algorithm: ALGORITHM.to_string(),
            digest_hex,
        };

        std::fs::write(&entry_path, entry.to_body())
            .map_err(|e| IntegrityError::HashStoreNotSafe(e.to_string()))?;
        let mut perm = std::fs::metadata(&entry_path)
            .map_err(|e| IntegrityError::HashStoreNotSafe(e.to_string()))?
            .permissions();
        perm.set_mode(0o600);
        std::fs::set_permissions(&entry_path, perm)
            .map_err(|e| IntegrityError::HashStoreNotSafe(e.to_string()))?;

        Ok(entry)
    }

    /// Look up the recorded entry for `target`, if one exists.
    pub fn get(&self, target: &Path) -> Result<Option<HashEntry>, IntegrityError> {
        let entry_path = self.entry_path(target);
        match std::fs::read_to_string(&entry_path) {
            Ok(body) => Ok(Some(HashEntry::parse(target.to_path_buf(), &body)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IntegrityError::HashStoreNotSafe(e.to_string())),
        }
    }

    /// Compare `observed_digest` (hex) against the recorded entry for `target`.
    pub fn verify(&self, target: &Path, observed_digest: &str) -> Result<(), IntegrityError> {
        let entry = self
            .get(target)?
            .ok_or_else(|| IntegrityError::MissingHashEntry(target.to_path_buf()))?;
        if entry.digest_hex.eq_ignore_ascii_case(observed_digest) {
            Ok(())
        } else {
            Err(IntegrityError::HashMismatch {
                path: target.to_path_buf(),
                expected: entry.digest_hex,
                actual: observed_digest.to_string(),
            })
        }
    }

    /// List every path recorded in the store, by decoding entry filenames.
    pub fn list(&self) -> Result<Vec<PathBuf>, IntegrityError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .map_err(|e| IntegrityError::HashStoreNotSafe(e.to_string()))?
        {
            let entry = entry.map_err(|e| IntegrityError::HashStoreNotSafe(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            out.push(decode_path(&name)?);
        }
        Ok(out)
    }
}
