//! Safe File I/O — §4.1.
//!
//! `open_readonly` and `read_entire` refuse symlinks on the final path
//! component, refuse world-writable parent directories (unless the config
//! opts into `skip_standard_paths`), and bound the number of bytes read.

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use rustix::fs::{self, Mode, OFlags};

use crate::core::error::IntegrityError;

const WORLD_WRITABLE_BIT: u32 = 0o002;

/// An opened, symlink-free file handle ready for a bounded read.
pub struct Handle {
    file: File,
    path: PathBuf,
}

impl Handle {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lexically normalize a path: reject any `..` component outright (spec
/// §4.1 forbids it rather than resolving it) and require the result to be
/// absolute.
fn normalize_absolute(path: &Path) -> Result<PathBuf, IntegrityError> {
    if !path.is_absolute() {
        return Err(IntegrityError::NotFound(path.to_path_buf()));
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                return Err(IntegrityError::UnsafeParent(path.to_path_buf()));
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

fn parent_is_world_writable(parent: &Path) -> Result<bool, IntegrityError> {
    let meta = std::fs::symlink_metadata(parent)
        .map_err(|_| IntegrityError::UnsafeParent(parent.to_path_buf()))?;
    Ok(meta.mode() & WORLD_WRITABLE_BIT != 0)
}

/// Open `path` for reading, refusing to follow a symlink on the final
/// component and refusing a world-writable parent unless `skip_standard_paths`.
pub fn open_readonly(path: &Path, skip_standard_paths: bool) -> Result<Handle, IntegrityError> {
    let path = normalize_absolute(path)?;

    let parent = path
        .parent()
        .ok_or_else(|| IntegrityError::UnsafeParent(path.clone()))?;

    if !skip_standard_paths && parent_is_world_writable(parent)? {
        return Err(IntegrityError::UnsafeParent(path));
    }

    // lstat the final component before opening, to compare against the
    // post-open fstat and close the TOCTOU window on a symlink swap.
    let lstat = std::fs::symlink_metadata(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IntegrityError::NotFound(path.clone()),
        std::io::ErrorKind::PermissionDenied => IntegrityError::PermissionDenied(path.clone()),
        _ => IntegrityError::NotFound(path.clone()),
    })?;

    if lstat.file_type().is_symlink() {
        return Err(IntegrityError::SymlinkDisallowed(path));
    }

    let fd = fs::open(
        &path,
        OFlags::RDONLY | OFlags::NOFOLLOW | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .map_err(|e| match e {
        rustix::io::Errno::LOOP => IntegrityError::SymlinkDisallowed(path.clone()),
        rustix::io::Errno::NOENT => IntegrityError::NotFound(path.clone()),
        rustix::io::Errno::ACCES => IntegrityError::PermissionDenied(path.clone()),
        _ => IntegrityError::NotFound(path.clone()),
    })?;

    let file = File::from(fd);
    let fstat = file
        .metadata()
        .map_err(|_| IntegrityError::NotFound(path.clone()))?;

    // Same device+inode as what we lstat'd means nothing swapped underneath us.
    if fstat.dev() != lstat.dev() || fstat.ino() != lstat.ino() {
        return Err(IntegrityError::SymlinkDisallowed(path));
    }
    if fstat.file_type().is_symlink() {
        return Err(IntegrityError::SymlinkDisallowed(path));
    }

    Ok(Handle { file, path })
}

/// Read the entirety of an already-opened handle, refusing more than
/// `max_len` bytes.
pub fn read_entire(mut handle: Handle, max_len: u64) -> Result<Vec<u8>, IntegrityError> {
    let size = handle
        .file
        .metadata()
        .map(|m| m.len())
        .unwrap_or(u64::MAX);
    if size > max_len {
        return Err(IntegrityError::FileTooLarge {
            path: handle.path.clone(),
            limit: max_len,
        });
    }

    let mut buf = Vec::with_capacity(size.min(max_len) as usize);
    let mut limited = (&handle.file).take(max_len + 1);
    limited
        .read_to_end(&mut buf)
        .map_err(|_| IntegrityError::NotFound(handle.path.clone()))?;

    if buf.len() as u64 > max_len {
        return Err(IntegrityError::FileTooLarge {
            path: handle.path,
            limit: max_len,
        });
    }

    // Touch fd explicitly so `handle.file`'s raw fd stays alive through the
    // whole read (it already does via ownership; this just documents intent
    // for why `handle` isn't dropped earlier).
    let _ = handle.file.as_raw_fd();
    Ok(buf)
}

/// Convenience: open then read in one TOCTOU-safe step.
pub fn open_and_read(
    path: &Path,
    skip_standard_paths: bool,
    max_len: u64,
) -> Result<Vec<u8>, IntegrityError> {
    let handle = open_readonly(path, skip_standard_paths)?;
    read_entire(handle, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn reads_a_regular_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("data.txt");
        std::fs::write(&file_path, b"hello").unwrap();

        let bytes = open_and_read(&file_path, true, 1024).unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn refuses_symlink_on_final_component() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real.txt");
        std::fs::write(&real, b"secret").unwrap();
        let link = dir.path().join("link.txt");
        symlink(&real, &link).unwrap();

        let err = open_and_read(&link, true, 1024).unwrap_err();
        assert!(matches!(err, IntegrityError::SymlinkDisallowed(_)));
    }

    #[test]
    fn rejects_relative_paths() {
        let err = open_and_read(Path::new("relative/path.txt"), true, 1024).unwrap_err();
        assert!(matches!(err, IntegrityError::NotFound(_)));
    }

    #[test]
    fn rejects_dot_dot_components() {
        let err = open_and_read(Path::new("/tmp/../etc/passwd"), true, 1024).unwrap_err();
        assert!(matches!(err, IntegrityError::UnsafeParent(_)));
    }

    #[test]
    fn file_too_large_is_bounded() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("big.txt");
        std::fs::write(&file_path, vec![0u8; 100]).unwrap();

        assert!(open_and_read(&file_path, true, 100).is_ok());
        let err = open_and_read(&file_path, true, 99).unwrap_err();
        assert!(matches!(err, IntegrityError::FileTooLarge { .. }));
    }

    #[test]
    fn refuses_world_writable_parent_unless_skipped() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let mut perm = std::fs::metadata(&sub).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perm, 0o777);
        std::fs::set_permissions(&sub, perm).unwrap();

        let file_path = sub.join("data.txt");
        std::fs::write(&file_path, b"hi").unwrap();

        let err = open_and_read(&file_path, false, 1024).unwrap_err();
        assert!(matches!(err, IntegrityError::UnsafeParent(_)));

        assert!(open_and_read(&file_path, true, 1024).is_ok());
    }
}
