//! Filesystem hygiene: secure directories, atomic writes, safe unlink.
//!
//! Everything mcpli persists is owner-only: directories 0700, files 0600.
//! Writes that other processes may observe (plists, diagnostic configs) go
//! through [`atomic_write`] so readers never see a torn file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CoreError, CoreResult};

/// Default mode for created directories.
pub const DIR_MODE: u32 = 0o700;

/// Default mode for written files.
pub const FILE_MODE: u32 = 0o600;

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Recursively create a directory with owner-only permissions.
///
/// The final chmod is best-effort: an already-existing directory with the
/// right owner is acceptable even if the chmod fails.
///
/// # Errors
///
/// Returns an error if directory creation fails.
pub fn secure_create_dir_all(path: &Path) -> CoreResult<()> {
    std::fs::create_dir_all(path).map_err(|e| CoreError::io(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(DIR_MODE));
    }
    Ok(())
}

/// Atomically write `bytes` to `path` with the given mode (default 0600).
///
/// Writes to a `.tmp-<basename>-<pid>-<seq>` sibling in the same directory,
/// then renames over the destination. The rename is atomic on POSIX
/// filesystems, so concurrent readers observe either the old or the new
/// content, never a mix.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be written or the rename
/// fails. The temporary file is removed on failure.
pub fn atomic_write(path: &Path, bytes: &[u8], mode: Option<u32>) -> CoreResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| CoreError::Validation(format!("no parent directory: {}", path.display())))?;
    let basename = path
        .file_name()
        .ok_or_else(|| CoreError::Validation(format!("no file name: {}", path.display())))?
        .to_string_lossy()
        .into_owned();

    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = parent.join(format!(
        ".tmp-{basename}-{pid}-{seq}",
        pid = std::process::id()
    ));

    if let Err(e) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(CoreError::io(&tmp, e));
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(CoreError::io(path, e));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = mode.unwrap_or(FILE_MODE);
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| CoreError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

/// Remove a file, treating "not found" as success.
///
/// # Errors
///
/// Returns an error for any failure other than `NotFound`.
pub fn safe_unlink(path: &Path) -> CoreResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::io(path, e)),
    }
}

/// Create and harden a directory that will hold Unix sockets.
///
/// The directory (and not a symlink in its place) must be owned by the
/// invoking user. Modes stricter than 0700 are preserved; looser modes are
/// tightened to 0700.
///
/// # Errors
///
/// Returns an error if the directory is a symlink, owned by another user,
/// or cannot be created or tightened.
pub fn secure_socket_dir(path: &Path) -> CoreResult<()> {
    // Only chmod on creation; an existing directory keeps any stricter mode.
    if !path.exists() {
        secure_create_dir_all(path)?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let meta = std::fs::symlink_metadata(path).map_err(|e| CoreError::io(path, e))?;

        if meta.file_type().is_symlink() {
            return Err(CoreError::UnsafeSocketDir {
                path: path.display().to_string(),
                reason: "is a symlink".to_string(),
            });
        }
        if !meta.is_dir() {
            return Err(CoreError::UnsafeSocketDir {
                path: path.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }

        let uid = nix::unistd::Uid::effective().as_raw();
        if meta.uid() != uid {
            return Err(CoreError::UnsafeSocketDir {
                path: path.display().to_string(),
                reason: format!("owned by uid {} (expected {uid})", meta.uid()),
            });
        }

        // Tighten group/other access; never loosen an even stricter mode.
        let mode = meta.mode() & 0o777;
        if mode & 0o077 != 0 {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o700))
                .map_err(|e| CoreError::io(path, e))?;
        }
    }

    Ok(())
}

/// Absolutize a path against the current working directory.
///
/// # Errors
///
/// Returns an error if the current directory cannot be determined.
pub fn absolutize(path: &Path) -> CoreResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| CoreError::io(".", e))?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_file_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.plist");

        atomic_write(&target, b"hello", None).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");

        // Overwrite in place.
        atomic_write(&target, b"world", None).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"world");

        // No stray temporaries left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_sets_owner_only_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("secret.json");
        atomic_write(&target, b"{}", None).unwrap();

        let mode = std::fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, FILE_MODE);
    }

    #[test]
    fn safe_unlink_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        safe_unlink(&dir.path().join("never-existed")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn secure_socket_dir_tightens_loose_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let sock_dir = dir.path().join("sockets");
        std::fs::create_dir(&sock_dir).unwrap();
        std::fs::set_permissions(&sock_dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        secure_socket_dir(&sock_dir).unwrap();

        let mode = std::fs::metadata(&sock_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn secure_socket_dir_rejects_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        let link = dir.path().join("link");
        std::fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let err = secure_socket_dir(&link).unwrap_err();
        assert!(matches!(err, CoreError::UnsafeSocketDir { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn secure_socket_dir_preserves_stricter_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let sock_dir = dir.path().join("strict");
        std::fs::create_dir(&sock_dir).unwrap();
        std::fs::set_permissions(&sock_dir, std::fs::Permissions::from_mode(0o500)).unwrap();

        secure_socket_dir(&sock_dir).unwrap();

        let mode = std::fs::metadata(&sock_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o500);
    }
}
