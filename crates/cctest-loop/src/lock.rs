//! Host-wide advisory lock around loop slot claims.
//!
//! Only cooperating processes that take the same lock file are serialized;
//! anything else calling `losetup` on the host can still grab a slot between
//! our probe and our bind.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use cctest_common::error::{CctestError, Result};

/// Held lock; released when dropped.
pub struct AllocationGuard {
    path: PathBuf,
    #[cfg(target_os = "linux")]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(target_os = "linux"))]
    _file: File,
}

impl std::fmt::Debug for AllocationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationGuard")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AllocationGuard {
    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    let _ = options.create(true).truncate(false).write(true);
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let _ = options.custom_flags(nix::fcntl::OFlag::O_NOFOLLOW.bits());
    }
    options
        .open(path)
        .map_err(|e| CctestError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Blocks until the exclusive lock on `path` is acquired, creating the file
/// if needed.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or `flock(2)` fails.
#[cfg(target_os = "linux")]
pub fn acquire(path: &Path) -> Result<AllocationGuard> {
    use nix::fcntl::{Flock, FlockArg};

    let file = open_lock_file(path)?;
    let lock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
        CctestError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::from(errno),
        }
    })?;
    tracing::trace!(path = %path.display(), "allocation lock acquired");
    Ok(AllocationGuard {
        path: path.to_path_buf(),
        _lock: lock,
    })
}

/// Opens the lock file without locking; loop devices only exist on Linux.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
#[cfg(not(target_os = "linux"))]
pub fn acquire(path: &Path) -> Result<AllocationGuard> {
    let file = open_lock_file(path)?;
    Ok(AllocationGuard {
        path: path.to_path_buf(),
        _file: file,
    })
}

/// Acquires the lock when a path is configured.
///
/// # Errors
///
/// Same as [`acquire`].
pub fn acquire_optional(path: Option<&Path>) -> Result<Option<AllocationGuard>> {
    path.map(acquire).transpose()
}
