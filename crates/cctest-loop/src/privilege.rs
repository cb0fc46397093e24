//! Privilege preconditions for touching loop devices.

use cctest_common::error::{CctestError, Result};

/// Returns whether the effective user is root.
#[cfg(target_os = "linux")]
#[must_use]
pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Loop devices only exist on Linux.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub const fn is_root() -> bool {
    false
}

/// Fails unless running as root; binding loop devices needs it.
///
/// # Errors
///
/// Returns [`CctestError::PermissionDenied`] for any other user.
pub fn ensure_root() -> Result<()> {
    if is_root() {
        return Ok(());
    }
    Err(CctestError::PermissionDenied {
        message: "only root user can create loop devices".into(),
    })
}
