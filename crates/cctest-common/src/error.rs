//! Unified error types for the cctest workspace.
//!
//! External command output is never surfaced as a bare string: every failure
//! is tagged with the kind of operation that produced it, so callers can tell
//! slot exhaustion from an unbind refusal without matching on stderr.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CctestError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An external utility exited with a non-zero status.
    #[error("{program} exited with status {exit_code}: {stderr}")]
    CommandFailure {
        /// Program that was invoked.
        program: String,
        /// Exit status, `-1` when the process was killed by a signal.
        exit_code: i32,
        /// Captured standard error, verbatim.
        stderr: String,
    },

    /// Every candidate loop slot refused the bind.
    #[error("unable to create loop device for disk {image} after {tried} slot(s): {last_error}")]
    NoFreeLoopDevice {
        /// Backing file that could not be bound.
        image: PathBuf,
        /// Number of slots probed.
        tried: u32,
        /// `losetup` stderr from the last slot probed.
        last_error: String,
    },

    /// The OS rejected a loop device detach.
    #[error("failed to unbind {device}: {stderr}")]
    Unbind {
        /// Loop device path.
        device: PathBuf,
        /// Captured standard error, verbatim.
        stderr: String,
    },

    /// A backing file could not be deleted.
    #[error("failed to remove disk image {path}: {source}")]
    FileRemoval {
        /// Backing file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A permission or privilege error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// A runtime check observed something other than the expected outcome.
    #[error("verification failed: {message}")]
    Verification {
        /// Description of the mismatch.
        message: String,
    },

    /// Best-effort cleanup finished but some steps failed.
    #[error("teardown finished with {} failure(s): {}", .failures.len(), join(.failures))]
    Teardown {
        /// Every failure collected during teardown, in the order observed.
        failures: Vec<CctestError>,
    },

    /// An operation failed and the cleanup that followed left resources behind.
    #[error("{source}; cleanup also failed: {}", join(.failures))]
    CleanupFailed {
        /// The failure that triggered the cleanup.
        source: Box<CctestError>,
        /// Every failure collected during the cleanup, in the order observed.
        failures: Vec<CctestError>,
    },
}

fn join(errors: &[CctestError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CctestError>;
