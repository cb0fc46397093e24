//! Workspace-wide constants and default paths.

use std::path::{Path, PathBuf};

/// Number of loop slots probed before giving up. Some hosts only expose 32.
pub const DEFAULT_LOSETUP_MAX_TRIES: u32 = 32;

/// Number of block devices hot-plugged by the end-to-end check.
pub const DEFAULT_HOTPLUG_DEVICES: usize = 10;

/// Device node prefix for loop slots; the slot index is appended.
pub const DEFAULT_LOOP_PREFIX: &str = "/dev/loop";

/// Size of each backing disk image in MiB.
pub const DEFAULT_IMAGE_SIZE_MIB: u32 = 5;

/// Filename prefix of backing disk images in the temp directory.
pub const DISK_IMAGE_PREFIX: &str = "dd";

/// `fdisk` keystrokes: new GPT label, new partition, accept the three
/// default prompts, write.
pub const FDISK_GPT_SCRIPT: &str = "g\nn\n\n\n\nw\n";

/// Name of the advisory lock file guarding loop slot allocation.
pub const LOCK_FILE_NAME: &str = "cctest-loop.lock";

/// Default docker client binary.
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

/// Default image for workload and hot-plug containers.
pub const DEFAULT_IMAGE: &str = "busybox";

/// Image shipping a non-root `postgres` user, used by identity checks.
pub const IDENTITY_IMAGE: &str = "postgres";

/// Length of generated container names.
pub const CONTAINER_NAME_LEN: usize = 30;

/// Environment variable pointing at a YAML configuration file.
pub const CONFIG_ENV: &str = "CCTEST_CONFIG";

/// Directory for lock files; writable by root only.
pub const LOCK_DIR: &str = "/run/lock";

/// Returns the default allocation lock path.
pub fn default_lock_file() -> PathBuf {
    Path::new(LOCK_DIR).join(LOCK_FILE_NAME)
}
