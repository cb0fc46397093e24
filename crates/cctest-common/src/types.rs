//! Domain primitive types used across the cctest workspace.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name given to a container via `docker run --name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerName(String);

impl ContainerName {
    /// Creates a container name from a string value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generates a random hex name of [`CONTAINER_NAME_LEN`] characters.
    ///
    /// [`CONTAINER_NAME_LEN`]: crate::constants::CONTAINER_NAME_LEN
    #[must_use]
    pub fn random() -> Self {
        let mut name = uuid::Uuid::new_v4().simple().to_string();
        name.truncate(crate::constants::CONTAINER_NAME_LEN);
        Self(name)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zero-filled, partitioned backing file for a loop device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiskImage {
    /// Location of the file on the host.
    pub path: PathBuf,
}

impl DiskImage {
    /// Wraps an existing backing file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Association between a backing file and a loop device node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoopBinding {
    /// Slot index within the loop pool.
    pub index: u32,
    /// Device node, e.g. `/dev/loop3`.
    pub device: PathBuf,
}

impl LoopBinding {
    /// Returns the device node path.
    #[must_use]
    pub fn device(&self) -> &Path {
        &self.device
    }
}

/// A fully provisioned block device: backing file plus its binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProvisionedDevice {
    /// Backing file.
    pub image: DiskImage,
    /// Loop device the file is bound to.
    pub binding: LoopBinding,
}

impl ProvisionedDevice {
    /// Returns the loop device node path.
    #[must_use]
    pub fn device(&self) -> &Path {
        self.binding.device()
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn image_path(&self) -> &Path {
        self.image.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_container_name_has_fixed_length() {
        let name = ContainerName::random();
        assert_eq!(name.as_str().len(), crate::constants::CONTAINER_NAME_LEN);
        assert!(name.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn random_container_names_differ() {
        assert_ne!(ContainerName::random(), ContainerName::random());
    }

    #[test]
    fn provisioned_device_serializes_paths() {
        let dev = ProvisionedDevice {
            image: DiskImage::new("/tmp/dd42"),
            binding: LoopBinding {
                index: 4,
                device: PathBuf::from("/dev/loop4"),
            },
        };
        let json = serde_json::to_value(&dev).expect("serialize");
        assert_eq!(json["image"]["path"], "/tmp/dd42");
        assert_eq!(json["binding"]["device"], "/dev/loop4");
        assert_eq!(json["binding"]["index"], 4);
    }
}
