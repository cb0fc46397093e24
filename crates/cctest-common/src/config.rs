//! Configuration model for provisioning and docker-driven checks.
//!
//! Every tunable is carried explicitly in these structs and handed to the
//! component that needs it; nothing reads process-wide globals.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CctestError, Result};

/// Root configuration, usually loaded from a YAML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CctestConfig {
    /// Docker client settings.
    pub docker: DockerConfig,
    /// Loop device provisioning settings.
    pub loop_devices: LoopConfig,
    /// Number of devices attached by the hot-plug check.
    pub hotplug_devices: usize,
}

impl Default for CctestConfig {
    fn default() -> Self {
        Self {
            docker: DockerConfig::default(),
            loop_devices: LoopConfig::default(),
            hotplug_devices: constants::DEFAULT_HOTPLUG_DEVICES,
        }
    }
}

impl CctestConfig {
    /// Loads and validates a configuration file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| CctestError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails validation.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw).map_err(|e| CctestError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants of every section.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::Config`] naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.hotplug_devices == 0 {
            return Err(CctestError::Config {
                message: "hotplug_devices must be at least 1".into(),
            });
        }
        self.loop_devices.validate()?;
        self.docker.validate()
    }
}

/// Settings for the `docker` client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker client binary, resolved on `PATH`.
    pub binary: PathBuf,
    /// Image used for workload and hot-plug containers.
    pub image: String,
    /// Image used by identity checks; must ship a `postgres` user.
    pub identity_image: String,
    /// Optional `--runtime` passed to every `docker run`.
    pub runtime: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(constants::DEFAULT_DOCKER_BINARY),
            image: constants::DEFAULT_IMAGE.to_string(),
            identity_image: constants::IDENTITY_IMAGE.to_string(),
            runtime: None,
        }
    }
}

impl DockerConfig {
    fn validate(&self) -> Result<()> {
        if self.image.is_empty() {
            return Err(CctestError::Config {
                message: "docker.image must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Settings for the loop device provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Number of slots probed per device before giving up.
    pub max_tries: u32,
    /// Device node prefix; the slot index is appended.
    pub device_prefix: String,
    /// Size of each backing image in MiB.
    pub image_size_mib: u32,
    /// Filename prefix for backing images.
    pub image_prefix: String,
    /// Directory for backing images; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    /// Advisory lock held while a slot is claimed; `None` disables it.
    pub lock_file: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_tries: constants::DEFAULT_LOSETUP_MAX_TRIES,
            device_prefix: constants::DEFAULT_LOOP_PREFIX.to_string(),
            image_size_mib: constants::DEFAULT_IMAGE_SIZE_MIB,
            image_prefix: constants::DISK_IMAGE_PREFIX.to_string(),
            temp_dir: None,
            lock_file: Some(constants::default_lock_file()),
        }
    }
}

impl LoopConfig {
    fn validate(&self) -> Result<()> {
        if self.max_tries == 0 {
            return Err(CctestError::Config {
                message: "loop_devices.max_tries must be at least 1".into(),
            });
        }
        if self.image_size_mib == 0 {
            return Err(CctestError::Config {
                message: "loop_devices.image_size_mib must be at least 1".into(),
            });
        }
        if self.device_prefix.is_empty() {
            return Err(CctestError::Config {
                message: "loop_devices.device_prefix must not be empty".into(),
            });
        }
        Ok(())
    }
}
