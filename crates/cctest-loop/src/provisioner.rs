//! Loop device provisioning.
//!
//! Each device goes through `Unborn -> FileCreated -> Partitioned -> Bound`
//! here, and `Bound -> Unbound -> Deleted` through [`LoopProvisioner::destroy`]
//! and [`LoopProvisioner::remove_image`]. Nothing is retried except the slot
//! scan, which moves on to a different slot each time.

use std::path::Path;

use cctest_common::config::LoopConfig;
use cctest_common::constants::FDISK_GPT_SCRIPT;
use cctest_common::error::{CctestError, Result};
use cctest_common::types::{DiskImage, LoopBinding, ProvisionedDevice};
use tempfile::TempPath;
use thiserror::Error;

use crate::command::{CommandRequest, CommandRunner, SystemRunner};
use crate::lock;
use crate::pool::{Claim, SlotPool};

const DD: &str = "dd";
const FDISK: &str = "fdisk";
const LOSETUP: &str = "losetup";

/// A `create` call that stopped part-way.
///
/// Devices completed before the failure are still bound and on disk; they
/// are handed back so the caller can tear them down.
#[derive(Debug, Error)]
#[error("provisioning stopped after {} device(s): {source}", .completed.len())]
pub struct ProvisionError {
    /// Devices fully provisioned before the failure, in creation order.
    pub completed: Vec<ProvisionedDevice>,
    /// The failure that stopped provisioning.
    pub source: CctestError,
}

/// Creates and destroys loop-backed block devices.
#[derive(Debug, Clone)]
pub struct LoopProvisioner<R = SystemRunner> {
    config: LoopConfig,
    pool: SlotPool,
    runner: R,
}

impl LoopProvisioner<SystemRunner> {
    /// Creates a provisioner that runs the real host utilities.
    #[must_use]
    pub fn new(config: LoopConfig) -> Self {
        Self::with_runner(config, SystemRunner::new())
    }
}

impl<R: CommandRunner> LoopProvisioner<R> {
    /// Creates a provisioner that runs commands through `runner`.
    #[must_use]
    pub fn with_runner(config: LoopConfig, runner: R) -> Self {
        let pool = SlotPool::from_config(&config);
        Self {
            config,
            pool,
            runner,
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Provisions `count` devices, one after the other.
    ///
    /// `create(0)` returns an empty list without touching the host.
    ///
    /// # Errors
    ///
    /// Stops at the first device that fails. The returned [`ProvisionError`]
    /// carries the devices completed so far; they are not rolled back.
    pub fn create(
        &self,
        count: usize,
    ) -> std::result::Result<Vec<ProvisionedDevice>, ProvisionError> {
        let mut completed = Vec::with_capacity(count);
        if count == 0 {
            return Ok(completed);
        }

        tracing::info!(count, "provisioning loop devices");
        for _ in 0..count {
            match self.create_one() {
                Ok(device) => completed.push(device),
                Err(source) => {
                    tracing::warn!(
                        completed = completed.len(),
                        requested = count,
                        error = %source,
                        "loop device provisioning stopped"
                    );
                    return Err(ProvisionError { completed, source });
                }
            }
        }
        Ok(completed)
    }

    /// Provisions a single device.
    ///
    /// The backing file of a device that fails part-way is deleted before
    /// returning; it never escapes as a half-built pair.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::CommandFailure`] if `dd` or `fdisk` fails,
    /// [`CctestError::NoFreeLoopDevice`] if no slot accepts the bind, or an
    /// I/O error for the temp file or lock.
    pub fn create_one(&self) -> Result<ProvisionedDevice> {
        let image = self.allocate_image()?;
        self.zero_fill(&image)?;
        self.partition(&image)?;
        let binding = self.bind(&image)?;

        let path = image.keep().map_err(|e| {
            if let Err(err) = self.destroy(&binding.device) {
                tracing::warn!(error = %err, "failed to release binding of unkept image");
            }
            CctestError::Io {
                path: e.path.to_path_buf(),
                source: e.error,
            }
        })?;

        tracing::debug!(
            image = %path.display(),
            device = %binding.device.display(),
            "loop device ready"
        );
        Ok(ProvisionedDevice {
            image: DiskImage::new(path),
            binding,
        })
    }

    /// Detaches a loop device.
    ///
    /// Not idempotent: detaching a device that is no longer bound fails.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::Unbind`] with the verbatim stderr if `losetup`
    /// refuses, or an error if `losetup` cannot be run.
    pub fn destroy(&self, device: &Path) -> Result<()> {
        let output = self
            .runner
            .run(&CommandRequest::new(LOSETUP).arg("-d").path_arg(device))?;
        if !output.success() {
            return Err(CctestError::Unbind {
                device: device.to_path_buf(),
                stderr: output.stderr,
            });
        }
        tracing::debug!(device = %device.display(), "loop device detached");
        Ok(())
    }

    /// Deletes a backing file.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::FileRemoval`] if the file is missing or cannot
    /// be removed.
    pub fn remove_image(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| CctestError::FileRemoval {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(image = %path.display(), "disk image removed");
        Ok(())
    }

    fn allocate_image(&self) -> Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        let _ = builder.prefix(&self.config.image_prefix);
        let file = match &self.config.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| CctestError::Io {
            path: self
                .config
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            source: e,
        })?;
        Ok(file.into_temp_path())
    }

    fn zero_fill(&self, image: &Path) -> Result<()> {
        let request = CommandRequest::new(DD).args([
            "if=/dev/zero".to_string(),
            format!("of={}", image.display()),
            "count=1".to_string(),
            format!("bs={}M", self.config.image_size_mib),
        ]);
        let _ = self.runner.run(&request)?.check(DD)?;
        Ok(())
    }

    fn partition(&self, image: &Path) -> Result<()> {
        let request = CommandRequest::new(FDISK)
            .path_arg(image)
            .stdin(FDISK_GPT_SCRIPT);
        let _ = self.runner.run(&request)?.check(FDISK)?;
        Ok(())
    }

    fn bind(&self, image: &Path) -> Result<LoopBinding> {
        let _guard = lock::acquire_optional(self.config.lock_file.as_deref())?;

        let mut last_error = String::new();
        let slot = self.pool.allocate(|slot| {
            let output = self.runner.run(
                &CommandRequest::new(LOSETUP)
                    .arg("-P")
                    .path_arg(&slot.device)
                    .path_arg(image),
            )?;
            if output.success() {
                return Ok(Claim::Claimed);
            }
            output.stderr.trim().clone_into(&mut last_error);
            Ok(Claim::Busy {
                reason: output.stderr,
            })
        })?;

        let slot = slot.ok_or_else(|| CctestError::NoFreeLoopDevice {
            image: image.to_path_buf(),
            tried: self.pool.capacity(),
            last_error,
        })?;
        Ok(LoopBinding {
            index: slot.index,
            device: slot.device,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::PathBuf;

    use super::*;
    use crate::testing::{LoopHost, ScriptedRunner};

    fn config_in(dir: &Path, max_tries: u32) -> LoopConfig {
        LoopConfig {
            max_tries,
            temp_dir: Some(dir.to_path_buf()),
            lock_file: Some(dir.join("loop.lock")),
            ..LoopConfig::default()
        }
    }

    fn device_paths(devices: &[ProvisionedDevice]) -> Vec<PathBuf> {
        devices.iter().map(|d| d.device().to_path_buf()).collect()
    }

    fn images_in(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .expect("read dir")
            .map(|e| e.expect("entry").path())
            .filter(|p| {
                p.extension().is_none()
                    && p.file_name()
                        .is_some_and(|n| n.to_string_lossy().starts_with("dd"))
            })
            .collect()
    }

    #[test]
    fn create_zero_has_no_side_effects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(4);
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 4), &host);

        let devices = prov.create(0).expect("create");
        assert!(devices.is_empty());
        assert!(host.invocations().is_empty());
        assert!(images_in(dir.path()).is_empty());
        assert!(!dir.path().join("loop.lock").exists());
    }

    #[test]
    fn create_returns_distinct_devices_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(8);
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 8), &host);

        let devices = prov.create(3).expect("create");
        assert_eq!(devices.len(), 3);
        assert_eq!(
            device_paths(&devices),
            vec![
                PathBuf::from("/dev/loop0"),
                PathBuf::from("/dev/loop1"),
                PathBuf::from("/dev/loop2"),
            ]
        );
        let images: HashSet<_> = devices.iter().map(|d| d.image_path().to_path_buf()).collect();
        assert_eq!(images.len(), 3);
        for d in &devices {
            assert!(d.image_path().exists());
            assert_eq!(host.backing_file(d.device()), Some(d.image_path().to_path_buf()));
        }
    }

    #[test]
    fn busy_slots_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(8);
        host.occupy(0);
        host.occupy(2);
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 8), &host);

        let devices = prov.create(2).expect("create");
        assert_eq!(
            device_paths(&devices),
            vec![PathBuf::from("/dev/loop1"), PathBuf::from("/dev/loop3")]
        );
    }

    #[test]
    fn commands_match_host_utility_shapes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(2);
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 2), &host);

        let device = prov.create_one().expect("create");
        let image = device.image_path().display().to_string();
        let calls = host.invocations();

        assert_eq!(calls[0].program, "dd");
        assert_eq!(
            calls[0].args,
            vec![
                "if=/dev/zero".to_string(),
                format!("of={image}"),
                "count=1".to_string(),
                "bs=5M".to_string(),
            ]
        );
        assert_eq!(calls[1].program, "fdisk");
        assert_eq!(calls[1].args, vec![image.clone()]);
        assert_eq!(calls[1].stdin.as_deref(), Some("g\nn\n\n\n\nw\n"));
        assert_eq!(calls[2].program, "losetup");
        assert_eq!(calls[2].args, vec!["-P".to_string(), "/dev/loop0".to_string(), image]);
    }

    #[test]
    fn exhaustion_reports_no_free_loop_device_with_completed_pairs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(2);
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 2), &host);

        let err = prov.create(3).unwrap_err();
        assert_eq!(err.completed.len(), 2);
        match &err.source {
            CctestError::NoFreeLoopDevice {
                image,
                tried,
                last_error,
            } => {
                assert_eq!(*tried, 2);
                assert!(last_error.ends_with("Device or resource busy"));
                assert!(!image.exists(), "failed unit's image must be removed");
            }
            other => panic!("unexpected: {other:?}"),
        }
        for d in &err.completed {
            assert!(d.image_path().exists());
            assert!(host.backing_file(d.device()).is_some());
        }
        assert_eq!(images_in(dir.path()).len(), 2);
    }

    #[test]
    fn scan_is_bounded_by_max_tries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(64);
        for i in 0..4 {
            host.occupy(i);
        }
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 4), &host);

        let err = prov.create(1).unwrap_err();
        assert!(err.completed.is_empty());
        assert!(matches!(err.source, CctestError::NoFreeLoopDevice { tried: 4, .. }));
        let binds = host
            .invocations()
            .into_iter()
            .filter(|c| c.program == "losetup")
            .count();
        assert_eq!(binds, 4);
    }

    #[test]
    fn exhaustion_keeps_last_losetup_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new(|req| {
            if req.program == "losetup" {
                ScriptedRunner::fail(
                    1,
                    "losetup: /dev/loop0: failed to set up loop device: Permission denied\n",
                )
            } else {
                ScriptedRunner::ok("")
            }
        });
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 1), &runner);

        let err = prov.create(1).unwrap_err();
        match err.source {
            CctestError::NoFreeLoopDevice { last_error, .. } => assert_eq!(
                last_error,
                "losetup: /dev/loop0: failed to set up loop device: Permission denied"
            ),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn dd_failure_surfaces_stderr_and_removes_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new(|req| {
            if req.program == "dd" {
                ScriptedRunner::fail(1, "dd: error writing: No space left on device")
            } else {
                ScriptedRunner::ok("")
            }
        });
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 4), &runner);

        let err = prov.create(1).unwrap_err();
        match err.source {
            CctestError::CommandFailure {
                program, stderr, ..
            } => {
                assert_eq!(program, "dd");
                assert_eq!(stderr, "dd: error writing: No space left on device");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(images_in(dir.path()).is_empty());
        assert_eq!(runner.invocations().len(), 1);
    }

    #[test]
    fn fdisk_failure_stops_before_binding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new(|req| {
            if req.program == "fdisk" {
                ScriptedRunner::fail(1, "fdisk: cannot open")
            } else {
                ScriptedRunner::ok("")
            }
        });
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 4), &runner);

        let err = prov.create(2).unwrap_err();
        assert!(err.completed.is_empty());
        assert!(matches!(
            err.source,
            CctestError::CommandFailure { ref program, .. } if program == "fdisk"
        ));
        assert!(runner.invocations().iter().all(|c| c.program != "losetup"));
    }

    #[test]
    fn failure_mid_request_keeps_earlier_devices_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(8);
        host.fail_dd_after(2);
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 8), &host);

        let err = prov.create(5).unwrap_err();
        assert_eq!(err.completed.len(), 2);
        assert_eq!(host.bound_count(), 2);
        assert!(err.to_string().starts_with("provisioning stopped after 2 device(s)"));
    }

    #[test]
    fn destroy_is_not_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(4);
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 4), &host);
        let device = prov.create_one().expect("create");

        prov.destroy(device.device()).expect("first detach");
        match prov.destroy(device.device()) {
            Err(CctestError::Unbind { device: d, stderr }) => {
                assert_eq!(d, device.device());
                assert!(stderr.contains("No such device or address"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        prov.remove_image(device.image_path()).expect("remove");
    }

    #[test]
    fn remove_image_twice_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(4);
        let prov = LoopProvisioner::with_runner(config_in(dir.path(), 4), &host);
        let device = prov.create_one().expect("create");
        prov.destroy(device.device()).expect("detach");

        prov.remove_image(device.image_path()).expect("first remove");
        assert!(!device.image_path().exists());
        let err = prov.remove_image(device.image_path()).unwrap_err();
        assert!(matches!(err, CctestError::FileRemoval { .. }));
    }

    #[test]
    fn image_size_follows_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(4);
        let config = LoopConfig {
            image_size_mib: 16,
            ..config_in(dir.path(), 4)
        };
        let prov = LoopProvisioner::with_runner(config, &host);
        let _ = prov.create_one().expect("create");
        assert_eq!(host.invocations()[0].args[3], "bs=16M");
    }

    #[test]
    fn provisioning_works_without_lock_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(4);
        let config = LoopConfig {
            lock_file: None,
            ..config_in(dir.path(), 4)
        };
        let prov = LoopProvisioner::with_runner(config, &host);
        assert_eq!(prov.create(2).expect("create").len(), 2);
        assert!(!dir.path().join("loop.lock").exists());
    }
}
