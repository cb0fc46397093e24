//! Best-effort cleanup of provisioned devices.
//!
//! Every step is attempted even when earlier ones fail; failures are
//! collected and reported together.

use std::path::{Path, PathBuf};

use cctest_common::error::{CctestError, Result};
use cctest_common::types::ProvisionedDevice;

use crate::command::CommandRunner;
use crate::provisioner::{LoopProvisioner, ProvisionError};

/// What a teardown managed to do, and what it did not.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Devices successfully detached.
    pub unbound: Vec<PathBuf>,
    /// Backing files successfully deleted.
    pub removed: Vec<PathBuf>,
    /// Every failure, in the order encountered.
    pub failures: Vec<CctestError>,
}

impl TeardownReport {
    /// Returns whether every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts collected failures into a single error.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::Teardown`] when any step failed.
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(CctestError::Teardown {
            failures: self.failures,
        })
    }

    /// Attaches this cleanup's failures to the error that triggered it.
    ///
    /// A clean report hands `cause` back unchanged; otherwise the result is
    /// [`CctestError::CleanupFailed`] leading with `cause`.
    #[must_use]
    pub fn fold_into(self, cause: CctestError) -> CctestError {
        if self.failures.is_empty() {
            return cause;
        }
        CctestError::CleanupFailed {
            source: Box::new(cause),
            failures: self.failures,
        }
    }

    fn unbind<R: CommandRunner>(&mut self, provisioner: &LoopProvisioner<R>, device: &Path) {
        match provisioner.destroy(device) {
            Ok(()) => self.unbound.push(device.to_path_buf()),
            Err(e) => {
                tracing::warn!(device = %device.display(), error = %e, "unbind failed");
                self.failures.push(e);
            }
        }
    }

    fn remove<R: CommandRunner>(&mut self, provisioner: &LoopProvisioner<R>, image: &Path) {
        match provisioner.remove_image(image) {
            Ok(()) => self.removed.push(image.to_path_buf()),
            Err(e) => {
                tracing::warn!(image = %image.display(), error = %e, "image removal failed");
                self.failures.push(e);
            }
        }
    }
}

impl<R: CommandRunner> LoopProvisioner<R> {
    /// Tears down `devices` in reverse creation order.
    ///
    /// Each pair is detached, then its backing file deleted; a failed detach
    /// does not prevent the delete, and no failure stops the loop.
    pub fn teardown(&self, devices: &[ProvisionedDevice]) -> TeardownReport {
        let mut report = TeardownReport::default();
        if devices.is_empty() {
            return report;
        }
        tracing::info!(count = devices.len(), "tearing down loop devices");
        for device in devices.iter().rev() {
            report.unbind(self, device.device());
            report.remove(self, device.image_path());
        }
        report
    }

    /// Tears down what a failed [`LoopProvisioner::create`] completed and
    /// returns the failure, with any cleanup failures attached.
    pub fn roll_back(&self, err: ProvisionError) -> CctestError {
        self.teardown(&err.completed).fold_into(err.source)
    }

    /// Tears down devices and images known only by path, e.g. from a
    /// previous run. All devices are detached before any file is deleted.
    pub fn release(&self, devices: &[PathBuf], images: &[PathBuf]) -> TeardownReport {
        let mut report = TeardownReport::default();
        for device in devices {
            report.unbind(self, device);
        }
        for image in images {
            report.remove(self, image);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use cctest_common::config::LoopConfig;

    use super::*;
    use crate::testing::LoopHost;

    fn provisioner<'a>(dir: &Path, host: &'a LoopHost) -> LoopProvisioner<&'a LoopHost> {
        LoopProvisioner::with_runner(
            LoopConfig {
                max_tries: 16,
                temp_dir: Some(dir.to_path_buf()),
                lock_file: None,
                ..LoopConfig::default()
            },
            host,
        )
    }

    #[test]
    fn teardown_restores_host_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(16);
        let prov = provisioner(dir.path(), &host);
        let devices = prov.create(4).expect("create");

        let report = prov.teardown(&devices);
        assert!(report.is_clean());
        assert_eq!(report.unbound.len(), 4);
        assert_eq!(report.removed.len(), 4);
        assert_eq!(host.bound_count(), 0);
        assert!(devices.iter().all(|d| !d.image_path().exists()));
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn teardown_runs_in_reverse_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(16);
        let prov = provisioner(dir.path(), &host);
        let devices = prov.create(3).expect("create");

        let report = prov.teardown(&devices);
        assert_eq!(
            report.unbound,
            vec![
                PathBuf::from("/dev/loop2"),
                PathBuf::from("/dev/loop1"),
                PathBuf::from("/dev/loop0"),
            ]
        );
    }

    #[test]
    fn teardown_continues_past_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(16);
        let prov = provisioner(dir.path(), &host);
        let devices = prov.create(3).expect("create");

        prov.destroy(devices[1].device()).expect("early detach");
        prov.remove_image(devices[0].image_path()).expect("early remove");

        let report = prov.teardown(&devices);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.unbound.len(), 2);
        assert_eq!(report.removed.len(), 2);
        assert_eq!(host.bound_count(), 0);
        assert!(devices.iter().all(|d| !d.image_path().exists()));

        match report.into_result() {
            Err(CctestError::Teardown { failures }) => {
                assert!(matches!(failures[0], CctestError::Unbind { .. }));
                assert!(matches!(failures[1], CctestError::FileRemoval { .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn teardown_of_nothing_is_clean() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(1);
        let prov = provisioner(dir.path(), &host);
        assert!(prov.teardown(&[]).is_clean());
        assert!(host.invocations().is_empty());
    }

    #[test]
    fn release_cleans_partial_provisioning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(2);
        let prov = provisioner(dir.path(), &host);
        let err = prov.create(3).unwrap_err();
        let devices: Vec<_> = err.completed.iter().map(|d| d.device().to_path_buf()).collect();
        let images: Vec<_> = err.completed.iter().map(|d| d.image_path().to_path_buf()).collect();

        let report = prov.release(&devices, &images);
        assert!(report.is_clean());
        assert_eq!(host.bound_count(), 0);
        assert!(images.iter().all(|p| !p.exists()));
    }

    #[test]
    fn roll_back_without_cleanup_failures_returns_cause() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(1);
        let prov = provisioner(dir.path(), &host);
        let err = prov.create(2).unwrap_err();

        let err = prov.roll_back(err);
        assert!(matches!(err, CctestError::NoFreeLoopDevice { tried: 16, .. }));
        assert_eq!(host.bound_count(), 0);
    }

    #[test]
    fn roll_back_reports_devices_left_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LoopHost::new(1);
        let prov = provisioner(dir.path(), &host);
        let err = prov.create(2).unwrap_err();
        let stranded = err.completed[0].clone();
        host.refuse_detach();

        match prov.roll_back(err) {
            CctestError::CleanupFailed { source, failures } => {
                assert!(matches!(*source, CctestError::NoFreeLoopDevice { .. }));
                assert_eq!(failures.len(), 1);
                assert!(matches!(
                    &failures[0],
                    CctestError::Unbind { device, .. } if device == stranded.device()
                ));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(host.backing_file(stranded.device()), Some(stranded.image_path().to_path_buf()));
        assert!(!stranded.image_path().exists());
    }
}
