//! Block-device hot-plug verification.
//!
//! Provisions loop devices, hands all of them to one container with
//! `--device`, and runs `stat` on each path inside it. Teardown always
//! runs, whatever the container did.

use cctest_common::error::{CctestError, Result};
use cctest_common::types::{ContainerName, ProvisionedDevice};
use cctest_loop::command::{CommandOutput, CommandRunner};
use cctest_loop::provisioner::LoopProvisioner;
use cctest_loop::teardown::TeardownReport;

use crate::docker::Docker;
use crate::options::RunOptions;
use crate::scenario;

/// Everything observed during one hot-plug check.
#[derive(Debug)]
pub struct HotplugReport {
    /// Name of the container that received the devices.
    pub container: ContainerName,
    /// Devices that were attached; already torn down.
    pub devices: Vec<ProvisionedDevice>,
    /// Output of `docker run ... stat`.
    pub output: CommandOutput,
    /// Whether the `--rm` container was still listed after it exited.
    pub container_left_behind: bool,
    /// Outcome of the cleanup.
    pub teardown: TeardownReport,
}

impl HotplugReport {
    /// Returns whether every device was visible inside the container.
    #[must_use]
    pub const fn attached(&self) -> bool {
        self.output.success()
    }

    /// Converts the report into a pass/fail verdict.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::Verification`] if `stat` failed or the
    /// container survived, else [`CctestError::Teardown`] if cleanup failed.
    pub fn into_result(mut self) -> Result<Self> {
        if !self.attached() {
            return Err(CctestError::Verification {
                message: format!(
                    "stat on {} hot-plugged device(s) in {} exited with {}: {}",
                    self.devices.len(),
                    self.container,
                    self.output.exit_code,
                    self.output.stderr.trim()
                ),
            });
        }
        if self.container_left_behind {
            return Err(CctestError::Verification {
                message: format!("container {} still exists", self.container),
            });
        }
        if !self.teardown.is_clean() {
            return Err(CctestError::Teardown {
                failures: std::mem::take(&mut self.teardown.failures),
            });
        }
        Ok(self)
    }
}

/// `docker run --name <n> --rm --device <d>... <image> stat <d>...`
#[must_use]
pub fn hotplug_options<R: CommandRunner>(
    docker: &Docker<R>,
    name: ContainerName,
    devices: &[ProvisionedDevice],
) -> RunOptions {
    let paths: Vec<String> = devices
        .iter()
        .map(|d| d.device().display().to_string())
        .collect();
    let options = devices
        .iter()
        .fold(docker.options(name).remove(true), |opts, d| {
            opts.device(d.device())
        });
    options.command(std::iter::once("stat".to_string()).chain(paths))
}

/// Provisions `count` devices, attaches them to a container and tears them
/// down again.
///
/// # Errors
///
/// Returns [`CctestError::Config`] if `count` is zero. Returns the
/// provisioning failure (after tearing down the devices that were
/// completed), or an error if docker cannot be run; either one becomes
/// [`CctestError::CleanupFailed`] when that teardown left something behind.
/// Container-side failures are reported in the [`HotplugReport`].
pub fn verify_hotplug<P, D>(
    provisioner: &LoopProvisioner<P>,
    docker: &Docker<D>,
    count: usize,
) -> Result<HotplugReport>
where
    P: CommandRunner,
    D: CommandRunner,
{
    verify_hotplug_with(provisioner, docker, count, |_| {})
}

/// Like [`verify_hotplug`], calling `before_teardown` with the devices once
/// the container has finished and before anything is released.
///
/// # Errors
///
/// Same as [`verify_hotplug`].
pub fn verify_hotplug_with<P, D, F>(
    provisioner: &LoopProvisioner<P>,
    docker: &Docker<D>,
    count: usize,
    before_teardown: F,
) -> Result<HotplugReport>
where
    P: CommandRunner,
    D: CommandRunner,
    F: FnOnce(&[ProvisionedDevice]),
{
    if count == 0 {
        return Err(CctestError::Config {
            message: "hot-plug needs at least one device".into(),
        });
    }
    let devices = provisioner
        .create(count)
        .map_err(|err| provisioner.roll_back(err))?;

    let container = ContainerName::random();
    let attached = attach(docker, &container, &devices);
    before_teardown(&devices);
    let teardown = provisioner.teardown(&devices);

    let (output, container_left_behind) = match attached {
        Ok(observed) => observed,
        Err(e) => return Err(teardown.fold_into(e)),
    };

    tracing::info!(
        container = %container,
        devices = devices.len(),
        exit_code = output.exit_code,
        teardown_failures = teardown.failures.len(),
        "hot-plug check finished"
    );
    Ok(HotplugReport {
        container,
        devices,
        output,
        container_left_behind,
        teardown,
    })
}

fn attach<R: CommandRunner>(
    docker: &Docker<R>,
    name: &ContainerName,
    devices: &[ProvisionedDevice],
) -> Result<(CommandOutput, bool)> {
    let output = docker.run(&hotplug_options(docker, name.clone(), devices))?;
    let left_behind = scenario::ensure_gone(docker, name).is_err();
    Ok((output, left_behind))
}
